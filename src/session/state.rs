use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// セッションのライフサイクル
///
/// Init → Ready → Streaming → Stopping → Closed が正常系。
/// Failed からは後片付けとして Closed へのみ遷移する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Ready,
    Streaming,
    Stopping,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Ready => "ready",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    /// 音声を受け付ける状態か
    pub fn accepts_audio(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Ready)
                | (Init, Failed)
                | (Ready, Streaming)
                | (Ready, Stopping)
                | (Streaming, Stopping)
                | (Ready | Streaming | Stopping, Failed)
                | (Stopping, Closed)
                | (Failed, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// 現在状態を保持し、購読者へ配信する
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<SessionState>,
    history: Mutex<Vec<SessionState>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Init);
        Self {
            tx,
            history: Mutex::new(vec![SessionState::Init]),
        }
    }

    /// これまでに通過した状態（Init を含む）
    pub(crate) fn history(&self) -> Vec<SessionState> {
        self.history.lock().clone()
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn transition(&self, next: SessionState) -> Result<(), InvalidTransition> {
        let from = self.get();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        debug!(from = %from, to = %next, "session state changed");
        self.history.lock().push(next);
        self.tx.send_replace(next);
        Ok(())
    }
}
