//! 1接続 = 1セッションの制御
//!
//! 初期化（認証）→ ready → 音声中継 → 停止 の流れを協調スケジューリング側で進めます。
//! 認識呼び出し自体は `RecognitionStreamWorker` の専用スレッドで行います。
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::Identity;
use crate::recognition::TranscriptEvent;
use crate::transport::{ClientFrame, ClientTransport, CloseCode};

use super::context::BridgeContext;
use super::error::SessionError;
use super::ingest::{AudioIngestQueue, IngestCounters, IngestStats};
use super::protocol::{decode_audio, default_session_id, timestamp_now, ControlMessage, InitMessage, OutboundMessage};
use super::relay::{self, ResponseRelay};
use super::sequencer::RequestSequencer;
use super::state::{SessionState, StateCell};
use super::worker::{RecognitionStreamWorker, WorkerHandle};

/// 終了時の結果
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Option<String>,
    pub identity: Option<Identity>,
    pub final_state: SessionState,
    /// 通過した状態の列
    pub transitions: Vec<SessionState>,
    pub failure: Option<SessionError>,
    pub stats: IngestStats,
    pub worker_joined: bool,
}

/// 実行中のセッションを外から観測するハンドル
#[derive(Debug, Clone)]
pub struct SessionObserver {
    state: watch::Receiver<SessionState>,
    counters: Arc<IngestCounters>,
}

impl SessionObserver {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// `target` になるまで待つ。セッションが先に破棄されたら false。
    pub async fn wait_for(&mut self, target: SessionState) -> bool {
        loop {
            if *self.state.borrow_and_update() == target {
                return true;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow() == target;
            }
        }
    }
}

enum StopCause {
    ClientStop,
    Disconnected,
    UpstreamEnded,
    UpstreamFailed(String),
}

pub struct TranscriptionSession<T> {
    context: Arc<BridgeContext>,
    transport: T,
    state: StateCell,
    queue: Arc<AudioIngestQueue>,
    alive: Arc<AtomicBool>,
    failure: Option<SessionError>,
    connected: bool,
}

impl<T> TranscriptionSession<T>
where
    T: ClientTransport,
{
    pub fn new(context: Arc<BridgeContext>, transport: T) -> Self {
        let queue = Arc::new(AudioIngestQueue::new(context.settings.ingest_capacity));
        Self {
            context,
            transport,
            state: StateCell::new(),
            queue,
            alive: Arc::new(AtomicBool::new(true)),
            failure: None,
            connected: true,
        }
    }

    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            state: self.state.subscribe(),
            counters: self.queue.counters().clone(),
        }
    }

    /// セッションを最後まで実行する。どの経路でも `Closed` で終わる。
    pub async fn run(mut self) -> SessionOutcome {
        let metrics = self.context.metrics.clone();
        metrics.sessions_active.inc();

        let mut session_id = None;
        let mut identity = None;
        let mut worker_joined = true;

        match self.initialize().await {
            Ok((id, who)) => {
                worker_joined = self.stream(&id).await;
                session_id = Some(id);
                identity = Some(who);
            }
            Err(err) => self.reject(err).await,
        }
        self.enter(SessionState::Closed);

        let stats = self.queue.counters().snapshot();
        metrics.sessions_active.dec();
        metrics.audio_frames_forwarded.inc_by(stats.forwarded);
        let label = self.failure.as_ref().map_or("closed", SessionError::label);
        metrics.sessions_closed.with_label_values(&[label]).inc();

        info!(
            session_id = session_id.as_deref().unwrap_or("-"),
            offered = stats.offered,
            dropped = stats.dropped,
            forwarded = stats.forwarded,
            outcome = label,
            "session closed"
        );

        SessionOutcome {
            session_id,
            identity,
            final_state: self.state.get(),
            transitions: self.state.history(),
            failure: self.failure,
            stats,
            worker_joined,
        }
    }

    async fn initialize(&mut self) -> Result<(String, Identity), SessionError> {
        let text = match self.transport.recv().await {
            Some(Ok(ClientFrame::Text(text))) => text,
            Some(Ok(ClientFrame::Binary(_))) => return Err(SessionError::invalid_init()),
            Some(Ok(ClientFrame::Close)) | None => {
                self.connected = false;
                return Err(SessionError::Protocol {
                    reason: "client disconnected before initialization".into(),
                });
            }
            Some(Err(e)) => {
                self.connected = false;
                return Err(SessionError::Protocol { reason: e.to_string() });
            }
        };

        let init = InitMessage::parse(&text).ok_or_else(SessionError::invalid_init)?;
        let token = init.token().ok_or_else(SessionError::token_required)?;
        let identity = self.context.verifier.verify(token).await.map_err(|e| {
            warn!(error = %e, "token verification failed");
            SessionError::unauthorized()
        })?;

        let session_id = init
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(default_session_id);
        info!(
            session_id = %session_id,
            uid = %identity.uid,
            email = identity.email.as_deref().unwrap_or("-"),
            "session authenticated"
        );
        if let Some(config) = &init.config {
            debug!(session_id = %session_id, config = %config, "client config received");
        }
        Ok((session_id, identity))
    }

    /// 初期化失敗: エラーを1件送って切断
    async fn reject(&mut self, err: SessionError) {
        warn!(error = %err, "session initialization failed");
        self.enter(SessionState::Failed);
        self.report(&err).await;
        self.failure = Some(err.clone());
        self.close_transport(err.close_code(), err.close_reason()).await;
    }

    /// ワーカーを起動し、停止するまで中継する。ワーカーを join できたかを返す。
    async fn stream(&mut self, session_id: &str) -> bool {
        let (relay_tx, mut relay) = relay::channel();
        let requests = RequestSequencer::new(
            self.context.stream_config.clone(),
            self.queue.clone(),
            self.alive.clone(),
            self.context.settings.take_timeout(),
        );
        let worker = match RecognitionStreamWorker::spawn(session_id, self.context.backend.clone(), requests, relay_tx) {
            Ok(worker) => worker,
            Err(e) => {
                error!(session_id, error = %e, "failed to start recognition worker");
                self.reject(SessionError::UpstreamStream {
                    message: format!("failed to start recognition worker: {e}"),
                })
                .await;
                return true;
            }
        };

        self.enter(SessionState::Ready);
        let ready = self.context.ready_event();
        self.deliver(session_id, ready).await;

        let cause = if self.connected {
            self.relay_until_stop(session_id, &mut relay).await
        } else {
            StopCause::Disconnected
        };

        match cause {
            StopCause::ClientStop => info!(session_id, "stop requested by client"),
            StopCause::UpstreamEnded => info!(session_id, "recognition stream ended before stop"),
            StopCause::Disconnected => {
                info!(session_id, "client disconnected");
                self.connected = false;
            }
            StopCause::UpstreamFailed(message) => self.fail_upstream(session_id, message).await,
        }
        if self.state.get() != SessionState::Failed {
            self.enter(SessionState::Stopping);
        }

        let joined = self.shutdown(session_id, relay, worker).await;

        let (code, reason) = match &self.failure {
            Some(err) => (err.close_code(), err.close_reason()),
            None => (CloseCode::Normal, "Session ended"),
        };
        self.close_transport(code, reason).await;
        joined
    }

    async fn relay_until_stop(&mut self, session_id: &str, relay: &mut ResponseRelay) -> StopCause {
        loop {
            tokio::select! {
                frame = self.transport.recv() => match frame {
                    Some(Ok(ClientFrame::Binary(data))) => self.accept_audio(session_id, data),
                    Some(Ok(ClientFrame::Text(text))) => match ControlMessage::parse(&text) {
                        Some(ControlMessage::Stop) => return StopCause::ClientStop,
                        Some(ControlMessage::Audio { data }) => match decode_audio(&data) {
                            Ok(frame) => self.accept_audio(session_id, frame),
                            Err(e) => warn!(session_id, error = %e, "invalid base64 audio payload ignored"),
                        },
                        None => debug!(session_id, "unrecognized control message ignored"),
                    },
                    Some(Ok(ClientFrame::Close)) | None => return StopCause::Disconnected,
                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "client transport error");
                        return StopCause::Disconnected;
                    }
                },
                event = relay.next() => match event {
                    Some(TranscriptEvent::Error { message }) => return StopCause::UpstreamFailed(message),
                    Some(event) => {
                        if !self.deliver(session_id, event).await {
                            return StopCause::Disconnected;
                        }
                    }
                    None => return StopCause::UpstreamEnded,
                },
            }
        }
    }

    fn accept_audio(&self, session_id: &str, frame: Bytes) {
        let state = self.state.get();
        if !state.accepts_audio() {
            debug!(session_id, state = %state, "audio ignored");
            return;
        }
        if state == SessionState::Ready {
            self.enter(SessionState::Streaming);
        }
        if let Err(e) = self.queue.offer(frame) {
            match SessionError::from_ingest(e) {
                Some(overflow) => {
                    self.context.metrics.audio_frames_dropped.inc();
                    debug!(session_id, error = %overflow, "audio frame dropped");
                }
                None => debug!(session_id, "audio after end of stream ignored"),
            }
        }
    }

    async fn fail_upstream(&mut self, session_id: &str, message: String) {
        let err = SessionError::UpstreamStream { message };
        error!(session_id, error = %err, "recognition stream failed");
        self.context.metrics.upstream_errors.inc();
        self.report(&err).await;
        self.failure = Some(err);
        self.enter(SessionState::Failed);
    }

    /// 停止を通知し、残りのイベントを中継してからワーカーを待つ
    async fn shutdown(&mut self, session_id: &str, mut relay: ResponseRelay, worker: WorkerHandle) -> bool {
        self.alive.store(false, Ordering::Release);
        self.queue.close();

        let join_timeout = self.context.settings.join_timeout();
        let deadline = Instant::now() + join_timeout;
        loop {
            match timeout_at(deadline, relay.next()).await {
                Ok(Some(TranscriptEvent::Error { message })) => {
                    if self.failure.is_none() {
                        self.fail_upstream(session_id, message).await;
                    } else {
                        debug!(session_id, error = %message, "late recognition error ignored");
                    }
                }
                Ok(Some(event)) => {
                    if self.failure.is_none() && self.connected {
                        self.deliver(session_id, event).await;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        // 期限を過ぎていれば終了済みかを一度だけ確認する
        let remaining = deadline.saturating_duration_since(Instant::now());
        if worker.join_within(remaining).await {
            return true;
        }

        let err = SessionError::ShutdownTimeout {
            waited_ms: join_timeout.as_millis() as u64,
        };
        warn!(session_id, error = %err, "recognition worker abandoned");
        self.context.metrics.shutdown_timeouts.inc();
        if self.failure.is_none() {
            self.report(&err).await;
            self.failure = Some(err);
        }
        false
    }

    /// 通知対象のエラーを1件送る。送れなければ切断扱い。
    async fn report(&mut self, err: &SessionError) {
        if !err.is_reported() || !self.connected {
            return;
        }
        let message = OutboundMessage::error(err.to_string(), timestamp_now());
        if let Err(e) = self.transport.send(&message).await {
            debug!(error = %e, kind = err.label(), "could not deliver error");
            self.connected = false;
        }
    }

    /// イベントを送る。送れなければ切断扱いにして false。
    async fn deliver(&mut self, session_id: &str, event: TranscriptEvent) -> bool {
        if !self.connected {
            return false;
        }
        let kind = event.kind();
        let message = OutboundMessage::from_event(event, session_id, timestamp_now());
        match self.transport.send(&message).await {
            Ok(()) => {
                self.context.metrics.events_relayed.with_label_values(&[kind]).inc();
                true
            }
            Err(e) => {
                warn!(session_id, error = %e, "failed to deliver event; treating client as gone");
                self.connected = false;
                false
            }
        }
    }

    async fn close_transport(&mut self, code: CloseCode, reason: &str) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.transport.close(code, reason).await {
            debug!(error = %e, "transport close failed");
        }
    }

    fn enter(&self, next: SessionState) {
        if let Err(e) = self.state.transition(next) {
            error!(error = %e, "unexpected session transition");
        }
    }
}
