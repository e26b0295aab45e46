//! 認識ワーカー → セッションへのイベント中継
//!
//! 送信はブロッキングスレッドから非同期を待たずに行え、受信はセッションの `select!` で待てます。
//! ワーカーが送信側を破棄するとチャネルが閉じ、それが完了通知になります。
use tokio::sync::mpsc;

use crate::recognition::TranscriptEvent;

pub fn channel() -> (RelaySender, ResponseRelay) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RelaySender { tx }, ResponseRelay { rx })
}

#[derive(Debug)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<TranscriptEvent>,
}

impl RelaySender {
    /// 受信側が既に無ければ false
    pub fn post(&self, event: TranscriptEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug)]
pub struct ResponseRelay {
    rx: mpsc::UnboundedReceiver<TranscriptEvent>,
}

impl ResponseRelay {
    /// 次のイベント。`None` はワーカーが終了したことを表す。
    pub async fn next(&mut self) -> Option<TranscriptEvent> {
        self.rx.recv().await
    }
}
