//! 認識ワーカー
//!
//! ブロッキングなストリーミング認識呼び出しをセッションごとの専用スレッドで実行し、
//! 受け取ったイベントを `RelaySender` へ順に流します。
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::recognition::{BackendError, RecognitionBackend, TranscriptEvent};

use super::relay::RelaySender;
use super::sequencer::RequestSequencer;

const JOIN_POLL: Duration = Duration::from_millis(10);

pub struct RecognitionStreamWorker;

impl RecognitionStreamWorker {
    pub fn spawn(
        session_id: &str,
        backend: Arc<dyn RecognitionBackend>,
        requests: RequestSequencer,
        relay: RelaySender,
    ) -> std::io::Result<WorkerHandle> {
        let sid = session_id.to_string();
        let thread = thread::Builder::new()
            .name("recognition-worker".into())
            .spawn(move || run(&sid, backend, requests, relay))?;
        Ok(WorkerHandle {
            thread: Some(thread),
        })
    }
}

fn run(session_id: &str, backend: Arc<dyn RecognitionBackend>, requests: RequestSequencer, relay: RelaySender) {
    info!(session_id, backend = backend.name(), "recognition worker started");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| drive(session_id, backend.as_ref(), requests, &relay)));

    match outcome {
        Ok(Ok(count)) => info!(session_id, responses = count, "recognition stream completed"),
        Ok(Err(e)) => {
            error!(session_id, error = %e, "recognition stream failed");
            relay.post(TranscriptEvent::Error {
                message: e.to_string(),
            });
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(session_id, panic = %message, "recognition worker panicked");
            relay.post(TranscriptEvent::Error {
                message: format!("recognition worker panicked: {message}"),
            });
        }
    }
}

fn drive(
    session_id: &str,
    backend: &dyn RecognitionBackend,
    requests: RequestSequencer,
    relay: &RelaySender,
) -> Result<usize, BackendError> {
    let responses = backend.streaming_recognize(Box::new(requests))?;
    let mut count = 0;
    for item in responses {
        let event = item?;
        count += 1;
        match &event {
            TranscriptEvent::FinalTranscript { text, confidence, .. } => {
                debug!(session_id, confidence, "[FINAL] {text}")
            }
            TranscriptEvent::InterimTranscript { text, .. } => debug!(session_id, "[INTERIM] {text}"),
            other => debug!(session_id, kind = other.kind(), "recognition event"),
        }
        if !relay.post(event) {
            debug!(session_id, "session gone; abandoning recognition stream");
            break;
        }
    }
    Ok(count)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// ワーカースレッドのハンドル
#[derive(Debug)]
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 最大 `timeout` だけ終了を待つ。期限内に終われば true。
    ///
    /// 非同期側をブロックしないよう終了をポーリングし、期限切れのスレッドは切り離します。
    pub async fn join_within(mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                // JoinHandle を破棄するとスレッドは切り離される
                self.thread.take();
                return false;
            }
            sleep(JOIN_POLL.min(deadline - now)).await;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("recognition worker thread panicked outside the stream");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use bytes::Bytes;

    use super::*;
    use crate::config::RecognitionConfig;
    use crate::recognition::{MockRecognitionBackend, RequestStream, ResponseStream, StreamConfig};
    use crate::session::ingest::AudioIngestQueue;
    use crate::session::relay;

    fn sequencer(queue: Arc<AudioIngestQueue>) -> RequestSequencer {
        let cfg: RecognitionConfig = serde_yaml::from_str(include_str!("../../config/recognition.yaml"))
            .expect("recognition.yaml");
        RequestSequencer::new(
            StreamConfig::from(&cfg),
            queue,
            Arc::new(AtomicBool::new(true)),
            Duration::from_millis(5),
        )
    }

    struct PanickingBackend;

    impl RecognitionBackend for PanickingBackend {
        fn name(&self) -> &str {
            "panicking"
        }

        fn streaming_recognize(&self, _requests: RequestStream) -> Result<ResponseStream, BackendError> {
            panic!("backend exploded");
        }
    }

    #[tokio::test]
    async fn relays_events_and_joins() {
        let queue = Arc::new(AudioIngestQueue::new(8));
        for _ in 0..3 {
            queue.offer(Bytes::from_static(&[0; 2])).unwrap();
        }
        queue.close();

        let (tx, mut rx) = relay::channel();
        let handle = RecognitionStreamWorker::spawn(
            "t",
            Arc::new(MockRecognitionBackend::default()),
            sequencer(queue),
            tx,
        )
        .expect("spawn");

        let mut kinds = Vec::new();
        while let Some(event) = rx.next().await {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.first(), Some(&"speech_start"));
        assert_eq!(kinds.last(), Some(&"speech_end"));
        assert!(!kinds.contains(&"error"));
        assert!(handle.join_within(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn panic_becomes_single_error_event() {
        let queue = Arc::new(AudioIngestQueue::new(1));
        let (tx, mut rx) = relay::channel();
        let handle =
            RecognitionStreamWorker::spawn("t", Arc::new(PanickingBackend), sequencer(queue), tx).expect("spawn");

        let first = rx.next().await;
        assert!(
            matches!(first, Some(TranscriptEvent::Error { ref message }) if message.contains("backend exploded"))
        );
        assert_eq!(rx.next().await, None);
        assert!(handle.join_within(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn stalled_worker_is_abandoned_after_timeout() {
        let queue = Arc::new(AudioIngestQueue::new(1));
        let (tx, _rx) = relay::channel();
        let handle = RecognitionStreamWorker::spawn(
            "t",
            Arc::new(MockRecognitionBackend::stalled()),
            sequencer(queue),
            tx,
        )
        .expect("spawn");

        let started = Instant::now();
        assert!(!handle.join_within(Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_millis(130));
    }

    #[tokio::test]
    async fn zero_timeout_checks_once_without_waiting() {
        let queue = Arc::new(AudioIngestQueue::new(1));
        let (tx, _rx) = relay::channel();
        let handle = RecognitionStreamWorker::spawn(
            "t",
            Arc::new(MockRecognitionBackend::stalled()),
            sequencer(queue),
            tx,
        )
        .expect("spawn");

        let started = Instant::now();
        assert!(!handle.join_within(Duration::ZERO).await);
        assert!(started.elapsed() < Duration::from_millis(20));
    }
}
