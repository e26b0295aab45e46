//! 音声インジェストキュー
//!
//! セッション（協調スケジューリング側）が音声フレームを投入し、認識ワーカー（専用スレッド）が
//! タイムアウト付きで取り出す有界キューです。満杯時は新しいフレームを捨てます。
//! 終端マーカー用に1スロットを予約しているため、満杯でも `close` は必ず成功します。
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("ingest queue full (capacity {capacity}); frame dropped")]
    Overflow { capacity: usize },
    #[error("ingest queue closed")]
    Closed,
}

#[derive(Debug)]
enum IngestItem {
    Audio(Bytes),
    EndOfStream,
}

/// `take` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take {
    Frame(Bytes),
    EndOfStream,
    /// タイムアウトまでに何も届かなかった
    Empty,
}

/// キューの計数器（セッション統計とメトリクスの元）
#[derive(Debug, Default)]
pub struct IngestCounters {
    offered: AtomicU64,
    dropped: AtomicU64,
    forwarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub offered: u64,
    pub dropped: u64,
    pub forwarded: u64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            offered: self.offered.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            forwarded: self.forwarded.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct AudioIngestQueue {
    capacity: usize,
    tx: Sender<IngestItem>,
    rx: Receiver<IngestItem>,
    closed: AtomicBool,
    counters: Arc<IngestCounters>,
}

impl AudioIngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_counters(capacity, Arc::new(IngestCounters::default()))
    }

    pub fn with_counters(capacity: usize, counters: Arc<IngestCounters>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity + 1);
        Self {
            capacity,
            tx,
            rx,
            closed: AtomicBool::new(false),
            counters,
        }
    }

    /// 非ブロッキングで投入。満杯なら捨てて `Overflow` を返す。
    pub fn offer(&self, frame: Bytes) -> Result<(), IngestError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngestError::Closed);
        }
        self.counters.offered.fetch_add(1, Ordering::AcqRel);

        if self.tx.len() >= self.capacity {
            self.counters.dropped.fetch_add(1, Ordering::AcqRel);
            return Err(IngestError::Overflow {
                capacity: self.capacity,
            });
        }
        match self.tx.try_send(IngestItem::Audio(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::AcqRel);
                Err(IngestError::Overflow {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(IngestError::Closed),
        }
    }

    /// 終端マーカーを投入する。2回目以降は何もせず false。
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.try_send(IngestItem::EndOfStream).is_ok()
    }

    /// 最大 `timeout` 待って1件取り出す
    pub fn take(&self, timeout: Duration) -> Take {
        match self.rx.recv_timeout(timeout) {
            Ok(IngestItem::Audio(frame)) => Take::Frame(frame),
            Ok(IngestItem::EndOfStream) => Take::EndOfStream,
            Err(RecvTimeoutError::Timeout) => Take::Empty,
            Err(RecvTimeoutError::Disconnected) => Take::EndOfStream,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> &Arc<IngestCounters> {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_WAIT: Duration = Duration::from_millis(1);

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    #[test]
    fn drops_newest_when_full() {
        let queue = AudioIngestQueue::new(10);
        let results: Vec<_> = (0..11).map(|i| queue.offer(frame(i))).collect();

        assert!(results[..10].iter().all(Result::is_ok));
        assert_eq!(results[10], Err(IngestError::Overflow { capacity: 10 }));
        let stats = queue.counters().snapshot();
        assert_eq!(stats.offered, 11);
        assert_eq!(stats.dropped, 1);

        // 先に入ったものから順に取り出せ、捨てられたのは最後の1件
        for i in 0..10 {
            assert_eq!(queue.take(NO_WAIT), Take::Frame(frame(i)));
        }
        assert_eq!(queue.take(NO_WAIT), Take::Empty);
    }

    #[test]
    fn end_marker_fits_when_full() {
        let queue = AudioIngestQueue::new(2);
        queue.offer(frame(1)).unwrap();
        queue.offer(frame(2)).unwrap();

        assert!(queue.close());
        assert!(!queue.close());
        assert_eq!(queue.offer(frame(3)), Err(IngestError::Closed));

        assert_eq!(queue.take(NO_WAIT), Take::Frame(frame(1)));
        assert_eq!(queue.take(NO_WAIT), Take::Frame(frame(2)));
        assert_eq!(queue.take(NO_WAIT), Take::EndOfStream);
        // 拒否された投入は計数しない
        assert_eq!(queue.counters().snapshot().offered, 2);
    }

    #[test]
    fn take_times_out_on_empty_queue() {
        let queue = AudioIngestQueue::new(1);
        let started = std::time::Instant::now();
        assert_eq!(queue.take(Duration::from_millis(20)), Take::Empty);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let queue = Arc::new(AudioIngestQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut received = 0;
                loop {
                    match queue.take(Duration::from_millis(50)) {
                        Take::Frame(_) => received += 1,
                        Take::EndOfStream => return received,
                        Take::Empty => {}
                    }
                }
            })
        };

        let mut accepted = 0;
        for i in 0..100u8 {
            if queue.offer(frame(i)).is_ok() {
                accepted += 1;
            }
        }
        queue.close();

        let received = consumer.join().expect("consumer thread");
        assert_eq!(received, accepted);
        let stats = queue.counters().snapshot();
        assert_eq!(stats.offered, 100);
        assert_eq!(stats.dropped, 100 - accepted);
    }
}
