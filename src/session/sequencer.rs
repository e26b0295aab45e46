use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::recognition::{StreamConfig, StreamRequest};

use super::ingest::{AudioIngestQueue, Take};

/// バックエンドへ渡すリクエスト列
///
/// 最初に設定フレームを1回だけ返し、以降はキューから取り出した音声を返します。
/// 終端マーカーを受け取るか、キューが空のときにセッションが停止していれば終了します。
/// 停止フラグは空振り時にしか見ないので、停止前に積まれたフレームは必ず流れ切ります。
pub struct RequestSequencer {
    config: Option<StreamConfig>,
    queue: Arc<AudioIngestQueue>,
    alive: Arc<AtomicBool>,
    take_timeout: Duration,
    finished: bool,
}

impl RequestSequencer {
    pub fn new(
        config: StreamConfig,
        queue: Arc<AudioIngestQueue>,
        alive: Arc<AtomicBool>,
        take_timeout: Duration,
    ) -> Self {
        Self {
            config: Some(config),
            queue,
            alive,
            take_timeout,
            finished: false,
        }
    }
}

impl Iterator for RequestSequencer {
    type Item = StreamRequest;

    fn next(&mut self) -> Option<StreamRequest> {
        if self.finished {
            return None;
        }
        if let Some(config) = self.config.take() {
            return Some(StreamRequest::Config(config));
        }

        loop {
            match self.queue.take(self.take_timeout) {
                Take::Frame(frame) => {
                    self.queue.counters().record_forwarded();
                    return Some(StreamRequest::Audio(frame));
                }
                Take::EndOfStream => break,
                Take::Empty if !self.alive.load(Ordering::Acquire) => break,
                Take::Empty => {}
            }
        }
        self.finished = true;
        None
    }
}

impl FusedIterator for RequestSequencer {}
