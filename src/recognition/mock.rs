use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::backend::{RecognitionBackend, RequestStream, ResponseStream};
use super::error::BackendError;
use super::event::{TranscriptEvent, WordTiming};
use super::request::StreamRequest;

/// モックが1フレームを何秒の音声とみなすか
const FRAME_SECONDS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// フレームごとに途中結果、`final_every` フレームごとに最終結果
    Echo { final_every: usize },
    /// `frames` 枚受け取った時点でストリームエラー
    FailAfter { frames: usize },
    /// 音声を引き込まず、イベントも返さない（ハングしたバックエンド）
    Stall,
}

#[derive(Debug, Default)]
struct MockStats {
    calls: AtomicUsize,
    frames: AtomicUsize,
    config_first: AtomicBool,
}

/// テスト用のスクリプト化されたバックエンド
#[derive(Debug, Clone)]
pub struct MockRecognitionBackend {
    behavior: MockBehavior,
    stats: Arc<MockStats>,
}

impl Default for MockRecognitionBackend {
    fn default() -> Self {
        Self::new(MockBehavior::Echo { final_every: 5 })
    }
}

impl MockRecognitionBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn failing_after(frames: usize) -> Self {
        Self::new(MockBehavior::FailAfter { frames })
    }

    pub fn stalled() -> Self {
        Self::new(MockBehavior::Stall)
    }

    /// `streaming_recognize` の呼び出し回数
    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    /// 引き込んだ音声フレーム数
    pub fn frames_received(&self) -> usize {
        self.stats.frames.load(Ordering::SeqCst)
    }

    /// 最初に引き込んだフレームが設定フレームだったか
    pub fn saw_config_first(&self) -> bool {
        self.stats.config_first.load(Ordering::SeqCst)
    }
}

impl RecognitionBackend for MockRecognitionBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn streaming_recognize(&self, requests: RequestStream) -> Result<ResponseStream, BackendError> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockResponses {
            requests,
            behavior: self.behavior,
            stats: self.stats.clone(),
            script: EchoScript::new(match self.behavior {
                MockBehavior::Echo { final_every } => final_every,
                _ => usize::MAX,
            }),
            pending: VecDeque::new(),
            started: false,
            done: false,
        }))
    }
}

struct MockResponses {
    requests: RequestStream,
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    script: EchoScript,
    pending: VecDeque<TranscriptEvent>,
    started: bool,
    done: bool,
}

impl Iterator for MockResponses {
    type Item = Result<TranscriptEvent, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.behavior == MockBehavior::Stall {
            // 解放されないまま放置される想定（セッション側のjoinタイムアウトを検証する）
            loop {
                std::thread::park();
            }
        }

        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }

            match self.requests.next() {
                Some(StreamRequest::Config(_)) => {
                    if !self.started {
                        self.stats.config_first.store(true, Ordering::SeqCst);
                    }
                    self.started = true;
                }
                Some(StreamRequest::Audio(_)) => {
                    self.started = true;
                    let received = self.stats.frames.fetch_add(1, Ordering::SeqCst) + 1;
                    if let MockBehavior::FailAfter { frames } = self.behavior {
                        if received >= frames {
                            self.done = true;
                            return Some(Err(BackendError::stream(format!(
                                "mock backend failure after {received} frames"
                            ))));
                        }
                    }
                    self.pending.extend(self.script.on_audio());
                }
                None => {
                    self.done = true;
                    self.pending.extend(self.script.on_end());
                }
            }
        }
    }
}

/// 決定的な認識結果を生成する小さな状態機械（モックとローカルサーバで共用）
#[derive(Debug)]
pub(crate) struct EchoScript {
    final_every: usize,
    frames: usize,
    since_final: usize,
    segments: usize,
    speaking: bool,
}

impl EchoScript {
    pub(crate) fn new(final_every: usize) -> Self {
        Self {
            final_every: final_every.max(1),
            frames: 0,
            since_final: 0,
            segments: 0,
            speaking: false,
        }
    }

    pub(crate) fn on_audio(&mut self) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();
        if !self.speaking {
            self.speaking = true;
            events.push(TranscriptEvent::VoiceActivityBegin);
        }

        self.frames += 1;
        self.since_final += 1;
        events.push(TranscriptEvent::InterimTranscript {
            text: format!("chunk {}", self.frames),
            confidence: 0.5,
            result_end_offset: self.offset(),
        });

        if self.since_final >= self.final_every {
            events.push(self.finalize());
        }
        events
    }

    pub(crate) fn on_end(&mut self) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();
        if self.since_final > 0 {
            events.push(self.finalize());
        }
        if self.speaking {
            self.speaking = false;
            events.push(TranscriptEvent::VoiceActivityEnd);
        }
        events
    }

    fn finalize(&mut self) -> TranscriptEvent {
        self.segments += 1;
        let first = self.frames - self.since_final;
        let words = (first..self.frames)
            .map(|i| WordTiming {
                word: format!("w{}", i + 1),
                start: i as f64 * FRAME_SECONDS,
                end: (i + 1) as f64 * FRAME_SECONDS,
                confidence: 0.9,
            })
            .collect();
        let text = format!("segment {} ({} chunks)", self.segments, self.since_final);
        self.since_final = 0;
        TranscriptEvent::FinalTranscript {
            text,
            confidence: 0.9,
            result_end_offset: self.offset(),
            words,
        }
    }

    fn offset(&self) -> f64 {
        self.frames as f64 * FRAME_SECONDS
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::recognition::StreamConfig;

    fn config() -> StreamRequest {
        StreamRequest::Config(StreamConfig {
            recognizer: "recognizers/_".into(),
            language_codes: vec!["en-US".into()],
            model: "latest_long".into(),
            automatic_punctuation: true,
            profanity_filter: false,
            word_time_offsets: true,
            word_confidence: true,
            max_alternatives: 1,
            interim_results: true,
            voice_activity_events: true,
            speech_start_timeout_s: 30.0,
            speech_end_timeout_s: 6.0,
        })
    }

    fn requests(frames: usize) -> RequestStream {
        let mut list = vec![config()];
        list.extend((0..frames).map(|_| StreamRequest::Audio(Bytes::from_static(&[0; 4]))));
        Box::new(list.into_iter())
    }

    #[test]
    fn echo_emits_interims_then_final_per_segment() {
        let backend = MockRecognitionBackend::new(MockBehavior::Echo { final_every: 2 });
        let events: Vec<_> = backend
            .streaming_recognize(requests(3))
            .expect("stream")
            .collect::<Result<_, _>>()
            .expect("no error");

        let kinds: Vec<_> = events.iter().map(TranscriptEvent::kind).collect();
        assert_eq!(
            kinds,
            vec!["speech_start", "interim", "interim", "final", "interim", "final", "speech_end"]
        );
        assert!(backend.saw_config_first());
        assert_eq!(backend.frames_received(), 3);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn failing_backend_stops_after_error() {
        let backend = MockRecognitionBackend::failing_after(2);
        let results: Vec<_> = backend.streaming_recognize(requests(5)).expect("stream").collect();
        assert!(results.last().expect("some output").is_err());
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert_eq!(backend.frames_received(), 2);
    }
}
