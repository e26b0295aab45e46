use std::collections::VecDeque;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;

use super::backend::{RecognitionBackend, RequestStream, ResponseStream};
use super::error::BackendError;
use super::event::{TranscriptEvent, WordTiming};
use super::request::{StreamConfig, StreamRequest};

// 生成されたgRPCコード
pub mod proto {
    tonic::include_proto!("recognition");
}

use proto::recognizer_client::RecognizerClient;
use proto::streaming_recognize_response::SpeechEventType;

/// gRPCベースの認識バックエンド
///
/// チャネルは起動時に一度だけ作成し、全セッションで共有します（clone は安価）。
/// ブロッキングな `streaming_recognize` は保持しているランタイムハンドル上で
/// 非同期RPCを駆動します。
pub struct GrpcRecognitionBackend {
    endpoint: String,
    channel: Channel,
    runtime: Handle,
    max_pending_requests: usize,
}

impl GrpcRecognitionBackend {
    /// 遅延接続のチャネルを作成（tokioランタイム内で呼び出すこと）
    pub fn connect_lazy(config: &RecognitionConfig) -> Result<Self, BackendError> {
        let endpoint = config.service.endpoint.clone();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| BackendError::connection(format!("invalid endpoint {endpoint}: {e}")))?
            .connect_lazy();
        let runtime = Handle::try_current()
            .map_err(|e| BackendError::connection(format!("no tokio runtime: {e}")))?;

        info!(endpoint = %endpoint, "recognition gRPC channel prepared");
        Ok(Self {
            endpoint,
            channel,
            runtime,
            max_pending_requests: config.service.max_pending_requests.max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RecognitionBackend for GrpcRecognitionBackend {
    fn name(&self) -> &str {
        "grpc"
    }

    fn streaming_recognize(&self, requests: RequestStream) -> Result<ResponseStream, BackendError> {
        // リクエスト列の引き込みはブロッキングプールで行い、RPCの送信ペースに合わせる。
        // 音声は RPC が開いてから引き込む（開けなかった音声は転送済みに数えない）。
        let (request_tx, request_rx) =
            mpsc::channel::<proto::StreamingRecognizeRequest>(self.max_pending_requests);
        let (opened_tx, opened_rx) = oneshot::channel::<bool>();
        self.runtime.spawn_blocking(move || {
            let mut requests = requests;
            if let Some(first) = requests.next() {
                if request_tx.blocking_send(first.into()).is_err() {
                    return;
                }
            }
            if !matches!(opened_rx.blocking_recv(), Ok(true)) {
                debug!("recognition stream did not open; request pump stopped");
                return;
            }
            for request in requests {
                if request_tx.blocking_send(request.into()).is_err() {
                    debug!("request channel closed; stopping request pump");
                    break;
                }
            }
        });

        let mut client = RecognizerClient::new(self.channel.clone());
        let opened = self
            .runtime
            .block_on(client.streaming_recognize(ReceiverStream::new(request_rx)));
        let _ = opened_tx.send(opened.is_ok());
        let response =
            opened.map_err(|status| BackendError::stream(format!("failed to open stream: {status}")))?;

        Ok(Box::new(GrpcResponseStream {
            runtime: self.runtime.clone(),
            inner: response.into_inner(),
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

/// gRPC応答ストリームをブロッキングなイテレータとして公開
struct GrpcResponseStream {
    runtime: Handle,
    inner: Streaming<proto::StreamingRecognizeResponse>,
    pending: VecDeque<TranscriptEvent>,
    done: bool,
}

impl Iterator for GrpcResponseStream {
    type Item = Result<TranscriptEvent, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            match self.runtime.block_on(self.inner.message()) {
                Ok(Some(response)) => self.pending.extend(classify(response)),
                Ok(None) => {
                    self.done = true;
                }
                Err(status) => {
                    warn!(code = ?status.code(), message = %status.message(), "recognition stream error");
                    self.done = true;
                    return Some(Err(BackendError::stream(status.to_string())));
                }
            }
        }
    }
}

/// 応答1件をイベント列へ分類（結果→音声区間イベントの順）
pub(crate) fn classify(response: proto::StreamingRecognizeResponse) -> Vec<TranscriptEvent> {
    let speech_event = response.speech_event_type();
    let mut events = Vec::new();

    for result in response.results {
        let is_final = result.is_final;
        let offset = result.result_end_offset_s;
        for alternative in result.alternatives {
            let event = if is_final {
                TranscriptEvent::FinalTranscript {
                    text: alternative.transcript,
                    confidence: alternative.confidence,
                    result_end_offset: offset,
                    words: alternative.words.into_iter().map(WordTiming::from).collect(),
                }
            } else {
                TranscriptEvent::InterimTranscript {
                    text: alternative.transcript,
                    confidence: alternative.confidence,
                    result_end_offset: offset,
                }
            };
            events.push(event);
        }
    }

    match speech_event {
        SpeechEventType::SpeechActivityBegin => events.push(TranscriptEvent::VoiceActivityBegin),
        SpeechEventType::SpeechActivityEnd => events.push(TranscriptEvent::VoiceActivityEnd),
        SpeechEventType::Unspecified => {}
    }
    events
}

/// イベントをワイヤ形式へ戻す（ローカルサーバ用）。Ready/Error は応答として表現しない。
pub(crate) fn to_response(event: TranscriptEvent) -> Option<proto::StreamingRecognizeResponse> {
    let (results, speech_event) = match event {
        TranscriptEvent::InterimTranscript {
            text,
            confidence,
            result_end_offset,
        } => (
            vec![proto::StreamingRecognitionResult {
                alternatives: vec![proto::SpeechRecognitionAlternative {
                    transcript: text,
                    confidence,
                    words: Vec::new(),
                }],
                is_final: false,
                result_end_offset_s: result_end_offset,
            }],
            SpeechEventType::Unspecified,
        ),
        TranscriptEvent::FinalTranscript {
            text,
            confidence,
            result_end_offset,
            words,
        } => (
            vec![proto::StreamingRecognitionResult {
                alternatives: vec![proto::SpeechRecognitionAlternative {
                    transcript: text,
                    confidence,
                    words: words.into_iter().map(proto::WordInfo::from).collect(),
                }],
                is_final: true,
                result_end_offset_s: result_end_offset,
            }],
            SpeechEventType::Unspecified,
        ),
        TranscriptEvent::VoiceActivityBegin => (Vec::new(), SpeechEventType::SpeechActivityBegin),
        TranscriptEvent::VoiceActivityEnd => (Vec::new(), SpeechEventType::SpeechActivityEnd),
        TranscriptEvent::Ready { .. } | TranscriptEvent::Error { .. } => return None,
    };

    Some(proto::StreamingRecognizeResponse {
        results,
        speech_event_type: speech_event as i32,
    })
}

impl From<StreamRequest> for proto::StreamingRecognizeRequest {
    fn from(request: StreamRequest) -> Self {
        use proto::streaming_recognize_request::Request;

        match request {
            StreamRequest::Config(config) => Self {
                recognizer: config.recognizer.clone(),
                request: Some(Request::StreamingConfig(config.into())),
            },
            StreamRequest::Audio(bytes) => Self {
                recognizer: String::new(),
                request: Some(Request::Audio(bytes.to_vec())),
            },
        }
    }
}

impl From<StreamConfig> for proto::StreamingConfig {
    fn from(config: StreamConfig) -> Self {
        Self {
            language_codes: config.language_codes,
            model: config.model,
            features: Some(proto::RecognitionFeatures {
                enable_automatic_punctuation: config.automatic_punctuation,
                profanity_filter: config.profanity_filter,
                enable_word_time_offsets: config.word_time_offsets,
                enable_word_confidence: config.word_confidence,
                max_alternatives: config.max_alternatives as i32,
            }),
            streaming_features: Some(proto::StreamingFeatures {
                interim_results: config.interim_results,
                enable_voice_activity_events: config.voice_activity_events,
                speech_start_timeout_s: config.speech_start_timeout_s,
                speech_end_timeout_s: config.speech_end_timeout_s,
            }),
        }
    }
}

impl From<proto::WordInfo> for WordTiming {
    fn from(word: proto::WordInfo) -> Self {
        Self {
            word: word.word,
            start: word.start_offset_s,
            end: word.end_offset_s,
            confidence: word.confidence,
        }
    }
}

impl From<WordTiming> for proto::WordInfo {
    fn from(word: WordTiming) -> Self {
        Self {
            word: word.word,
            start_offset_s: word.start,
            end_offset_s: word.end,
            confidence: word.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn alternative(text: &str, words: Vec<proto::WordInfo>) -> proto::SpeechRecognitionAlternative {
        proto::SpeechRecognitionAlternative {
            transcript: text.to_string(),
            confidence: 0.8,
            words,
        }
    }

    #[test]
    fn interim_result_drops_word_timing() {
        let response = proto::StreamingRecognizeResponse {
            results: vec![proto::StreamingRecognitionResult {
                alternatives: vec![alternative(
                    "hello",
                    vec![proto::WordInfo {
                        word: "hello".into(),
                        start_offset_s: 0.0,
                        end_offset_s: 0.4,
                        confidence: 0.9,
                    }],
                )],
                is_final: false,
                result_end_offset_s: 0.4,
            }],
            speech_event_type: SpeechEventType::Unspecified as i32,
        };

        let events = classify(response);
        assert_eq!(
            events,
            vec![TranscriptEvent::InterimTranscript {
                text: "hello".into(),
                confidence: 0.8,
                result_end_offset: 0.4,
            }]
        );
    }

    #[test]
    fn final_result_keeps_words_and_speech_event_comes_last() {
        let response = proto::StreamingRecognizeResponse {
            results: vec![proto::StreamingRecognitionResult {
                alternatives: vec![alternative(
                    "hi there",
                    vec![
                        proto::WordInfo { word: "hi".into(), start_offset_s: 0.0, end_offset_s: 0.2, confidence: 0.9 },
                        proto::WordInfo { word: "there".into(), start_offset_s: 0.2, end_offset_s: 0.5, confidence: 0.7 },
                    ],
                )],
                is_final: true,
                result_end_offset_s: 0.5,
            }],
            speech_event_type: SpeechEventType::SpeechActivityEnd as i32,
        };

        let events = classify(response);
        assert_eq!(events.len(), 2);
        match &events[0] {
            TranscriptEvent::FinalTranscript { words, result_end_offset, .. } => {
                assert_eq!(words.len(), 2);
                assert_eq!(words[1].word, "there");
                assert_eq!(*result_end_offset, 0.5);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1], TranscriptEvent::VoiceActivityEnd);
    }

    #[test]
    fn speech_begin_without_results() {
        let response = proto::StreamingRecognizeResponse {
            results: Vec::new(),
            speech_event_type: SpeechEventType::SpeechActivityBegin as i32,
        };
        assert_eq!(classify(response), vec![TranscriptEvent::VoiceActivityBegin]);
    }

    #[test]
    fn wire_round_trip_preserves_final_event() {
        let event = TranscriptEvent::FinalTranscript {
            text: "done".into(),
            confidence: 0.9,
            result_end_offset: 1.5,
            words: vec![WordTiming { word: "done".into(), start: 1.0, end: 1.5, confidence: 0.9 }],
        };
        let response = to_response(event.clone()).expect("representable");
        assert_eq!(classify(response), vec![event]);
        assert!(to_response(TranscriptEvent::Error { message: "x".into() }).is_none());
    }

    #[test]
    fn config_request_carries_recognizer_and_features() {
        let config = StreamConfig {
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
        };
        let message: proto::StreamingRecognizeRequest = StreamRequest::Config(config).into();
        assert_eq!(message.recognizer, "recognizers/_");
        match message.request {
            Some(proto::streaming_recognize_request::Request::StreamingConfig(cfg)) => {
                assert_eq!(cfg.model, "latest_long");
                let streaming = cfg.streaming_features.expect("streaming features");
                assert!(streaming.interim_results);
                assert_eq!(streaming.speech_end_timeout_s, 6.0);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn audio_is_not_pulled_when_stream_fails_to_open() {
        let mut cfg: RecognitionConfig =
            serde_yaml::from_str(include_str!("../../config/recognition.yaml")).expect("recognition.yaml");
        cfg.service.endpoint = "http://127.0.0.1:1".into();
        let backend = GrpcRecognitionBackend::connect_lazy(&cfg).expect("lazy channel");

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let audio = std::iter::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            StreamRequest::Audio(Bytes::from_static(&[0; 4]))
        })
        .take(64);
        let requests: RequestStream =
            Box::new(std::iter::once(StreamRequest::Config(StreamConfig::from(&cfg))).chain(audio));

        let result = tokio::task::spawn_blocking(move || backend.streaming_recognize(requests).map(|_| ()))
            .await
            .expect("blocking task");
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), 0);
    }
}
