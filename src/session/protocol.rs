//! クライアントとのJSONメッセージ
//!
//! 受信: 初期化メッセージ、制御メッセージ（`stop` / base64 の `audio`）
//! 送信: `ready` / `transcript` / `speech_event` / `error`
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::recognition::{TranscriptEvent, WordTiming};

/// 接続直後に届く初期化メッセージ
#[derive(Debug, Clone, Deserialize)]
pub struct InitMessage {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// クライアント側の設定（内容は解釈しない）
    #[serde(default)]
    pub config: Option<Value>,
}

impl InitMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// 空文字は未指定として扱う
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// ストリーミング中のテキストフレーム
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Stop,
    Audio { data: String },
}

impl ControlMessage {
    /// 解釈できないものは `None`（無視する）
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

pub fn decode_audio(data: &str) -> Result<Bytes, base64::DecodeError> {
    STANDARD.decode(data).map(Bytes::from)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ready {
        session_id: String,
        timestamp: String,
        config: ReadyConfig,
    },
    Transcript {
        transcript: String,
        confidence: f32,
        is_final: bool,
        timestamp: String,
        result_end_offset: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        words: Option<Vec<WordEntry>>,
    },
    SpeechEvent {
        event: SpeechEventKind,
        timestamp: String,
    },
    Error {
        error: String,
        timestamp: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyConfig {
    pub sample_rate: u32,
    pub encoding: String,
    pub chunk_duration_ms: u32,
    pub features: ReadyFeatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadyFeatures {
    pub interim_results: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechEventKind {
    SpeechStart,
    SpeechEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordEntry {
    pub word: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f32,
}

impl From<WordTiming> for WordEntry {
    fn from(w: WordTiming) -> Self {
        Self {
            word: w.word,
            start_time: w.start,
            end_time: w.end,
            confidence: w.confidence,
        }
    }
}

impl OutboundMessage {
    /// イベントをクライアント向けメッセージへ変換
    pub fn from_event(event: TranscriptEvent, session_id: &str, timestamp: String) -> Self {
        match event {
            TranscriptEvent::Ready { format, features } => OutboundMessage::Ready {
                session_id: session_id.to_string(),
                timestamp,
                config: ReadyConfig {
                    sample_rate: format.sample_rate_hz,
                    encoding: format.encoding,
                    chunk_duration_ms: format.chunk_duration_ms,
                    features: ReadyFeatures {
                        interim_results: features.interim_results,
                    },
                },
            },
            TranscriptEvent::InterimTranscript {
                text,
                confidence,
                result_end_offset,
            } => OutboundMessage::Transcript {
                transcript: text,
                confidence,
                is_final: false,
                timestamp,
                result_end_offset,
                words: None,
            },
            TranscriptEvent::FinalTranscript {
                text,
                confidence,
                result_end_offset,
                words,
            } => OutboundMessage::Transcript {
                transcript: text,
                confidence,
                is_final: true,
                timestamp,
                result_end_offset,
                words: (!words.is_empty()).then(|| words.into_iter().map(WordEntry::from).collect()),
            },
            TranscriptEvent::VoiceActivityBegin => OutboundMessage::SpeechEvent {
                event: SpeechEventKind::SpeechStart,
                timestamp,
            },
            TranscriptEvent::VoiceActivityEnd => OutboundMessage::SpeechEvent {
                event: SpeechEventKind::SpeechEnd,
                timestamp,
            },
            TranscriptEvent::Error { message } => OutboundMessage::error(message, timestamp),
        }
    }

    pub fn error(message: impl Into<String>, timestamp: String) -> Self {
        OutboundMessage::Error {
            error: message.into(),
            timestamp,
        }
    }
}

/// ローカル時刻のISO 8601文字列（タイムゾーンなし、マイクロ秒まで）
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// 初期化メッセージにIDが無いときのセッションID
pub fn default_session_id() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::AudioFormat;
    use crate::recognition::FeatureSet;

    const TS: &str = "2024-05-01T10:00:00.000000";

    fn render(event: TranscriptEvent) -> Value {
        serde_json::to_value(OutboundMessage::from_event(event, "s-1", TS.into())).expect("serialize")
    }

    #[test]
    fn ready_message_shape() {
        let value = render(TranscriptEvent::Ready {
            format: AudioFormat {
                sample_rate_hz: 48000,
                encoding: "WEBM_OPUS".into(),
                chunk_duration_ms: 100,
            },
            features: FeatureSet { interim_results: true },
        });
        assert_eq!(
            value,
            json!({
                "type": "ready",
                "session_id": "s-1",
                "timestamp": TS,
                "config": {
                    "sample_rate": 48000,
                    "encoding": "WEBM_OPUS",
                    "chunk_duration_ms": 100,
                    "features": { "interim_results": true }
                }
            })
        );
    }

    #[test]
    fn interim_transcript_has_no_words() {
        let value = render(TranscriptEvent::InterimTranscript {
            text: "hel".into(),
            confidence: 0.5,
            result_end_offset: 1.5,
        });
        assert_eq!(value["type"], "transcript");
        assert_eq!(value["is_final"], false);
        assert_eq!(value["result_end_offset"], 1.5);
        assert!(value.get("words").is_none());
    }

    #[test]
    fn final_transcript_carries_word_timings() {
        let value = render(TranscriptEvent::FinalTranscript {
            text: "hello".into(),
            confidence: 0.5,
            result_end_offset: 2.0,
            words: vec![WordTiming {
                word: "hello".into(),
                start: 0.25,
                end: 0.75,
                confidence: 0.5,
            }],
        });
        assert_eq!(value["is_final"], true);
        assert_eq!(
            value["words"],
            json!([{ "word": "hello", "start_time": 0.25, "end_time": 0.75, "confidence": 0.5 }])
        );
    }

    #[test]
    fn speech_events_and_errors() {
        assert_eq!(
            render(TranscriptEvent::VoiceActivityBegin),
            json!({ "type": "speech_event", "event": "speech_start", "timestamp": TS })
        );
        assert_eq!(render(TranscriptEvent::VoiceActivityEnd)["event"], "speech_end");
        assert_eq!(
            render(TranscriptEvent::Error { message: "boom".into() }),
            json!({ "type": "error", "error": "boom", "timestamp": TS })
        );
    }

    #[test]
    fn init_message_parsing() {
        let init = InitMessage::parse(r#"{"token":"u:a@b.c","session_id":"abc","config":{"x":1}}"#)
            .expect("valid");
        assert_eq!(init.token(), Some("u:a@b.c"));
        assert_eq!(init.session_id.as_deref(), Some("abc"));
        assert_eq!(init.config, Some(json!({ "x": 1 })));

        assert_eq!(InitMessage::parse(r#"{"token":""}"#).expect("valid").token(), None);
        assert!(InitMessage::parse(r#"{}"#).expect("valid").token().is_none());
        assert!(InitMessage::parse("not json").is_none());
        assert!(InitMessage::parse("[1,2]").is_none());
    }

    #[test]
    fn control_message_parsing() {
        assert_eq!(ControlMessage::parse(r#"{"type":"stop"}"#), Some(ControlMessage::Stop));
        assert_eq!(
            ControlMessage::parse(r#"{"type":"audio","data":"AAEC"}"#),
            Some(ControlMessage::Audio { data: "AAEC".into() })
        );
        assert_eq!(ControlMessage::parse(r#"{"type":"audio"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"pause"}"#), None);
        assert_eq!(ControlMessage::parse("garbage"), None);
    }

    #[test]
    fn audio_payload_is_standard_base64() {
        assert_eq!(decode_audio("AAEC").expect("decode"), Bytes::from_static(&[0, 1, 2]));
        assert!(decode_audio("***").is_err());
    }

    #[test]
    fn default_session_id_is_timestamp_shaped() {
        let id = default_session_id();
        assert_eq!(id.len(), "20240501-100000".len());
        assert_eq!(id.as_bytes()[8], b'-');
    }
}
