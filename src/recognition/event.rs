//! クライアントへ向かうイベントの分類
//!
//! バックエンド応答の「あるかもしれない属性」を参照側で確認するのではなく、
//! バリアントごとに必要なフィールドを持たせます。単語タイミングを持つのは最終結果のみ。
use crate::config::AudioFormat;

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    Ready {
        format: AudioFormat,
        features: FeatureSet,
    },
    InterimTranscript {
        text: String,
        confidence: f32,
        result_end_offset: f64,
    },
    FinalTranscript {
        text: String,
        confidence: f32,
        result_end_offset: f64,
        words: Vec<WordTiming>,
    },
    VoiceActivityBegin,
    VoiceActivityEnd,
    Error {
        message: String,
    },
}

impl TranscriptEvent {
    /// メトリクスやログ用の種別名
    pub fn kind(&self) -> &'static str {
        match self {
            TranscriptEvent::Ready { .. } => "ready",
            TranscriptEvent::InterimTranscript { .. } => "interim",
            TranscriptEvent::FinalTranscript { .. } => "final",
            TranscriptEvent::VoiceActivityBegin => "speech_start",
            TranscriptEvent::VoiceActivityEnd => "speech_end",
            TranscriptEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSet {
    pub interim_results: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}
