use bytes::Bytes;

use crate::config::RecognitionConfig;

/// バックエンドへ送る1フレーム。先頭は必ず `Config`。
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRequest {
    Config(StreamConfig),
    Audio(Bytes),
}

/// ストリーム設定フレーム（言語、モデル、機能フラグ、発話検出タイムアウト）
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub recognizer: String,
    pub language_codes: Vec<String>,
    pub model: String,
    pub automatic_punctuation: bool,
    pub profanity_filter: bool,
    pub word_time_offsets: bool,
    pub word_confidence: bool,
    pub max_alternatives: u32,
    pub interim_results: bool,
    pub voice_activity_events: bool,
    pub speech_start_timeout_s: f64,
    pub speech_end_timeout_s: f64,
}

impl From<&RecognitionConfig> for StreamConfig {
    fn from(cfg: &RecognitionConfig) -> Self {
        Self {
            recognizer: cfg.service.recognizer.clone(),
            language_codes: cfg.model.language_codes.clone(),
            model: cfg.model.name.clone(),
            automatic_punctuation: cfg.features.automatic_punctuation,
            profanity_filter: cfg.features.profanity_filter,
            word_time_offsets: cfg.features.word_time_offsets,
            word_confidence: cfg.features.word_confidence,
            max_alternatives: cfg.features.max_alternatives,
            interim_results: cfg.streaming.interim_results,
            voice_activity_events: cfg.streaming.voice_activity_events,
            speech_start_timeout_s: cfg.speech_start_timeout().as_secs_f64(),
            speech_end_timeout_s: cfg.speech_end_timeout().as_secs_f64(),
        }
    }
}
