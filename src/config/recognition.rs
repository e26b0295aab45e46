//! 認識バックエンド設定
use std::time::Duration;

use serde::Deserialize;

/// 認識サービス、モデル、機能フラグ、ストリーミング設定
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    pub service: ServiceConfig,
    pub model: ModelConfig,
    pub features: FeatureConfig,
    pub streaming: StreamingConfig,
}

impl RecognitionConfig {
    /// 発話開始までの待ち時間
    pub fn speech_start_timeout(&self) -> Duration {
        Duration::from_secs(self.streaming.speech_start_timeout_s)
    }

    /// 発話終了とみなす無音時間
    pub fn speech_end_timeout(&self) -> Duration {
        Duration::from_secs(self.streaming.speech_end_timeout_s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub recognizer: String,
    pub max_pending_requests: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub language_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    pub automatic_punctuation: bool,
    pub profanity_filter: bool,
    pub word_time_offsets: bool,
    pub word_confidence: bool,
    pub max_alternatives: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    pub interim_results: bool,
    pub voice_activity_events: bool,
    pub speech_start_timeout_s: u64,
    pub speech_end_timeout_s: u64,
}
