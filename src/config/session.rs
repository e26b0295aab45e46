//! セッション（ブリッジ）の動作パラメータ
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// 音声インジェストキューの容量（フレーム数）
    pub ingest_capacity: usize,
    /// ワーカーがキューを待つ最大時間
    pub take_timeout_ms: u64,
    /// 停止時にワーカー終了を待つ上限
    pub join_timeout_ms: u64,
    /// クライアントへ通知する音声フォーマット
    pub ready: AudioFormat,
}

impl SessionSettings {
    pub fn take_timeout(&self) -> Duration {
        Duration::from_millis(self.take_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub encoding: String,
    pub chunk_duration_ms: u32,
}
