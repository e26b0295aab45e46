use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::{ConfigSet, SessionSettings};
use crate::metrics::BridgeMetrics;
use crate::recognition::{FeatureSet, RecognitionBackend, StreamConfig, TranscriptEvent};

/// プロセス全体で共有し、各セッションへ注入する依存一式
pub struct BridgeContext {
    pub backend: Arc<dyn RecognitionBackend>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub stream_config: StreamConfig,
    pub settings: SessionSettings,
    pub metrics: BridgeMetrics,
}

impl BridgeContext {
    pub fn new(
        config: &ConfigSet,
        backend: Arc<dyn RecognitionBackend>,
        verifier: Arc<dyn TokenVerifier>,
        metrics: BridgeMetrics,
    ) -> Self {
        Self {
            backend,
            verifier,
            stream_config: StreamConfig::from(&config.recognition),
            settings: config.session.clone(),
            metrics,
        }
    }

    /// 認証成功時にクライアントへ送る `ready`
    pub(crate) fn ready_event(&self) -> TranscriptEvent {
        TranscriptEvent::Ready {
            format: self.settings.ready.clone(),
            features: FeatureSet {
                interim_results: self.stream_config.interim_results,
            },
        }
    }
}
