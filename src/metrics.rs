//! Prometheus メトリクス
//!
//! プロセスごとに1つのレジストリを持ち、HTTP API の scrape パスで公開します。
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Registry,
    pub sessions_active: IntGauge,
    pub sessions_closed: IntCounterVec,
    pub audio_frames_forwarded: IntCounter,
    pub audio_frames_dropped: IntCounter,
    pub upstream_errors: IntCounter,
    pub shutdown_timeouts: IntCounter,
    pub events_relayed: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("transcription_bridge".to_string()), None)?;

        let sessions_active = IntGauge::new("sessions_active", "currently running sessions")?;
        let sessions_closed = IntCounterVec::new(
            Opts::new("sessions_closed_total", "sessions closed, by outcome"),
            &["outcome"],
        )?;
        let audio_frames_forwarded = IntCounter::new(
            "audio_frames_forwarded_total",
            "audio frames handed to the recognition backend",
        )?;
        let audio_frames_dropped = IntCounter::new(
            "audio_frames_dropped_total",
            "audio frames dropped because the ingest queue was full",
        )?;
        let upstream_errors = IntCounter::new(
            "upstream_errors_total",
            "recognition streams that ended with an error",
        )?;
        let shutdown_timeouts = IntCounter::new(
            "shutdown_timeouts_total",
            "recognition workers abandoned after the join timeout",
        )?;
        let events_relayed = IntCounterVec::new(
            Opts::new("events_relayed_total", "events delivered to clients, by kind"),
            &["kind"],
        )?;

        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(sessions_closed.clone()))?;
        registry.register(Box::new(audio_frames_forwarded.clone()))?;
        registry.register(Box::new(audio_frames_dropped.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(shutdown_timeouts.clone()))?;
        registry.register(Box::new(events_relayed.clone()))?;
        #[cfg(target_os = "linux")]
        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(Self {
            registry,
            sessions_active,
            sessions_closed,
            audio_frames_forwarded,
            audio_frames_dropped,
            upstream_errors,
            shutdown_timeouts,
            events_relayed,
        })
    }

    /// テキスト形式で出力
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_registered_families() {
        let metrics = BridgeMetrics::new().expect("metrics");
        metrics.audio_frames_dropped.inc();
        metrics.sessions_closed.with_label_values(&["closed"]).inc();

        let text = metrics.render().expect("render");
        assert!(text.contains("transcription_bridge_audio_frames_dropped_total 1"));
        assert!(text.contains("transcription_bridge_sessions_closed_total{outcome=\"closed\"} 1"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn render_includes_process_metrics() {
        let text = BridgeMetrics::new().expect("metrics").render().expect("render");
        assert!(text.contains("process_resident_memory_bytes"));
    }
}
