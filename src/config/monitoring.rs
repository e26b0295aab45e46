use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub metrics: MetricsExporter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsExporter {
    pub scrape_path: String,
}
