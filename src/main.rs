use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use transcription_bridge::auth::{AllowlistPolicy, AllowlistVerifier, DevTokenVerifier, TokenVerifier};
use transcription_bridge::config::ConfigSet;
use transcription_bridge::http_api;
use transcription_bridge::metrics::BridgeMetrics;
use transcription_bridge::recognition::GrpcRecognitionBackend;
use transcription_bridge::server;
use transcription_bridge::session::BridgeContext;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match ConfigSet::load_from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = ?err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    info!(root = ?config.root(), "configuration loaded");

    // gRPCチャネルはプロセスで1つだけ作り、全セッションで共有する
    let backend = match GrpcRecognitionBackend::connect_lazy(&config.recognition) {
        Ok(backend) => backend,
        Err(err) => {
            error!(error = %err, "failed to prepare recognition backend");
            std::process::exit(1);
        }
    };
    info!(endpoint = backend.endpoint(), "recognition backend prepared");

    let policy = AllowlistPolicy::from_config(&config.auth);
    let verifier = AllowlistVerifier::new(DevTokenVerifier, policy);
    if !verifier.checks_signature() {
        warn!("development token verifier active: token signatures are NOT checked");
    }

    let metrics = match BridgeMetrics::new() {
        Ok(metrics) => metrics,
        Err(err) => {
            error!(error = %err, "failed to register metrics");
            std::process::exit(1);
        }
    };

    let context = Arc::new(BridgeContext::new(&config, Arc::new(backend), Arc::new(verifier), metrics));

    let ws_addr = config.server.ws_bind_addr.clone();
    let ws_path = config.server.ws_path.clone();
    let http_addr = config.server.http_bind_addr.clone();
    let scrape_path = config.monitoring.metrics.scrape_path.clone();
    info!(ws = %ws_addr, http = %http_addr, "starting servers");

    tokio::select! {
        result = server::bind_and_run(&ws_addr, &ws_path, context.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "websocket server stopped");
                std::process::exit(1);
            }
        }
        result = http_api::serve_http(&http_addr, context.clone(), &scrape_path) => {
            if let Err(e) = result {
                error!(error = %e, "http api stopped");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}
