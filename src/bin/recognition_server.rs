use std::net::SocketAddr;

use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use transcription_bridge::config::ConfigSet;
use transcription_bridge::recognition::server::{into_server_service, LocalRecognitionService};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cfg = match ConfigSet::load_from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    let bind = match cfg.server.recognition_bind_addr.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, addr = %cfg.server.recognition_bind_addr, "invalid recognition_bind_addr");
            std::process::exit(1);
        }
    };
    info!(addr = %bind, "starting local recognition gRPC server");

    let listener = match tokio::net::TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "bind failed");
            std::process::exit(1);
        }
    };
    let incoming = TcpListenerStream::new(listener);

    let svc = into_server_service(LocalRecognitionService::default());
    if let Err(e) = Server::builder().add_service(svc).serve_with_incoming(incoming).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
