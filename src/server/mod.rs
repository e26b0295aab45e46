use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::{BridgeContext, TranscriptionSession};
use crate::transport::WsClientTransport;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(std::io::Error),
    #[error("accept error: {0}")]
    Accept(std::io::Error),
}

/// 指定アドレスにバインドしてWSサーバを起動
pub async fn bind_and_run(bind_addr: &str, ws_path: &str, context: Arc<BridgeContext>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind_addr).await.map_err(ServerError::Bind)?;
    run_with_listener(listener, ws_path, context).await
}

/// 既存の`TcpListener`でWSサーバを起動（テストでも使用）
pub async fn run_with_listener(
    listener: TcpListener,
    ws_path: &str,
    context: Arc<BridgeContext>,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = ws_path, "WebSocket transcription server listening");
    }
    let ws_path: Arc<str> = Arc::from(ws_path);

    loop {
        let (stream, peer_addr) = listener.accept().await.map_err(ServerError::Accept)?;
        let context = context.clone();
        let ws_path = ws_path.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_ws_connection(stream, context, &ws_path, peer_addr).await {
                warn!(%peer_addr, error = %e, "connection handling failed");
            }
        });
    }
}

async fn handle_ws_connection<S>(
    stream: S,
    context: Arc<BridgeContext>,
    ws_path: &str,
    peer: SocketAddr,
) -> Result<(), String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // ハンドシェイク時にパスを検査し、対象外は404で拒否
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        if path_matches(req.uri().path(), ws_path) {
            Ok(resp)
        } else {
            Err(not_found())
        }
    })
    .await
    .map_err(|e| format!("websocket handshake failed: {e}"))?;

    let connection_id = Uuid::new_v4();
    info!(%peer, %connection_id, "accepted websocket connection");
    let session = TranscriptionSession::new(context, WsClientTransport::new(ws));
    let outcome = session.run().await;
    info!(
        %connection_id,
        session_id = outcome.session_id.as_deref().unwrap_or("-"),
        state = %outcome.final_state,
        "connection finished"
    );
    Ok(())
}

fn not_found() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("not found".to_string()));
    *resp.status_mut() = StatusCode::NOT_FOUND;
    resp
}

/// 末尾スラッシュの有無は区別しない
fn path_matches(path: &str, expected: &str) -> bool {
    path.trim_end_matches('/') == expected.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::auth::DevTokenVerifier;
    use crate::config::ConfigSet;
    use crate::metrics::BridgeMetrics;
    use crate::recognition::MockRecognitionBackend;

    #[test]
    fn test_path_matches() {
        assert!(path_matches("/ws/transcribe", "/ws/transcribe"));
        assert!(path_matches("/ws/transcribe/", "/ws/transcribe"));
        assert!(!path_matches("/ws", "/ws/transcribe"));
        assert!(!path_matches("/", "/ws/transcribe"));
    }

    fn context() -> Arc<BridgeContext> {
        let config = ConfigSet::load_from_dir("config").expect("config");
        Arc::new(BridgeContext::new(
            &config,
            Arc::new(MockRecognitionBackend::default()),
            Arc::new(DevTokenVerifier),
            BridgeMetrics::new().expect("metrics"),
        ))
    }

    #[tokio::test]
    #[ignore]
    async fn test_ws_server_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = run_with_listener(listener, "/ws/transcribe", context()).await;
        });

        let url = format!("ws://{}/ws/transcribe", addr);
        let (mut ws, _resp) = connect_async(url).await.expect("connect ok");
        ws.send(Message::Text(r#"{"token":"u1:a@example.com","session_id":"ws-1"}"#.into()))
            .await
            .expect("send init");

        match ws.next().await {
            Some(Ok(Message::Text(txt))) => {
                assert!(txt.contains("\"type\":\"ready\""));
                assert!(txt.contains("\"session_id\":\"ws-1\""));
            }
            other => panic!("expected ready message, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_ws_server_rejects_unknown_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = run_with_listener(listener, "/ws/transcribe", context()).await;
        });

        let url = format!("ws://{}/other", addr);
        assert!(connect_async(url).await.is_err());
    }
}
