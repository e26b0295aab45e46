use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("client transport already closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}
