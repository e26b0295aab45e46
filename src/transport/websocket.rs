use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

use crate::session::OutboundMessage;

use super::{ClientFrame, ClientTransport, CloseCode, TransportError};

/// WebSocket上のクライアントトランスポート
pub struct WsClientTransport<S> {
    ws: WebSocketStream<S>,
}

impl<S> WsClientTransport<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl<S> ClientTransport for WsClientTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(ClientFrame::Binary(Bytes::from(data)))),
                Ok(Message::Text(text)) => return Some(Ok(ClientFrame::Text(text))),
                Ok(Message::Close(_)) => return Some(Ok(ClientFrame::Close)),
                // ping/pong はtungstenite側で応答済み
                Ok(other) => trace!(kind = ?other, "control frame skipped"),
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(message)?;
        self.ws
            .send(Message::Text(json))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: reason.to_string().into(),
        };
        self.ws
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
