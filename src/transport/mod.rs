//! クライアントトランスポート境界
//!
//! バイナリ音声フレームとJSON制御フレームを受け取り、JSONイベントを返す双方向チャネル。
//! WebSocket実装とテスト用のインメモリ実装を提供します。
mod error;
mod in_memory;
mod websocket;

use async_trait::async_trait;
use bytes::Bytes;

use crate::session::OutboundMessage;

pub use error::TransportError;
pub use in_memory::{ClientEndpoint, InMemoryTransport, ServerFrame};
pub use websocket::WsClientTransport;

/// クライアントから届くフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Binary(Bytes),
    Text(String),
    Close,
}

/// 切断理由ごとのクローズコード（再試行可否をクライアントが判別できるよう分ける）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    ProtocolError,
    AuthenticationFailed,
    UpstreamFailure,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::ProtocolError => 1003,
            CloseCode::AuthenticationFailed => 1008,
            CloseCode::UpstreamFailure => 1011,
        }
    }
}

#[async_trait]
pub trait ClientTransport: Send {
    /// 次のフレーム。`None` は切断。
    async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>>;

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError>;
}
