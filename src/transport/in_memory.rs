use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::session::OutboundMessage;

use super::{ClientFrame, ClientTransport, CloseCode, TransportError};

/// サーバからクライアントへ届いたもの
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Message(Value),
    Closed { code: u16, reason: String },
}

/// プロセス内で完結するトランスポート（テストや組み込み用途）
#[derive(Debug)]
pub struct InMemoryTransport {
    inbound: mpsc::UnboundedReceiver<ClientFrame>,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    closed: bool,
}

/// `InMemoryTransport` の相手側（クライアント役）
#[derive(Debug)]
pub struct ClientEndpoint {
    inbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    outbound: mpsc::UnboundedReceiver<ServerFrame>,
}

impl InMemoryTransport {
    pub fn pair() -> (InMemoryTransport, ClientEndpoint) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            InMemoryTransport {
                inbound: in_rx,
                outbound: out_tx,
                closed: false,
            },
            ClientEndpoint {
                inbound: Some(in_tx),
                outbound: out_rx,
            },
        )
    }
}

#[async_trait]
impl ClientTransport for InMemoryTransport {
    async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let value = serde_json::to_value(message)?;
        self.outbound
            .send(ServerFrame::Message(value))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        self.inbound.close();
        self.outbound
            .send(ServerFrame::Closed {
                code: code.as_u16(),
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }
}

impl ClientEndpoint {
    /// 送信できたか（サーバ側がクローズ済みなら false）
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.push(ClientFrame::Binary(data.into()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(ClientFrame::Text(text.into()))
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.push(ClientFrame::Text(value.to_string()))
    }

    /// クローズフレームを送らずに切断する
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    pub async fn next_frame(&mut self) -> Option<ServerFrame> {
        self.outbound.recv().await
    }

    /// サーバがクローズするまでメッセージを集める
    pub async fn collect_until_closed(&mut self) -> (Vec<Value>, Option<(u16, String)>) {
        let mut messages = Vec::new();
        while let Some(frame) = self.outbound.recv().await {
            match frame {
                ServerFrame::Message(value) => messages.push(value),
                ServerFrame::Closed { code, reason } => return (messages, Some((code, reason))),
            }
        }
        (messages, None)
    }

    fn push(&self, frame: ClientFrame) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}
