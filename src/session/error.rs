use thiserror::Error;

use crate::transport::CloseCode;

use super::ingest::IngestError;

/// クライアントへ通知されるセッションエラー
///
/// `IngestOverflow` 以外はちょうど1件のエラーイベントとして送られ、対応するクローズコードで切断します。
/// キュー溢れはメトリクスとログにのみ現れます。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{reason}")]
    Authentication { reason: String, required: bool },
    #[error("{reason}")]
    Protocol { reason: String },
    #[error("ingest queue full (capacity {capacity}); newest frame dropped")]
    IngestOverflow { capacity: usize },
    #[error("{message}")]
    UpstreamStream { message: String },
    #[error("recognition worker did not stop within {waited_ms} ms")]
    ShutdownTimeout { waited_ms: u64 },
}

impl SessionError {
    /// キュー溢れのみセッションエラーとして扱う（クローズ後の投入は無視）
    pub fn from_ingest(err: IngestError) -> Option<Self> {
        match err {
            IngestError::Overflow { capacity } => Some(SessionError::IngestOverflow { capacity }),
            IngestError::Closed => None,
        }
    }

    pub fn token_required() -> Self {
        Self::Authentication {
            reason: "Authentication token required in initialization message".into(),
            required: true,
        }
    }

    pub fn unauthorized() -> Self {
        Self::Authentication {
            reason: "Invalid or unauthorized token".into(),
            required: false,
        }
    }

    pub fn invalid_init() -> Self {
        Self::Protocol {
            reason: "Invalid initialization message format".into(),
        }
    }

    /// クライアントへ通知すべきか
    pub fn is_reported(&self) -> bool {
        !matches!(self, SessionError::IngestOverflow { .. })
    }

    pub fn close_code(&self) -> CloseCode {
        match self {
            SessionError::Authentication { .. } => CloseCode::AuthenticationFailed,
            SessionError::Protocol { .. } => CloseCode::ProtocolError,
            SessionError::IngestOverflow { .. } => CloseCode::Normal,
            SessionError::UpstreamStream { .. } => CloseCode::UpstreamFailure,
            SessionError::ShutdownTimeout { .. } => CloseCode::Normal,
        }
    }

    pub fn close_reason(&self) -> &'static str {
        match self {
            SessionError::Authentication { required: true, .. } => "Authentication required",
            SessionError::Authentication { required: false, .. } => "Authentication failed",
            SessionError::Protocol { .. } => "Invalid message format",
            SessionError::IngestOverflow { .. } => "Session ended",
            SessionError::UpstreamStream { .. } => "Recognition stream failed",
            SessionError::ShutdownTimeout { .. } => "Session closed",
        }
    }

    /// メトリクスのラベル
    pub fn label(&self) -> &'static str {
        match self {
            SessionError::Authentication { .. } => "authentication",
            SessionError::Protocol { .. } => "protocol",
            SessionError::IngestOverflow { .. } => "ingest_overflow",
            SessionError::UpstreamStream { .. } => "upstream",
            SessionError::ShutdownTimeout { .. } => "shutdown_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_distinguish_failure_classes() {
        assert_eq!(SessionError::token_required().close_code().as_u16(), 1008);
        assert_eq!(SessionError::unauthorized().close_code().as_u16(), 1008);
        assert_eq!(SessionError::invalid_init().close_code().as_u16(), 1003);
        let upstream = SessionError::UpstreamStream { message: "boom".into() };
        assert_eq!(upstream.close_code().as_u16(), 1011);
        assert_eq!(upstream.to_string(), "boom");
    }

    #[test]
    fn overflow_is_internal_only() {
        let err = SessionError::from_ingest(IngestError::Overflow { capacity: 5 }).expect("overflow");
        assert!(!err.is_reported());
        assert!(SessionError::unauthorized().is_reported());
        assert!(SessionError::from_ingest(IngestError::Closed).is_none());
    }

    #[test]
    fn auth_reasons_differ_between_missing_and_rejected() {
        assert_eq!(SessionError::token_required().close_reason(), "Authentication required");
        assert_eq!(SessionError::unauthorized().close_reason(), "Authentication failed");
        assert_eq!(SessionError::unauthorized().to_string(), "Invalid or unauthorized token");
    }
}
