use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend connection failed: {message}")]
    Connection { message: String },
    #[error("recognition stream failed: {message}")]
    Stream { message: String },
}

impl BackendError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }
}
