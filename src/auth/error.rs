use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed: {reason}")]
    Invalid { reason: String },
    #[error("identity not authorized: {email}")]
    NotAuthorized { email: String },
}

impl AuthError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}
