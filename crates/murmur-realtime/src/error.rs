use crate::session::SessionState;
use murmur_types::EncodeError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend rejected the handshake. Retrying with the same token is pointless.
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
    #[error("auth token must not be empty")]
    EmptyToken,
    #[error("operation not valid while {0}")]
    InvalidState(SessionState),
    #[error("session is closed")]
    Closed,
    #[error("connection attempt was cancelled")]
    Cancelled,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Auth(_) | SessionError::RetryExhausted { .. } | SessionError::Closed
        )
    }
}
