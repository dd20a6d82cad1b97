//! Security-specific error types.

use thiserror::Error;

/// Errors raised by authenticators, policy providers and the composite.
///
/// Masking and template rendering are total and never produce an error.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// No valid credential was presented (missing header, bad or expired token,
    /// unknown session).
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Login credentials did not match.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The security layer was wired incorrectly. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A column or row policy could not be loaded.
    ///
    /// The enforcement layer recovers from this by treating the lookup as
    /// unrestricted; it is only ever logged.
    #[error("policy load failure: {0}")]
    PolicyLoad(String),

    /// Storage error in a session or policy store.
    #[error("storage error: {0}")]
    Storage(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Token could not be issued or verified.
    #[error("token error: {0}")]
    Token(String),
}

impl SecurityError {
    /// Whether this error means the caller is not (or could not be) authenticated.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SecurityError::Unauthenticated(_) | SecurityError::InvalidCredentials(_)
        )
    }
}

impl From<sled::Error> for SecurityError {
    fn from(err: sled::Error) -> Self {
        SecurityError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SecurityError {
    fn from(err: serde_json::Error) -> Self {
        SecurityError::Serialization(err.to_string())
    }
}

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;
