//! Error types for threshold-signature sessions

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session machine and the signing engines
///
/// Error payloads never carry partial key material; anything secret stays
/// inside the engine state that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-order round message, mismatched session, or a
    /// failed cryptographic check inside a round. Not resumable mid-round;
    /// the caller must restart the session.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Caller identity or wallet does not match the session record
    #[error("Session owner mismatch")]
    OwnershipMismatch,

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Mutation attempted on a session in a terminal state
    #[error("Session already finished")]
    SessionTerminal,

    /// Fewer distinct shares than the reconstruction threshold
    #[error("Insufficient shares: required {required}, got {actual}")]
    InsufficientShares { required: usize, actual: usize },

    /// Commit-reveal token did not match the stored commitment
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Session or commit-reveal record past its expiry; restart from commit
    #[error("Session expired")]
    Expired,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl Error {
    /// Whether the caller may retry without restarting the whole flow.
    ///
    /// Only `InsufficientShares` qualifies: more nodes may come online
    /// before expiry. Validation failures require a new flow and a
    /// `ProtocolViolation` requires a new session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::InsufficientShares { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
