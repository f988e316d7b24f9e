//! Error types for handshake and framing operations.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Protocol operation errors.
///
/// None of these are retried inside the library. Errors for which
/// [`Error::is_terminal`] returns `true` permanently invalidate the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The mechanism rejected the credential or the target.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed length prefix, oversized frame or token, or an invalid token.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer closed the transport mid-negotiation.
    #[error("Handshake aborted by peer")]
    HandshakeAborted,

    /// A signed frame failed its integrity check.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// A sealed frame could not be decrypted.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The negotiated mechanism cannot satisfy the requested protection.
    #[error("Capability unmet: {0}")]
    CapabilityUnmet(String),

    /// Misuse of the session (read before auth, double authenticate, use after failure).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A deadline elapsed before the pending operation completed.
    #[error("Operation timed out")]
    TimedOut,

    /// The pending operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Message protection primitive failed (key setup, sealing).
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl Error {
    /// Whether this error permanently invalidates the session it occurred on.
    ///
    /// Misuse, timeouts and cancellation of a data-phase read are not terminal: the session
    /// stays usable. A handshake that fails for any reason is terminal regardless.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidOperation(_) | Error::TimedOut | Error::Cancelled
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }
}
