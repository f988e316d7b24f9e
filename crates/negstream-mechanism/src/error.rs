//! Error types for the simulated mechanisms.

use thiserror::Error;

/// Result type alias for mechanism internals.
pub type Result<T> = core::result::Result<T, Error>;

/// Mechanism errors.
///
/// Converted into [`negstream_core::Error`] at the [`negstream_core::Mechanism`] boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// A peer token could not be decoded.
    #[error("Malformed token: {0}")]
    Token(String),

    /// Cryptographic primitive failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] negstream_crypto::Error),

    /// Realm or keytab misconfiguration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<Error> for negstream_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Token(msg) => negstream_core::Error::ProtocolViolation(msg),
            Error::Crypto(e) => negstream_core::Error::Crypto(e.to_string()),
            Error::Config(msg) => negstream_core::Error::InvalidOperation(msg),
        }
    }
}
