//! Transport layer errors.

use std::io;
use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol error from core.
    #[error("Protocol error: {0}")]
    Protocol(#[from] negstream_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The protocol error, if this is one.
    pub fn protocol(&self) -> Option<&negstream_core::Error> {
        match self {
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this is `Authentication`, the mechanism rejecting credential or target.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Protocol(negstream_core::Error::Authentication(_)))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        use negstream_core::Error as Core;
        match err {
            Error::Io(e) => e,
            Error::ConnectionFailed(msg) => io::Error::new(io::ErrorKind::ConnectionRefused, msg),
            Error::Protocol(e) => {
                let kind = match &e {
                    Core::TimedOut => io::ErrorKind::TimedOut,
                    Core::HandshakeAborted => io::ErrorKind::ConnectionAborted,
                    Core::Authentication(_) => io::ErrorKind::PermissionDenied,
                    Core::InvalidOperation(_) => io::ErrorKind::InvalidInput,
                    Core::Integrity(_) | Core::Decryption(_) | Core::ProtocolViolation(_) => {
                        io::ErrorKind::InvalidData
                    }
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, e)
            }
        }
    }
}
