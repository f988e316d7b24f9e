//! Core protocol engine for negotiated authentication streams.
//!
//! This crate implements the I/O-free parts of the protocol:
//! - Frame parsing and serialization (4-byte little-endian length prefix)
//! - The handshake state machine driving an opaque [`Mechanism`]
//! - The secure frame codec (chunking, per-frame encrypt/sign)
//! - The session buffer serving partial reads
//!
//! Transports drive these types; see `negstream-transport` for blocking and tokio façades.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod error;
pub mod frame;
pub mod mechanism;
pub mod observer;
pub mod seal;
pub mod session;

pub use buffer::SessionBuffer;
pub use error::{Error, Result};
pub use frame::{Frame, FrameReader, MAX_WRITE_DATA_SIZE};
pub use mechanism::{
    AuthenticationType, Capabilities, HandshakeParams, Identity, ImpersonationLevel, Mechanism,
    MessageSealer, MessageUnsealer, Protection, ProtectionLevel, Role, Status, Step,
};
pub use observer::SessionObserver;
pub use seal::{FrameSealer, FrameUnsealer};
pub use session::{HandshakeState, Next, Requirements, Session, SessionConfig, Transition};
