//! Stream façades for negotiated authentication streams.
//!
//! - [`NegotiateStream`]: blocking, over any `std::io::Read + Write`
//! - [`AsyncNegotiateStream`]: tokio, over any `AsyncRead + AsyncWrite + Unpin`
//!
//! Both drive the same `negstream_core::Session` and frame codec; the mechanism is any
//! `negstream_core::Mechanism`, typically a Negotiate package from `negstream-mechanism`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod async_stream;
pub mod config;
pub mod error;
pub mod sync_stream;
#[cfg(feature = "tcp")]
pub mod tcp;

mod driver;

pub use async_stream::{AsyncNegotiateStream, ReadHalf, WriteHalf};
pub use config::StreamConfig;
pub use error::{Error, Result};
pub use sync_stream::NegotiateStream;
