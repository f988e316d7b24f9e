//! Negotiated authentication stream.
//!
//! Umbrella crate re-exporting the workspace:
//! - [`core`]: handshake state machine, frame codec, mechanism traits
//! - [`transport`]: blocking and tokio stream façades
//! - [`mechanism`]: simulated Negotiate package (Kerberos/NTLM) for loopback use
//!
//! Conformance tests for the wire format and the loopback scenarios live in `tests/conformance`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use negstream_core as core;
pub use negstream_mechanism as mechanism;
pub use negstream_transport as transport;

pub use negstream_core::{Capabilities, Identity, ProtectionLevel, Role};
pub use negstream_transport::{AsyncNegotiateStream, NegotiateStream, StreamConfig};
