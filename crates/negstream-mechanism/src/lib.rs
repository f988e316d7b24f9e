//! Simulated Negotiate package for negstream.
//!
//! Kerberos- and NTLM-like mechanisms implementing [`negstream_core::Mechanism`], backed by
//! an in-process [`Realm`] instead of a KDC or domain controller. The handshake messages
//! are invented, but the message protection is real: AES-256-GCM or ChaCha20-Poly1305 for
//! sealed frames and truncated HMAC-SHA256 for signed frames, with per-direction keys and
//! sequence numbers.
//!
//! ```no_run
//! use negstream_mechanism::{Credential, NegotiateAcceptor, NegotiateInitiator, Realm};
//! use std::sync::Arc;
//!
//! let realm = Arc::new(Realm::linux_contoso());
//! let keytab = realm.keytab(["HOST/localhost"]).unwrap();
//! let client = NegotiateInitiator::new(realm.clone(), Credential::new("user1", "password"));
//! let server = NegotiateAcceptor::new(realm, keytab);
//! # let _ = (client, server);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod kerberos;
pub mod negotiate;
pub mod ntlm;
mod protection;
pub mod realm;
mod token;

pub use error::{Error, Result};
pub use kerberos::{KerberosAcceptor, KerberosInitiator, UNKNOWN_SERVICE};
pub use negotiate::{NegotiateAcceptor, NegotiateInitiator};
pub use ntlm::{NtlmAcceptor, NtlmInitiator};
pub use realm::{Credential, Keytab, Realm};
