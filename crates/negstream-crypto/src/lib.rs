//! Cryptographic primitives for negstream message protection.
//!
//! Implements:
//! - AEAD encryption (ChaCha20-Poly1305, AES-256-GCM) with counter nonces
//! - HMAC-SHA256 message authentication with truncated tags
//! - HKDF-SHA256 key derivation for per-direction message keys
//!
//! Secrets are held in `Zeroizing` wrappers and MAC tags are compared in constant time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod mac;

pub use aead::AeadAlgorithm;
pub use error::{Error, Result};
pub use kdf::{KeyDirection, MessageKeys};

/// Fill an array from the operating system RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
