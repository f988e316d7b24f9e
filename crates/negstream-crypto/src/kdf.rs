//! Key derivation functions (HKDF-SHA256).
//!
//! - Long-term keys from a principal's password
//! - Per-direction message keys from an established session key

use crate::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Direction of traffic a message key protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    /// Initiator-to-acceptor ("i2a").
    InitiatorToAcceptor,
    /// Acceptor-to-initiator ("a2i").
    AcceptorToInitiator,
}

impl KeyDirection {
    fn label(&self) -> &'static [u8] {
        match self {
            KeyDirection::InitiatorToAcceptor => b"i2a",
            KeyDirection::AcceptorToInitiator => b"a2i",
        }
    }
}

/// Keys protecting one direction of a session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    /// AEAD key for encrypted frames.
    pub encrypt: [u8; 32],
    /// HMAC key for signed frames.
    pub sign: [u8; 32],
}

impl std::fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKeys").finish_non_exhaustive()
    }
}

/// Generic HKDF-SHA256 key derivation per RFC 5869.
///
/// # Example
/// ```
/// use negstream_crypto::kdf::hkdf_sha256;
///
/// let okm = hkdf_sha256(&[0x0b; 22], b"salt", b"info", 42).unwrap();
/// assert_eq!(okm.len(), 42);
/// ```
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; output_len];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".into()))?;
    Ok(Zeroizing::new(okm))
}

fn expand_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    let okm = hkdf_sha256(ikm, salt, info, 32)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&okm);
    Ok(key)
}

/// Derive a principal's long-term key from its password.
///
/// Uses HKDF-SHA256 with:
/// - IKM: password
/// - Salt: principal name
/// - Info: "negstream-long-term-key"
pub fn derive_long_term_key(principal: &str, password: &str) -> Result<Zeroizing<[u8; 32]>> {
    expand_32(
        password.as_bytes(),
        principal.as_bytes(),
        b"negstream-long-term-key",
    )
    .map(Zeroizing::new)
}

/// Derive the message keys for one direction of a session.
///
/// Uses HKDF-SHA256 with:
/// - IKM: session key
/// - Salt: `context` (both handshake nonces)
/// - Info: "negstream-encrypt-" or "negstream-sign-" followed by the direction label
pub fn derive_message_keys(
    session_key: &[u8],
    context: &[u8],
    direction: KeyDirection,
) -> Result<MessageKeys> {
    let mut info = Vec::with_capacity(24);
    info.extend_from_slice(b"negstream-encrypt-");
    info.extend_from_slice(direction.label());
    let encrypt = expand_32(session_key, context, &info)?;

    info.clear();
    info.extend_from_slice(b"negstream-sign-");
    info.extend_from_slice(direction.label());
    let sign = expand_32(session_key, context, &info)?;

    Ok(MessageKeys { encrypt, sign })
}
