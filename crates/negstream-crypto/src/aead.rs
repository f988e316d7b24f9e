//! AEAD (Authenticated Encryption with Associated Data) implementations.
//!
//! Implements:
//! - ChaCha20-Poly1305 (RFC 8439), used by the NTLM-like mechanism
//! - AES-256-GCM (NIST SP 800-38D), used by the Kerberos-like mechanism
//!
//! Nonces are derived from a per-direction message counter, so a key must never be
//! shared between the two directions of a session.

use crate::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

/// Length of the authentication tag appended by both ciphers.
pub const TAG_LEN: usize = 16;

/// Supported AEAD ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305,
    /// AES-256-GCM.
    Aes256Gcm,
}

impl AeadAlgorithm {
    /// Encrypt `plaintext` under the nonce for message `counter`.
    pub fn seal(
        &self,
        key: &[u8; 32],
        counter: u64,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let nonce = construct_nonce(counter);
        match self {
            AeadAlgorithm::ChaCha20Poly1305 => {
                chacha20poly1305_encrypt(key, &nonce, plaintext, aad)
            }
            AeadAlgorithm::Aes256Gcm => aes256gcm_encrypt(key, &nonce, plaintext, aad),
        }
    }

    /// Decrypt a payload produced by [`AeadAlgorithm::seal`] with the same counter.
    ///
    /// # Errors
    /// Returns `Error::Decryption` if the tag does not verify or the payload is shorter
    /// than a tag.
    pub fn open(
        &self,
        key: &[u8; 32],
        counter: u64,
        ciphertext_and_tag: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext_and_tag.len() < TAG_LEN {
            return Err(Error::Decryption(format!(
                "payload of {} bytes is shorter than the tag",
                ciphertext_and_tag.len()
            )));
        }
        let nonce = construct_nonce(counter);
        match self {
            AeadAlgorithm::ChaCha20Poly1305 => {
                chacha20poly1305_decrypt(key, &nonce, ciphertext_and_tag, aad)
            }
            AeadAlgorithm::Aes256Gcm => aes256gcm_decrypt(key, &nonce, ciphertext_and_tag, aad),
        }
    }
}

/// Construct a 12-byte AEAD nonce from a message counter.
///
/// - `nonce[0:4] = 0x00000000`
/// - `nonce[4:12] = counter` (little-endian)
///
/// # Example
/// ```
/// use negstream_crypto::aead::construct_nonce;
///
/// let nonce = construct_nonce(0x4746454443424140);
/// assert_eq!(&nonce[0..4], &[0, 0, 0, 0]);
/// assert_eq!(&nonce[4..12], &[0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47]);
/// ```
pub fn construct_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt with ChaCha20-Poly1305 per RFC 8439.
///
/// Returns ciphertext with the 16-byte tag appended.
pub fn chacha20poly1305_encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::Encryption("ChaCha20-Poly1305 encryption failed".into()))
}

/// Decrypt with ChaCha20-Poly1305 per RFC 8439.
///
/// # Errors
/// Returns `Error::Decryption` if tag verification fails.
pub fn chacha20poly1305_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let payload = Payload {
        msg: ciphertext_and_tag,
        aad,
    };
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::Decryption("ChaCha20-Poly1305 authentication failed".into()))?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt with AES-256-GCM per NIST SP 800-38D.
///
/// # Example
/// ```
/// use negstream_crypto::aead::aes256gcm_encrypt;
///
/// let key = [0x42; 32];
/// let nonce = [0x01; 12];
/// let sealed = aes256gcm_encrypt(&key, &nonce, b"Hello, world!", b"").unwrap();
/// assert_eq!(sealed.len(), 13 + 16);
/// ```
pub fn aes256gcm_encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Encryption("Invalid AES-256-GCM key length".into()))?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::Encryption("AES-256-GCM encryption failed".into()))
}

/// Decrypt with AES-256-GCM per NIST SP 800-38D.
///
/// # Errors
/// Returns `Error::Decryption` if tag verification fails.
pub fn aes256gcm_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Decryption("Invalid AES-256-GCM key length".into()))?;
    let payload = Payload {
        msg: ciphertext_and_tag,
        aad,
    };
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| Error::Decryption("AES-256-GCM authentication failed".into()))?;
    Ok(Zeroizing::new(plaintext))
}
