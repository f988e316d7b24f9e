//! HMAC-SHA256 message authentication.
//!
//! Signed frames carry a 16-byte tag computed over the big-endian sequence number
//! followed by the message. Tags are compared in constant time.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Length of a truncated tag.
pub const MAC_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Full HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::KeyDerivation("HMAC key rejected".into()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Tag for message number `seq`, truncated to [`MAC_LEN`] bytes.
pub fn sign(key: &[u8; 32], seq: u64, data: &[u8]) -> Result<[u8; MAC_LEN]> {
    let full = hmac_sha256(key, &[&seq.to_be_bytes(), data])?;
    let mut tag = [0u8; MAC_LEN];
    tag.copy_from_slice(&full[..MAC_LEN]);
    Ok(tag)
}

/// Verify a truncated tag for message number `seq`.
///
/// # Errors
/// `Error::InvalidLength` for a tag of the wrong size, `Error::MacMismatch` otherwise.
pub fn verify(key: &[u8; 32], seq: u64, data: &[u8], tag: &[u8]) -> Result<()> {
    if tag.len() != MAC_LEN {
        return Err(Error::InvalidLength {
            expected: MAC_LEN,
            actual: tag.len(),
        });
    }
    let expected = sign(key, seq, data)?;
    if bool::from(expected.ct_eq(tag)) {
        Ok(())
    } else {
        Err(Error::MacMismatch)
    }
}
