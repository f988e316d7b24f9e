//! Per-message protection for an established context.
//!
//! Each direction has its own encryption key, signing key and sequence number. The
//! sequence number is bound into every nonce and MAC, so replayed, dropped or reordered
//! frames fail to unseal.
//!
//! ```text
//! encrypted frame: AEAD(encrypt_key, nonce(seq), plaintext) = ciphertext || tag[16]
//! signed frame:    plaintext || HMAC-SHA256(sign_key, seq_be || plaintext)[..16]
//! ```

use crate::Result;
use negstream_core::{
    Capabilities, Error as CoreError, MessageSealer, MessageUnsealer, Protection,
    ProtectionLevel, Result as CoreResult, Role,
};
use negstream_crypto::{
    aead::AeadAlgorithm,
    kdf::{derive_message_keys, KeyDirection, MessageKeys},
    mac::{self, MAC_LEN},
};

/// Capabilities a context provides for the negotiated protection level.
pub(crate) fn capabilities_for(level: ProtectionLevel, is_mutual: bool) -> Capabilities {
    Capabilities {
        can_encrypt: level == ProtectionLevel::EncryptAndSign,
        can_sign: level >= ProtectionLevel::Sign,
        is_mutual,
    }
}

/// Wire encoding of a protection level inside handshake tokens.
pub(crate) fn encode_level(level: ProtectionLevel) -> u8 {
    match level {
        ProtectionLevel::None => 0,
        ProtectionLevel::Sign => 1,
        ProtectionLevel::EncryptAndSign => 2,
    }
}

pub(crate) fn decode_level(raw: u8) -> Option<ProtectionLevel> {
    match raw {
        0 => Some(ProtectionLevel::None),
        1 => Some(ProtectionLevel::Sign),
        2 => Some(ProtectionLevel::EncryptAndSign),
        _ => None,
    }
}

/// Build the sealer/unsealer pair for the local `role`.
///
/// `context` must be identical on both sides (the handshake nonces).
pub(crate) fn protection(
    algorithm: AeadAlgorithm,
    session_key: &[u8; 32],
    context: &[u8],
    role: Role,
) -> Result<Protection> {
    let (outbound, inbound) = match role {
        Role::Initiator => (
            KeyDirection::InitiatorToAcceptor,
            KeyDirection::AcceptorToInitiator,
        ),
        Role::Acceptor => (
            KeyDirection::AcceptorToInitiator,
            KeyDirection::InitiatorToAcceptor,
        ),
    };
    let sealer = ContextSealer {
        algorithm,
        keys: derive_message_keys(session_key, context, outbound)?,
        seq: 0,
    };
    let unsealer = ContextUnsealer {
        algorithm,
        keys: derive_message_keys(session_key, context, inbound)?,
        seq: 0,
    };
    Ok((Box::new(sealer), Box::new(unsealer)))
}

fn next_seq(seq: &mut u64) -> CoreResult<u64> {
    let current = *seq;
    *seq = current
        .checked_add(1)
        .ok_or_else(|| CoreError::Crypto("message sequence number exhausted".into()))?;
    Ok(current)
}

struct ContextSealer {
    algorithm: AeadAlgorithm,
    keys: MessageKeys,
    seq: u64,
}

impl MessageSealer for ContextSealer {
    fn encrypt(&mut self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let seq = next_seq(&mut self.seq)?;
        self.algorithm
            .seal(&self.keys.encrypt, seq, plaintext, &[])
            .map_err(|e| CoreError::Crypto(e.to_string()))
    }

    fn sign(&mut self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let seq = next_seq(&mut self.seq)?;
        let tag =
            mac::sign(&self.keys.sign, seq, plaintext).map_err(|e| CoreError::Crypto(e.to_string()))?;
        let mut out = Vec::with_capacity(plaintext.len() + MAC_LEN);
        out.extend_from_slice(plaintext);
        out.extend_from_slice(&tag);
        Ok(out)
    }
}

struct ContextUnsealer {
    algorithm: AeadAlgorithm,
    keys: MessageKeys,
    seq: u64,
}

impl MessageUnsealer for ContextUnsealer {
    fn decrypt(&mut self, sealed: &[u8]) -> CoreResult<Vec<u8>> {
        let seq = next_seq(&mut self.seq)?;
        let plaintext = self
            .algorithm
            .open(&self.keys.encrypt, seq, sealed, &[])
            .map_err(|e| CoreError::Decryption(format!("frame {}: {}", seq, e)))?;
        Ok(plaintext.to_vec())
    }

    fn verify(&mut self, signed: &[u8]) -> CoreResult<Vec<u8>> {
        let seq = next_seq(&mut self.seq)?;
        if signed.len() < MAC_LEN {
            return Err(CoreError::Integrity(format!(
                "frame {} shorter than its signature",
                seq
            )));
        }
        let (body, tag) = signed.split_at(signed.len() - MAC_LEN);
        mac::verify(&self.keys.sign, seq, body, tag)
            .map_err(|e| CoreError::Integrity(format!("frame {}: {}", seq, e)))?;
        Ok(body.to_vec())
    }
}
