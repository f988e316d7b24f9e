//! Secure frame codec.
//!
//! Turns application writes into sealed frames and sealed frames back into plaintext,
//! using the per-message functions of the mechanism that completed the handshake.
//! The protection mode is fixed by the capabilities negotiated at handshake time and
//! is never renegotiated per frame.

use crate::{
    frame::{Frame, MAX_WRITE_DATA_SIZE},
    mechanism::{Capabilities, MessageSealer, MessageUnsealer},
    Error, Result,
};

/// How each frame payload is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProtection {
    /// Encrypt-then-authenticate.
    Encrypt,
    /// Plaintext plus MAC.
    Sign,
    /// Pass-through.
    Clear,
}

impl From<Capabilities> for FrameProtection {
    fn from(caps: Capabilities) -> Self {
        if caps.can_encrypt {
            FrameProtection::Encrypt
        } else if caps.can_sign {
            FrameProtection::Sign
        } else {
            FrameProtection::Clear
        }
    }
}

/// Number of frames a write of `len` plaintext bytes produces.
pub fn frame_count(len: usize) -> usize {
    len.div_ceil(MAX_WRITE_DATA_SIZE)
}

/// Outbound half of the codec.
pub struct FrameSealer {
    mode: FrameProtection,
    sealer: Box<dyn MessageSealer>,
}

impl FrameSealer {
    /// Create a sealer for the negotiated capabilities.
    pub fn new(caps: Capabilities, sealer: Box<dyn MessageSealer>) -> Self {
        Self {
            mode: caps.into(),
            sealer,
        }
    }

    /// Protection applied to each frame.
    pub fn mode(&self) -> FrameProtection {
        self.mode
    }

    /// Split `plaintext` into chunks of at most [`MAX_WRITE_DATA_SIZE`] and seal each.
    ///
    /// Frames are returned in the order they must be written. An empty write produces
    /// no frames, since a zero-length frame marks end-of-stream.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::with_capacity(frame_count(plaintext.len()));
        for chunk in plaintext.chunks(MAX_WRITE_DATA_SIZE) {
            let payload = match self.mode {
                FrameProtection::Encrypt => self.sealer.encrypt(chunk)?,
                FrameProtection::Sign => self.sealer.sign(chunk)?,
                FrameProtection::Clear => chunk.to_vec(),
            };
            if payload.is_empty() {
                return Err(Error::Crypto("Sealed chunk is empty".into()));
            }
            tracing::trace!(
                plaintext = chunk.len(),
                sealed = payload.len(),
                "sealed frame"
            );
            frames.push(Frame::new(payload));
        }
        Ok(frames)
    }

    /// Seal `plaintext` and encode every resulting frame into one contiguous buffer.
    pub fn seal_to_wire(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let frames = self.seal(plaintext)?;
        let total = frames.iter().map(Frame::encoded_len).sum();
        let mut wire = Vec::with_capacity(total);
        for frame in &frames {
            frame.serialize_into(&mut wire)?;
        }
        Ok(wire)
    }
}

/// Inbound half of the codec.
pub struct FrameUnsealer {
    mode: FrameProtection,
    unsealer: Box<dyn MessageUnsealer>,
}

impl FrameUnsealer {
    /// Create an unsealer for the negotiated capabilities.
    pub fn new(caps: Capabilities, unsealer: Box<dyn MessageUnsealer>) -> Self {
        Self {
            mode: caps.into(),
            unsealer,
        }
    }

    /// Protection expected on each frame.
    pub fn mode(&self) -> FrameProtection {
        self.mode
    }

    /// Reverse the sealing of one frame.
    ///
    /// Returns `None` for the end-of-stream frame.
    ///
    /// # Errors
    ///
    /// `Error::Integrity` if a signature fails, `Error::Decryption` if a sealed payload
    /// cannot be opened.
    pub fn unseal(&mut self, frame: Frame) -> Result<Option<Vec<u8>>> {
        if frame.is_end_of_stream() {
            return Ok(None);
        }
        let sealed_len = frame.payload().len();
        let plaintext = match self.mode {
            FrameProtection::Encrypt => self.unsealer.decrypt(frame.payload())?,
            FrameProtection::Sign => self.unsealer.verify(frame.payload())?,
            FrameProtection::Clear => frame.into_payload(),
        };
        if plaintext.len() > MAX_WRITE_DATA_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "Frame carries {} plaintext bytes, limit is {}",
                plaintext.len(),
                MAX_WRITE_DATA_SIZE
            )));
        }
        tracing::trace!(sealed = sealed_len, plaintext = plaintext.len(), "unsealed frame");
        Ok(Some(plaintext))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Test protection: XOR "encryption" with a trailing sequence byte, and a one-byte
    /// additive checksum as the "MAC".
    pub(crate) struct TestSealer {
        seq: u8,
    }

    pub(crate) struct TestUnsealer {
        seq: u8,
    }

    pub(crate) fn test_pair() -> (Box<dyn MessageSealer>, Box<dyn MessageUnsealer>) {
        (
            Box::new(TestSealer { seq: 0 }),
            Box::new(TestUnsealer { seq: 0 }),
        )
    }

    fn checksum(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    impl MessageSealer for TestSealer {
        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
            let mut out: Vec<u8> = plaintext.iter().map(|b| b ^ 0x5A).collect();
            out.push(self.seq);
            self.seq = self.seq.wrapping_add(1);
            Ok(out)
        }

        fn sign(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
            let mut out = plaintext.to_vec();
            out.push(checksum(plaintext).wrapping_add(self.seq));
            self.seq = self.seq.wrapping_add(1);
            Ok(out)
        }
    }

    impl MessageUnsealer for TestUnsealer {
        fn decrypt(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
            let (body, seq) = sealed
                .split_last()
                .map(|(seq, body)| (body, *seq))
                .ok_or_else(|| Error::Decryption("empty".into()))?;
            if seq != self.seq {
                return Err(Error::Decryption("sequence mismatch".into()));
            }
            self.seq = self.seq.wrapping_add(1);
            Ok(body.iter().map(|b| b ^ 0x5A).collect())
        }

        fn verify(&mut self, signed: &[u8]) -> Result<Vec<u8>> {
            let (mac, body) = signed
                .split_last()
                .ok_or_else(|| Error::Integrity("empty".into()))?;
            if *mac != checksum(body).wrapping_add(self.seq) {
                return Err(Error::Integrity("checksum mismatch".into()));
            }
            self.seq = self.seq.wrapping_add(1);
            Ok(body.to_vec())
        }
    }

    fn codec(caps: Capabilities) -> (FrameSealer, FrameUnsealer) {
        let (sealer, unsealer) = test_pair();
        (FrameSealer::new(caps, sealer), FrameUnsealer::new(caps, unsealer))
    }

    const ENCRYPT: Capabilities = Capabilities {
        can_encrypt: true,
        can_sign: true,
        is_mutual: true,
    };

    const SIGN: Capabilities = Capabilities {
        can_encrypt: false,
        can_sign: true,
        is_mutual: false,
    };

    #[test]
    fn test_mode_from_capabilities() {
        assert_eq!(FrameProtection::from(ENCRYPT), FrameProtection::Encrypt);
        assert_eq!(FrameProtection::from(SIGN), FrameProtection::Sign);
        assert_eq!(
            FrameProtection::from(Capabilities::default()),
            FrameProtection::Clear
        );
    }

    #[test]
    fn test_split_at_max_write_data_size() {
        let (mut sealer, mut unsealer) = codec(ENCRYPT);
        let mut message = vec![b'A'; MAX_WRITE_DATA_SIZE];
        message.push(b'Z');

        let frames = sealer.seal(&message).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frame_count(message.len()), 2);

        let mut received = Vec::new();
        for frame in frames {
            received.extend(unsealer.unseal(frame).unwrap().unwrap());
        }
        assert_eq!(received, message);
    }

    #[test]
    fn test_exact_multiple_does_not_add_frame() {
        let (mut sealer, _) = codec(Capabilities::default());
        let frames = sealer.seal(&vec![0u8; MAX_WRITE_DATA_SIZE * 3]).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames
            .iter()
            .all(|f| f.payload().len() == MAX_WRITE_DATA_SIZE));
    }

    #[test]
    fn test_empty_write_produces_no_frames() {
        let (mut sealer, _) = codec(ENCRYPT);
        assert!(sealer.seal(&[]).unwrap().is_empty());
        assert!(sealer.seal_to_wire(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_signed_tamper_is_integrity_error() {
        let (mut sealer, mut unsealer) = codec(SIGN);
        let frame = sealer.seal(b"Sample Test Message").unwrap().remove(0);
        assert_eq!(&frame.payload()[..19], b"Sample Test Message");

        let mut payload = frame.into_payload();
        payload[0] ^= 0x01;
        assert!(matches!(
            unsealer.unseal(Frame::new(payload)),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_reordered_frames_fail_decryption() {
        let (mut sealer, mut unsealer) = codec(ENCRYPT);
        let _first = sealer.seal(b"first").unwrap().remove(0);
        let second = sealer.seal(b"second").unwrap().remove(0);
        assert!(matches!(
            unsealer.unseal(second),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_end_of_stream() {
        let (_, mut unsealer) = codec(ENCRYPT);
        assert_eq!(unsealer.unseal(Frame::end_of_stream()).unwrap(), None);
    }

    #[test]
    fn test_clear_mode_is_passthrough() {
        let (mut sealer, _) = codec(Capabilities::default());
        let wire = sealer.seal_to_wire(b"abc").unwrap();
        assert_eq!(wire, [3, 0, 0, 0, b'a', b'b', b'c']);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_seal_unseal_preserves_bytes(
            data in proptest::collection::vec(any::<u8>(), 1..(MAX_WRITE_DATA_SIZE * 2 + 17)),
            encrypt in any::<bool>(),
        ) {
            let caps = if encrypt { ENCRYPT } else { SIGN };
            let (mut sealer, mut unsealer) = codec(caps);
            let frames = sealer.seal(&data).unwrap();
            prop_assert_eq!(frames.len(), frame_count(data.len()));

            let mut out = Vec::with_capacity(data.len());
            for frame in frames {
                out.extend(unsealer.unseal(frame).unwrap().unwrap());
            }
            prop_assert_eq!(out, data);
        }
    }
}
