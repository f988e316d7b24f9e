//! Wire format conformance.
//!
//! `Frame := <length: u32 LE><payload>`, zero length is end-of-stream, and application
//! writes split at `MAX_WRITE_DATA_SIZE` plaintext bytes per frame.

use negstream::core::{
    frame::{HEADER_LEN, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_TOKEN_SIZE},
    seal::frame_count,
    Capabilities, Error, Frame, FrameReader, FrameSealer, FrameUnsealer, MessageSealer,
    MessageUnsealer, SessionConfig, MAX_WRITE_DATA_SIZE,
};

/// Pass-through protection for exercising framing alone.
struct Clear;

impl MessageSealer for Clear {
    fn encrypt(&mut self, plaintext: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }
    fn sign(&mut self, plaintext: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }
}

impl MessageUnsealer for Clear {
    fn decrypt(&mut self, sealed: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(sealed.to_vec())
    }
    fn verify(&mut self, signed: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(signed.to_vec())
    }
}

#[test]
fn test_constants() {
    assert_eq!(MAX_WRITE_DATA_SIZE, 64512);
    assert_eq!(HEADER_LEN, 4);
    assert_eq!(DEFAULT_MAX_TOKEN_SIZE, 65536);
    assert_eq!(DEFAULT_MAX_FRAME_SIZE, MAX_WRITE_DATA_SIZE + 1024);

    let config = SessionConfig::default();
    assert_eq!(config.max_token_size, DEFAULT_MAX_TOKEN_SIZE);
    assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
}

#[test]
fn test_end_of_stream_encoding() {
    let bytes = Frame::end_of_stream().serialize().unwrap();
    assert_eq!(hex::encode(&bytes), "00000000");

    let (frame, used) = Frame::parse(&bytes, 16).unwrap();
    assert!(frame.is_end_of_stream());
    assert_eq!(used, 4);
}

#[test]
fn test_length_prefix_is_little_endian() {
    let frame = Frame::new(vec![0xEE; 0x0102]);
    let bytes = frame.serialize().unwrap();
    assert_eq!(hex::encode(&bytes[..4]), "02010000");
    assert_eq!(bytes.len(), 4 + 0x0102);
}

#[test]
fn test_parse_reports_consumed_bytes() {
    let wire = hex::decode("03000000616263ffff").unwrap();
    let (frame, used) = Frame::parse(&wire, 16).unwrap();
    assert_eq!(frame.payload(), b"abc");
    assert_eq!(used, 7);
}

#[test]
fn test_truncated_frames_are_rejected() {
    assert!(matches!(
        Frame::parse(&hex::decode("0300").unwrap(), 16),
        Err(Error::ProtocolViolation(_))
    ));
    assert!(matches!(
        Frame::parse(&hex::decode("030000006162").unwrap(), 16),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn test_oversized_length_rejected_before_body() {
    let mut reader = FrameReader::new(DEFAULT_MAX_TOKEN_SIZE);
    let header = ((DEFAULT_MAX_TOKEN_SIZE as u32) + 1).to_le_bytes();
    reader.want().copy_from_slice(&header);
    assert!(matches!(reader.advance(4), Err(Error::ProtocolViolation(_))));
}

#[test]
fn test_reader_reassembles_byte_at_a_time() {
    let wire = hex::decode("0500000068656c6c6f00000000").unwrap();
    let mut reader = FrameReader::new(16);
    let mut frames = Vec::new();
    for byte in wire {
        reader.want()[0] = byte;
        if let Some(frame) = reader.advance(1).unwrap() {
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload(), b"hello");
    assert!(frames[1].is_end_of_stream());
    assert!(reader.is_idle());
}

#[test]
fn test_write_splits_into_ceil_frames() {
    let caps = Capabilities::default();
    let mut sealer = FrameSealer::new(caps, Box::new(Clear));
    let mut unsealer = FrameUnsealer::new(caps, Box::new(Clear));

    for len in [
        1,
        MAX_WRITE_DATA_SIZE - 1,
        MAX_WRITE_DATA_SIZE,
        MAX_WRITE_DATA_SIZE + 1,
        2 * MAX_WRITE_DATA_SIZE + 7,
    ] {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let frames = sealer.seal(&data).unwrap();
        assert_eq!(frames.len(), len.div_ceil(MAX_WRITE_DATA_SIZE), "len {len}");
        assert_eq!(frames.len(), frame_count(len));
        assert!(frames
            .iter()
            .all(|f| f.payload().len() <= MAX_WRITE_DATA_SIZE));

        let mut joined = Vec::with_capacity(len);
        for frame in frames {
            joined.extend(unsealer.unseal(frame).unwrap().unwrap());
        }
        assert_eq!(joined, data);
    }
}

#[test]
fn test_oversized_plaintext_frame_is_violation() {
    let caps = Capabilities::default();
    let mut unsealer = FrameUnsealer::new(caps, Box::new(Clear));
    let frame = Frame::new(vec![0u8; MAX_WRITE_DATA_SIZE + 1]);
    assert!(matches!(
        unsealer.unseal(frame),
        Err(Error::ProtocolViolation(_))
    ));
}
