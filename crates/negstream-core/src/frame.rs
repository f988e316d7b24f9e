//! Frame parsing and serialization.
//!
//! Wire format, shared by handshake tokens and sealed application data:
//!
//! ```text
//! Frame
//! ┌──────────────────────────────────────┐
//! │ length: u32 (little-endian) [4 bytes] │
//! │ payload                 [length bytes] │
//! └──────────────────────────────────────┘
//! ```
//!
//! A zero `length` is the graceful end-of-stream marker. During the handshake the
//! payload is a raw mechanism token; afterwards it is a chunk sealed by
//! [`crate::seal::FrameSealer`].

use crate::{Error, Result};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Maximum plaintext bytes carried by one post-handshake frame (63 × 1024).
pub const MAX_WRITE_DATA_SIZE: usize = 63 * 1024;

/// Default ceiling for a single handshake token.
pub const DEFAULT_MAX_TOKEN_SIZE: usize = 64 * 1024;

/// Default ceiling for a sealed post-handshake frame payload.
///
/// Leaves headroom above [`MAX_WRITE_DATA_SIZE`] for mechanism tags and headers.
pub const DEFAULT_MAX_FRAME_SIZE: usize = MAX_WRITE_DATA_SIZE + 1024;

/// One length-prefixed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wrap a payload.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// The zero-length end-of-stream frame.
    pub fn end_of_stream() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Whether this is the end-of-stream marker.
    pub fn is_end_of_stream(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Length of the encoded frame (header plus payload).
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize frame to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.serialize_into(&mut buf)?;
        Ok(buf)
    }

    /// Append the encoded frame to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            Error::ProtocolViolation(format!(
                "Frame payload of {} bytes exceeds u32 length prefix",
                self.payload.len()
            ))
        })?;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Parse one complete frame from the start of `data`.
    ///
    /// Returns the frame and the number of bytes consumed. Lengths above `max_len`
    /// are rejected before the payload is inspected.
    pub fn parse(data: &[u8], max_len: usize) -> Result<(Self, usize)> {
        check_len(data, HEADER_LEN)?;
        let len = decode_length(read_u32_le(&data[0..HEADER_LEN]), max_len)?;
        check_len(data, HEADER_LEN + len)?;
        let payload = data[HEADER_LEN..HEADER_LEN + len].to_vec();
        Ok((Self { payload }, HEADER_LEN + len))
    }
}

/// Validate a decoded length prefix against a ceiling.
pub fn decode_length(raw: u32, max_len: usize) -> Result<usize> {
    let len = raw as usize;
    if len > max_len {
        return Err(Error::ProtocolViolation(format!(
            "Frame length {} exceeds limit of {} bytes",
            len, max_len
        )));
    }
    Ok(len)
}

/// Incremental frame reader.
///
/// Holds partial header and body bytes between transport reads, so a read that is
/// interrupted (timeout, dropped future) can be resumed without losing the frame
/// boundary. Drivers loop: fill [`FrameReader::want`], report with
/// [`FrameReader::advance`], until a frame is produced.
#[derive(Debug)]
pub struct FrameReader {
    max_len: usize,
    header: [u8; HEADER_LEN],
    header_filled: usize,
    body: Vec<u8>,
    body_filled: usize,
    in_body: bool,
}

impl FrameReader {
    /// Create a reader rejecting frames longer than `max_len`.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            header: [0u8; HEADER_LEN],
            header_filled: 0,
            body: Vec::new(),
            body_filled: 0,
            in_body: false,
        }
    }

    /// Change the length ceiling (handshake tokens and data frames use different limits).
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
    }

    /// Whether no bytes of the current frame have been received yet.
    ///
    /// Transport EOF is only clean at a frame boundary.
    pub fn is_idle(&self) -> bool {
        !self.in_body && self.header_filled == 0
    }

    /// Buffer the transport should read into next. Never empty.
    pub fn want(&mut self) -> &mut [u8] {
        if self.in_body {
            &mut self.body[self.body_filled..]
        } else {
            &mut self.header[self.header_filled..]
        }
    }

    /// Record `n` bytes written into [`FrameReader::want`].
    ///
    /// Returns a frame once the header and the whole body are present.
    pub fn advance(&mut self, n: usize) -> Result<Option<Frame>> {
        if self.in_body {
            self.body_filled += n;
            if self.body_filled < self.body.len() {
                return Ok(None);
            }
            return Ok(Some(self.take_frame()));
        }

        self.header_filled += n;
        if self.header_filled < HEADER_LEN {
            return Ok(None);
        }

        let len = decode_length(read_u32_le(&self.header), self.max_len)?;
        self.header_filled = 0;
        if len == 0 {
            return Ok(Some(Frame::end_of_stream()));
        }
        self.body = vec![0u8; len];
        self.body_filled = 0;
        self.in_body = true;
        Ok(None)
    }

    fn take_frame(&mut self) -> Frame {
        self.in_body = false;
        self.body_filled = 0;
        Frame::new(std::mem::take(&mut self.body))
    }
}

#[inline]
fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::ProtocolViolation(format!(
            "Insufficient data: need {} bytes, have {}",
            needed,
            data.len()
        )))
    } else {
        Ok(())
    }
}

#[inline]
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}
