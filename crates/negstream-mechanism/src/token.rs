//! Handshake token encoding.
//!
//! ```text
//! Token
//! ┌────────────────────────────┐
//! │ kind: u8                   │
//! │ field*                     │
//! └────────────────────────────┘
//! field := u8 | u64 (LE) | <len: u32 LE><bytes>
//! ```
//!
//! Fields are positional; each message kind fixes its own field order.

use crate::{Error, Result};

/// Builds one token.
pub(crate) struct TokenWriter {
    buf: Vec<u8>,
}

impl TokenWriter {
    pub(crate) fn new(kind: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(kind);
        Self { buf }
    }

    pub(crate) fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub(crate) fn bytes(mut self, value: &[u8]) -> Self {
        // Token fields are far below 4 GiB; the handshake size ceiling is enforced by the session.
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub(crate) fn string(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads one token, front to back.
pub(crate) struct TokenReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TokenReader<'a> {
    /// Start reading a token that must be of `expected` kind.
    pub(crate) fn new(data: &'a [u8], expected: u8) -> Result<Self> {
        let mut reader = Self { data, pos: 0 };
        let kind = reader.u8()?;
        if kind != expected {
            return Err(Error::Token(format!(
                "unexpected message kind 0x{:02x}, wanted 0x{:02x}",
                kind, expected
            )));
        }
        Ok(reader)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn bytes(&mut self) -> Result<&'a [u8]> {
        let raw = self.take(4)?;
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        self.take(len)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let field = self.bytes()?;
        field.try_into().map_err(|_| {
            Error::Token(format!("field of {} bytes, wanted {}", field.len(), N))
        })
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let field = self.bytes()?;
        String::from_utf8(field.to_vec()).map_err(|_| Error::Token("field is not UTF-8".into()))
    }

    /// Reject trailing bytes.
    pub(crate) fn finish(self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(Error::Token(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::Token(format!(
                    "truncated: need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let field = &self.data[self.pos..end];
        self.pos = end;
        Ok(field)
    }
}
