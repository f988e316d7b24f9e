//! I/O-free pieces shared by the blocking and tokio streams.
//!
//! Both streams run the same handshake loop over [`Session`] and the same read/write
//! bookkeeping; they differ only in how bytes move to and from the transport.

use crate::Error;
use negstream_core::{
    Error as CoreError, Frame, FrameReader, FrameSealer, FrameUnsealer, Session, SessionBuffer,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Inbound half: frame reassembly, unsealing and partial-read buffering.
pub(crate) struct ReadSide {
    pub(crate) reader: FrameReader,
    buffer: SessionBuffer,
    unsealer: Option<FrameUnsealer>,
    eof: bool,
}

impl ReadSide {
    pub(crate) fn new(max_token_size: usize) -> Self {
        Self {
            reader: FrameReader::new(max_token_size),
            buffer: SessionBuffer::new(),
            unsealer: None,
            eof: false,
        }
    }

    /// Switch from handshake tokens to sealed data frames.
    pub(crate) fn install(&mut self, unsealer: FrameUnsealer, max_frame_size: usize) {
        self.reader.set_max_len(max_frame_size);
        self.unsealer = Some(unsealer);
    }

    /// Serve a read without touching the transport, if possible.
    pub(crate) fn buffered(&mut self, buf: &mut [u8]) -> Option<usize> {
        if buf.is_empty() {
            return Some(0);
        }
        if !self.buffer.is_empty() {
            return Some(self.buffer.drain_into(buf));
        }
        self.eof.then_some(0)
    }

    /// Unseal one data frame into `buf`, keeping any excess for later reads.
    ///
    /// Returns `None` if the frame carried no plaintext and another must be read.
    pub(crate) fn deliver(
        &mut self,
        frame: Frame,
        buf: &mut [u8],
    ) -> negstream_core::Result<Option<usize>> {
        let unsealer = self
            .unsealer
            .as_mut()
            .ok_or_else(|| CoreError::InvalidOperation("not yet authenticated".into()))?;
        match unsealer.unseal(frame)? {
            None => {
                tracing::debug!("peer signalled end of stream");
                self.eof = true;
                Ok(Some(0))
            }
            Some(plaintext) if plaintext.is_empty() => Ok(None),
            Some(plaintext) => {
                self.buffer.fill(plaintext);
                Ok(Some(self.buffer.drain_into(buf)))
            }
        }
    }

    /// Transport returned EOF. Clean only between frames.
    pub(crate) fn transport_eof(&mut self) -> negstream_core::Result<usize> {
        if self.reader.is_idle() {
            self.eof = true;
            Ok(0)
        } else {
            Err(CoreError::ProtocolViolation(
                "transport closed in the middle of a frame".into(),
            ))
        }
    }

    pub(crate) fn release(&mut self) {
        self.buffer.clear();
        self.unsealer = None;
    }
}

/// Outbound half: sealing and interrupted-write tracking.
pub(crate) struct WriteSide {
    sealer: Option<FrameSealer>,
    in_flight: bool,
}

impl WriteSide {
    pub(crate) fn new() -> Self {
        Self {
            sealer: None,
            in_flight: false,
        }
    }

    pub(crate) fn install(&mut self, sealer: FrameSealer) {
        self.sealer = Some(sealer);
    }

    /// Seal `data` for writing. The write side stays unusable until [`WriteSide::finish`].
    ///
    /// Sealing consumes sequence numbers, so wire bytes that never reach the peer leave
    /// the direction desynchronised; an interrupted write therefore poisons it.
    pub(crate) fn begin(&mut self, data: &[u8]) -> negstream_core::Result<Vec<u8>> {
        if self.in_flight {
            return Err(CoreError::InvalidOperation(
                "write side unusable after an interrupted write".into(),
            ));
        }
        let sealer = self
            .sealer
            .as_mut()
            .ok_or_else(|| CoreError::InvalidOperation("not yet authenticated".into()))?;
        let wire = sealer.seal_to_wire(data)?;
        self.in_flight = !wire.is_empty();
        Ok(wire)
    }

    pub(crate) fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Whether a clean end-of-stream frame can still be written.
    pub(crate) fn can_close(&self) -> bool {
        self.sealer.is_some() && !self.in_flight
    }

    pub(crate) fn release(&mut self) {
        self.sealer = None;
    }
}

/// Cancellation token watched by a tokio stream.
///
/// A token stays cancelled once triggered, so the watch disarms after the first operation
/// it interrupts. Later operations run unaffected until a new token is installed. Clones
/// share the disarmed flag, so both halves of a split stream consume one cancellation.
#[derive(Clone, Default)]
pub(crate) struct CancelWatch {
    token: Option<CancellationToken>,
    spent: Arc<AtomicBool>,
}

impl CancelWatch {
    pub(crate) fn new(token: Option<CancellationToken>) -> Self {
        Self {
            token,
            spent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The token, unless it already interrupted an operation.
    pub(crate) fn armed(&self) -> Option<&CancellationToken> {
        self.token
            .as_ref()
            .filter(|_| !self.spent.load(Ordering::Acquire))
    }

    /// Consume a cancellation that fired before the operation started.
    pub(crate) fn take_cancelled(&self) -> bool {
        if self.armed().is_some_and(CancellationToken::is_cancelled) {
            self.spend();
            return true;
        }
        false
    }

    pub(crate) fn spend(&self) {
        if !self.spent.swap(true, Ordering::AcqRel) {
            tracing::debug!("cancellation consumed");
        }
    }
}

/// Encoded zero-length frame.
pub(crate) fn end_of_stream_bytes() -> Vec<u8> {
    (0u32).to_le_bytes().to_vec()
}

/// Bytes announcing a local handshake failure to the peer, if it should hear about it.
pub(crate) fn abort_notice(session: &mut Session, error: &CoreError) -> Option<Vec<u8>> {
    if !Session::should_notify_peer(error) {
        return None;
    }
    session.take_abort_notice().serialize().ok()
}

/// Whether an I/O error is a transport timeout.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Record an I/O failure during the handshake. Handshakes never resume, so any failure
/// is terminal.
pub(crate) fn handshake_io_error(session: &mut Session, err: io::Error) -> Error {
    if is_timeout(&err) {
        return Error::Protocol(session.fail(CoreError::TimedOut));
    }
    session.fail(CoreError::HandshakeAborted);
    Error::Io(err)
}

/// Map an I/O failure after the handshake. Timeouts leave the session usable.
pub(crate) fn data_io_error(err: io::Error) -> Error {
    if is_timeout(&err) {
        Error::Protocol(CoreError::TimedOut)
    } else {
        Error::Io(err)
    }
}
