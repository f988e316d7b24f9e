//! Blocking negotiate stream over any `std::io::Read + Write` transport.

use crate::{
    config::StreamConfig,
    driver::{self, ReadSide, WriteSide},
    Error, Result,
};
use negstream_core::{
    Capabilities, Error as CoreError, Frame, HandshakeState, Identity, ImpersonationLevel,
    Mechanism, Next, Role, Session,
};
use std::io::{self, Read, Write};

/// Authenticated, optionally sealed stream over a blocking transport.
///
/// # Example
///
/// ```no_run
/// use negstream_mechanism::{Credential, NegotiateInitiator, Realm};
/// use negstream_transport::NegotiateStream;
/// use std::net::TcpStream;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let realm = Arc::new(Realm::linux_contoso());
/// let mechanism = NegotiateInitiator::new(realm, Credential::new("user1", "password"));
///
/// let mut stream = NegotiateStream::new(TcpStream::connect("127.0.0.1:8080")?);
/// stream.authenticate_as_client(Box::new(mechanism), "HOST/localhost")?;
/// stream.write(b"hello")?;
/// stream.close()?;
/// # Ok(())
/// # }
/// ```
pub struct NegotiateStream<S> {
    inner: Option<S>,
    config: StreamConfig,
    session: Session,
    read_side: ReadSide,
    write_side: WriteSide,
}

impl<S: Read + Write> NegotiateStream<S> {
    /// Wrap `inner` with default configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, StreamConfig::default())
    }

    /// Wrap `inner`.
    pub fn with_config(inner: S, config: StreamConfig) -> Self {
        Self {
            inner: Some(inner),
            read_side: ReadSide::new(config.session.max_token_size),
            write_side: WriteSide::new(),
            session: Session::with_config(Role::Initiator, config.session.clone()),
            config,
        }
    }

    /// Authenticate as the initiator against `target_name`.
    ///
    /// # Errors
    ///
    /// `Authentication` if the mechanism rejects the credential or the target,
    /// `HandshakeAborted` if the peer gives up, `CapabilityUnmet` if the negotiated
    /// context is weaker than required, `InvalidOperation` on a second attempt.
    pub fn authenticate_as_client(
        &mut self,
        mechanism: Box<dyn Mechanism>,
        target_name: &str,
    ) -> Result<()> {
        self.authenticate(Role::Initiator, mechanism, Some(target_name))
    }

    /// Authenticate as the acceptor.
    pub fn authenticate_as_server(&mut self, mechanism: Box<dyn Mechanism>) -> Result<()> {
        self.authenticate(Role::Acceptor, mechanism, None)
    }

    fn authenticate(
        &mut self,
        role: Role,
        mechanism: Box<dyn Mechanism>,
        target_name: Option<&str>,
    ) -> Result<()> {
        if self.session.state() == HandshakeState::NotStarted {
            self.session = Session::with_config(role, self.config.session.clone());
            if let Some(observer) = &self.config.observer {
                self.session.set_observer(observer.clone());
            }
        }

        let mut transition = match self.session.begin(mechanism, target_name) {
            Ok(transition) => transition,
            Err(e) => return Err(self.abort(e)),
        };
        loop {
            if let Some(frame) = transition.send.take() {
                self.send_token(&frame)?;
            }
            match transition.next {
                Next::Complete => break,
                Next::AwaitToken => {
                    let frame = self.recv_token()?;
                    transition = match self.session.receive_token(frame) {
                        Ok(transition) => transition,
                        Err(e) => return Err(self.abort(e)),
                    };
                }
            }
        }

        match self.session.take_codec() {
            Some((sealer, unsealer)) => {
                self.read_side
                    .install(unsealer, self.config.session.max_frame_size);
                self.write_side.install(sealer);
                Ok(())
            }
            None => Err(Error::Protocol(self.session.fail(CoreError::ProtocolViolation(
                "handshake completed without a frame codec".into(),
            )))),
        }
    }

    /// Tell the peer the handshake failed, best effort, and surface the error.
    fn abort(&mut self, error: CoreError) -> Error {
        if let (Some(notice), Some(inner)) = (
            driver::abort_notice(&mut self.session, &error),
            self.inner.as_mut(),
        ) {
            if let Err(e) = inner.write_all(&notice).and_then(|_| inner.flush()) {
                tracing::debug!(error = %e, "could not deliver abort notice");
            }
        }
        Error::Protocol(error)
    }

    fn send_token(&mut self, frame: &Frame) -> Result<()> {
        let inner = self.transport()?;
        let bytes = frame.serialize()?;
        let sent = inner.write_all(&bytes).and_then(|_| inner.flush());
        sent.map_err(|e| driver::handshake_io_error(&mut self.session, e))
    }

    fn recv_token(&mut self) -> Result<Option<Frame>> {
        match self.read_frame() {
            Ok(frame) => Ok(frame),
            Err(Error::Io(e)) => Err(driver::handshake_io_error(&mut self.session, e)),
            Err(Error::Protocol(e)) => Err(Error::Protocol(self.session.fail(e))),
            Err(e) => Err(e),
        }
    }

    /// Read one frame; `None` on clean transport EOF at a frame boundary.
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| CoreError::InvalidOperation("session closed".into()))?;
        loop {
            let want = self.read_side.reader.want();
            let n = match inner.read(want) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };
            if n == 0 {
                self.read_side.transport_eof()?;
                return Ok(None);
            }
            if let Some(frame) = self.read_side.reader.advance(n)? {
                return Ok(Some(frame));
            }
        }
    }

    fn transport(&mut self) -> Result<&mut S> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::Protocol(CoreError::InvalidOperation("session closed".into())))
    }

    /// Read decrypted application bytes into `buf`.
    ///
    /// Returns `Ok(0)` only at end of stream. A read never spans more than one frame, so
    /// it may return fewer bytes than are in flight.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.session.ensure_established()?;
        if let Some(n) = self.read_side.buffered(buf) {
            return Ok(n);
        }
        loop {
            let frame = match self.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(0),
                Err(Error::Io(e)) => return Err(driver::data_io_error(e)),
                Err(Error::Protocol(e)) if e.is_terminal() => {
                    return Err(Error::Protocol(self.session.fail(e)))
                }
                Err(e) => return Err(e),
            };
            match self.read_side.deliver(frame, buf) {
                Ok(Some(n)) => return Ok(n),
                Ok(None) => continue,
                Err(e) => return Err(Error::Protocol(self.session.fail(e))),
            }
        }
    }

    /// Seal `data` and write every resulting frame.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.session.ensure_established()?;
        let wire = match self.write_side.begin(data) {
            Ok(wire) => wire,
            Err(e) if e.is_terminal() => return Err(Error::Protocol(self.session.fail(e))),
            Err(e) => return Err(e.into()),
        };
        if wire.is_empty() {
            return Ok(());
        }
        let inner = self.transport()?;
        inner.write_all(&wire).map_err(driver::data_io_error)?;
        self.write_side.finish();
        Ok(())
    }

    /// Flush the transport.
    pub fn flush(&mut self) -> Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush().map_err(driver::data_io_error),
            None => Ok(()),
        }
    }

    /// Send end-of-stream and release the session.
    ///
    /// The transport is dropped unless `leave_inner_stream_open` is set. Closing twice is
    /// a no-op.
    pub fn close(&mut self) -> Result<()> {
        let announce = self.session.is_established() && self.write_side.can_close();
        if !self.session.close() {
            return Ok(());
        }
        self.read_side.release();
        self.write_side.release();

        let mut result = Ok(());
        if let Some(inner) = self.inner.as_mut() {
            if announce {
                result = inner
                    .write_all(&driver::end_of_stream_bytes())
                    .and_then(|_| inner.flush())
                    .map_err(Error::Io);
            }
        }
        if !self.config.leave_inner_stream_open {
            self.inner = None;
        }
        result
    }
}

impl<S> NegotiateStream<S> {
    /// Handshake progress.
    pub fn handshake_state(&self) -> HandshakeState {
        self.session.state()
    }

    /// Whether the handshake succeeded and the stream is open.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_established()
    }

    /// Negotiated capabilities.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.session.capabilities()
    }

    /// Whether frames are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.capabilities().is_some_and(|c| c.can_encrypt)
    }

    /// Whether frames are signed.
    pub fn is_signed(&self) -> bool {
        self.capabilities().is_some_and(|c| c.can_sign)
    }

    /// Whether both peers were authenticated.
    pub fn is_mutually_authenticated(&self) -> bool {
        self.capabilities().is_some_and(|c| c.is_mutual)
    }

    /// Whether this side authenticated as the acceptor.
    pub fn is_server(&self) -> bool {
        self.session.role() == Role::Acceptor
    }

    /// The authenticated peer.
    pub fn remote_identity(&self) -> Option<&Identity> {
        self.session.remote_identity()
    }

    /// Impersonation level requested for this session.
    pub fn impersonation_level(&self) -> ImpersonationLevel {
        self.config.session.impersonation
    }

    /// Whether closing leaves the transport open.
    pub fn leave_inner_stream_open(&self) -> bool {
        self.config.leave_inner_stream_open
    }

    /// The transport, unless already released by [`NegotiateStream::close`].
    pub fn get_ref(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    /// Mutable access to the transport. Writing to it directly corrupts the framing.
    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.inner.as_mut()
    }

    /// Take the transport back.
    pub fn into_inner(self) -> Option<S> {
        self.inner
    }
}

impl<S: Read + Write> Read for NegotiateStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        NegotiateStream::read(self, buf).map_err(io::Error::from)
    }
}

impl<S: Read + Write> Write for NegotiateStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        NegotiateStream::write(self, buf).map_err(io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        NegotiateStream::flush(self).map_err(io::Error::from)
    }
}
