//! Tokio negotiate stream.
//!
//! Every transport operation runs under [`StreamConfig::handshake_timeout`] or
//! [`StreamConfig::io_timeout`]. The cancellation token interrupts the handshake, read,
//! write or flush pending when it fires (or the next one started); close only honours the
//! timeout.

use crate::{
    config::StreamConfig,
    driver::{self, CancelWatch, ReadSide, WriteSide},
    Error, Result,
};
use negstream_core::{
    Capabilities, Error as CoreError, Frame, HandshakeState, Identity, ImpersonationLevel,
    Mechanism, Next, Role, Session, SessionObserver,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Run `fut` under an optional deadline and cancellation watch.
///
/// Cancellation wins over completion when both are ready, and disarms the watch.
async fn guard<F: Future>(
    timeout: Option<Duration>,
    cancel: &CancelWatch,
    fut: F,
) -> std::result::Result<F::Output, CoreError> {
    let cancelled = async {
        match cancel.armed() {
            Some(token) => {
                token.cancelled().await;
                cancel.spend();
            }
            None => std::future::pending().await,
        }
    };
    let timed = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| CoreError::TimedOut),
            None => Ok(fut.await),
        }
    };
    tokio::select! {
        biased;
        _ = cancelled => Err(CoreError::Cancelled),
        outcome = timed => outcome,
    }
}

/// Read one frame; `None` on clean transport EOF at a frame boundary.
///
/// Cancel-safe: partial header or payload bytes stay in the [`ReadSide`] reader.
async fn read_frame<R: AsyncRead + Unpin>(
    inner: &mut R,
    side: &mut ReadSide,
) -> Result<Option<Frame>> {
    loop {
        let n = inner.read(side.reader.want()).await?;
        if n == 0 {
            side.transport_eof()?;
            return Ok(None);
        }
        if let Some(frame) = side.reader.advance(n)? {
            return Ok(Some(frame));
        }
    }
}

/// Outcome of one guarded data read before session bookkeeping.
enum ReadOutcome {
    Done(usize),
    /// Timed out or cancelled; partial state is kept.
    Interrupted(CoreError),
    /// Transport failure that is not a timeout.
    Io(std::io::Error),
    /// Framing or unsealing failure; the stream is unusable.
    Fatal(CoreError),
}

async fn read_data<R: AsyncRead + Unpin>(
    inner: &mut R,
    side: &mut ReadSide,
    timeout: Option<Duration>,
    cancel: &CancelWatch,
    buf: &mut [u8],
) -> ReadOutcome {
    if let Some(n) = side.buffered(buf) {
        return ReadOutcome::Done(n);
    }
    if cancel.take_cancelled() {
        return ReadOutcome::Interrupted(CoreError::Cancelled);
    }
    loop {
        let frame = match guard(timeout, cancel, read_frame(inner, side)).await {
            Err(interrupted) => return ReadOutcome::Interrupted(interrupted),
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return ReadOutcome::Done(0),
            Ok(Err(Error::Io(e))) => match driver::data_io_error(e) {
                Error::Protocol(e) => return ReadOutcome::Interrupted(e),
                Error::Io(e) => return ReadOutcome::Io(e),
                other => return ReadOutcome::Io(other.into()),
            },
            Ok(Err(Error::Protocol(e))) => return ReadOutcome::Fatal(e),
            Ok(Err(other)) => return ReadOutcome::Io(other.into()),
        };
        match side.deliver(frame, buf) {
            Ok(Some(n)) => return ReadOutcome::Done(n),
            Ok(None) => continue,
            Err(e) => return ReadOutcome::Fatal(e),
        }
    }
}

async fn write_data<W: AsyncWrite + Unpin>(
    inner: &mut W,
    side: &mut WriteSide,
    timeout: Option<Duration>,
    cancel: &CancelWatch,
    data: &[u8],
) -> Result<()> {
    // Nothing is sealed for a write cancelled before it started.
    if cancel.take_cancelled() {
        return Err(Error::Protocol(CoreError::Cancelled));
    }
    let wire = side.begin(data)?;
    if wire.is_empty() {
        return Ok(());
    }
    match guard(timeout, cancel, inner.write_all(&wire)).await {
        Ok(Ok(())) => {
            side.finish();
            Ok(())
        }
        Ok(Err(e)) => Err(driver::data_io_error(e)),
        Err(interrupted) => Err(Error::Protocol(interrupted)),
    }
}

async fn flush_transport<W: AsyncWrite + Unpin>(
    inner: &mut W,
    timeout: Option<Duration>,
    cancel: &CancelWatch,
) -> Result<()> {
    if cancel.take_cancelled() {
        return Err(Error::Protocol(CoreError::Cancelled));
    }
    match guard(timeout, cancel, inner.flush()).await {
        Ok(flushed) => flushed.map_err(driver::data_io_error),
        Err(interrupted) => Err(Error::Protocol(interrupted)),
    }
}

/// Write end-of-stream if `announce`, flush, and shut down unless `leave_open`.
///
/// Bounded by `timeout` only; a cancellation never skips the end-of-stream frame.
async fn close_transport<W: AsyncWrite + Unpin>(
    inner: &mut W,
    timeout: Option<Duration>,
    announce: bool,
    leave_open: bool,
) -> Result<()> {
    let closing = async {
        if announce {
            inner.write_all(&driver::end_of_stream_bytes()).await?;
        }
        inner.flush().await?;
        if !leave_open {
            inner.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    match guard(timeout, &CancelWatch::default(), closing).await {
        Ok(closed) => closed.map_err(Error::Io),
        Err(interrupted) => Err(Error::Protocol(interrupted)),
    }
}

/// Authenticated, optionally sealed stream over a tokio transport.
///
/// # Example
///
/// ```no_run
/// use negstream_mechanism::{Keytab, NegotiateAcceptor, Realm};
/// use negstream_transport::AsyncNegotiateStream;
/// use std::sync::Arc;
/// use tokio::net::TcpListener;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let realm = Arc::new(Realm::linux_contoso());
/// let keytab = realm.keytab(["HOST/localhost"])?;
///
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let (socket, _) = listener.accept().await?;
/// let mut stream = AsyncNegotiateStream::new(socket);
/// stream
///     .authenticate_as_server(Box::new(NegotiateAcceptor::new(realm, keytab)))
///     .await?;
///
/// let mut buf = [0u8; 1024];
/// while stream.read(&mut buf).await? > 0 {}
/// stream.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncNegotiateStream<S> {
    inner: Option<S>,
    config: StreamConfig,
    cancel: CancelWatch,
    session: Session,
    read_side: ReadSide,
    write_side: WriteSide,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncNegotiateStream<S> {
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
            cancel: CancelWatch::new(config.cancel.clone()),
            config,
        }
    }

    /// Replace the cancellation token, re-arming cancellation after a previous token fired.
    pub fn set_cancel_token(&mut self, token: Option<CancellationToken>) {
        self.cancel = CancelWatch::new(token);
    }

    /// Authenticate as the initiator against `target_name`.
    ///
    /// # Errors
    ///
    /// As [`crate::NegotiateStream::authenticate_as_client`], plus `TimedOut` and
    /// `Cancelled`. Either leaves the session Failed.
    pub async fn authenticate_as_client(
        &mut self,
        mechanism: Box<dyn Mechanism>,
        target_name: &str,
    ) -> Result<()> {
        self.authenticate(Role::Initiator, mechanism, Some(target_name))
            .await
    }

    /// Authenticate as the acceptor.
    pub async fn authenticate_as_server(&mut self, mechanism: Box<dyn Mechanism>) -> Result<()> {
        self.authenticate(Role::Acceptor, mechanism, None).await
    }

    async fn authenticate(
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
        let timeout = self.config.handshake_timeout;
        let cancel = self.cancel.clone();
        match guard(timeout, &cancel, self.run_handshake(mechanism, target_name)).await
        {
            Ok(outcome) => outcome,
            Err(interrupted) => Err(Error::Protocol(self.session.fail(interrupted))),
        }
    }

    async fn run_handshake(
        &mut self,
        mechanism: Box<dyn Mechanism>,
        target_name: Option<&str>,
    ) -> Result<()> {
        let mut transition = match self.session.begin(mechanism, target_name) {
            Ok(transition) => transition,
            Err(e) => return Err(self.abort(e).await),
        };
        loop {
            if let Some(frame) = transition.send.take() {
                self.send_token(&frame).await?;
            }
            match transition.next {
                Next::Complete => break,
                Next::AwaitToken => {
                    let frame = self.recv_token().await?;
                    transition = match self.session.receive_token(frame) {
                        Ok(transition) => transition,
                        Err(e) => return Err(self.abort(e).await),
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

    async fn abort(&mut self, error: CoreError) -> Error {
        if let (Some(notice), Some(inner)) = (
            driver::abort_notice(&mut self.session, &error),
            self.inner.as_mut(),
        ) {
            let delivered = async {
                inner.write_all(&notice).await?;
                inner.flush().await
            };
            if let Err(e) = delivered.await {
                tracing::debug!(error = %e, "could not deliver abort notice");
            }
        }
        Error::Protocol(error)
    }

    async fn send_token(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.serialize()?;
        let inner = self.inner.as_mut().ok_or_else(closed)?;
        let sent = async {
            inner.write_all(&bytes).await?;
            inner.flush().await
        };
        sent.await
            .map_err(|e| driver::handshake_io_error(&mut self.session, e))
    }

    async fn recv_token(&mut self) -> Result<Option<Frame>> {
        let inner = self.inner.as_mut().ok_or_else(closed)?;
        match read_frame(inner, &mut self.read_side).await {
            Ok(frame) => Ok(frame),
            Err(Error::Io(e)) => Err(driver::handshake_io_error(&mut self.session, e)),
            Err(Error::Protocol(e)) => Err(Error::Protocol(self.session.fail(e))),
            Err(e) => Err(e),
        }
    }

    /// Read decrypted application bytes into `buf`.
    ///
    /// Returns `Ok(0)` only at end of stream. A timed-out or cancelled read keeps any
    /// partially received frame and may be retried.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.session.ensure_established()?;
        let inner = self.inner.as_mut().ok_or_else(closed)?;
        let outcome = read_data(
            inner,
            &mut self.read_side,
            self.config.io_timeout,
            &self.cancel,
            buf,
        )
        .await;
        match outcome {
            ReadOutcome::Done(n) => Ok(n),
            ReadOutcome::Interrupted(e) => Err(Error::Protocol(e)),
            ReadOutcome::Io(e) => Err(Error::Io(e)),
            ReadOutcome::Fatal(e) => Err(Error::Protocol(self.session.fail(e))),
        }
    }

    /// Seal `data` and write every resulting frame.
    ///
    /// A write cancelled before it starts seals nothing and can be retried. A write that
    /// times out or is cancelled while its frames are being written leaves the write
    /// direction unusable; later writes fail with `InvalidOperation`.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.session.ensure_established()?;
        let inner = self.inner.as_mut().ok_or_else(closed)?;
        let outcome = write_data(
            inner,
            &mut self.write_side,
            self.config.io_timeout,
            &self.cancel,
            data,
        )
        .await;
        match outcome {
            Err(Error::Protocol(e)) if e.is_terminal() => {
                Err(Error::Protocol(self.session.fail(e)))
            }
            outcome => outcome,
        }
    }

    /// Flush the transport, waiting for it to complete.
    pub async fn flush(&mut self) -> Result<()> {
        match self.inner.as_mut() {
            Some(inner) => flush_transport(inner, self.config.io_timeout, &self.cancel).await,
            None => Ok(()),
        }
    }

    /// Send end-of-stream, release the session and shut the transport down unless
    /// `leave_inner_stream_open` is set. Closing twice is a no-op. The cancellation token
    /// does not apply.
    pub async fn close(&mut self) -> Result<()> {
        let announce = self.session.is_established() && self.write_side.can_close();
        if !self.session.close() {
            return Ok(());
        }
        self.read_side.release();
        self.write_side.release();

        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        let leave_open = self.config.leave_inner_stream_open;
        let outcome = close_transport(inner, self.config.io_timeout, announce, leave_open).await;
        if !leave_open {
            self.inner = None;
        }
        outcome
    }

    /// Alias for [`AsyncNegotiateStream::close`].
    pub async fn shutdown(&mut self) -> Result<()> {
        self.close().await
    }

    /// Split into halves that read and write concurrently.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` unless the handshake succeeded and the stream is open.
    pub fn into_split(mut self) -> Result<(ReadHalf<S>, WriteHalf<S>)> {
        self.session.ensure_established()?;
        let inner = self.inner.take().ok_or_else(closed)?;
        let (reader, writer) = tokio::io::split(inner);
        let hooks = Hooks {
            role: self.session.role(),
            observer: self.config.observer.clone(),
        };
        Ok((
            ReadHalf {
                inner: reader,
                side: self.read_side,
                timeout: self.config.io_timeout,
                cancel: self.cancel.clone(),
                hooks: hooks.clone(),
                failure: None,
            },
            WriteHalf {
                inner: writer,
                side: self.write_side,
                timeout: self.config.io_timeout,
                cancel: self.cancel,
                hooks,
                leave_open: self.config.leave_inner_stream_open,
                closed: false,
            },
        ))
    }
}

/// Lifecycle reporting for the halves of a split stream.
#[derive(Clone)]
struct Hooks {
    role: Role,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Hooks {
    fn failure(&self, error: &CoreError) {
        tracing::warn!(role = ?self.role, error = %error, "split stream failed");
        if let Some(observer) = &self.observer {
            observer.on_failure(self.role, error);
        }
    }

    fn close(&self) {
        tracing::debug!(role = ?self.role, "split stream closed");
        if let Some(observer) = &self.observer {
            observer.on_close(self.role);
        }
    }
}

fn closed() -> Error {
    Error::Protocol(CoreError::InvalidOperation("session closed".into()))
}

impl<S> AsyncNegotiateStream<S> {
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

    /// The transport, unless already released.
    pub fn get_ref(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    /// Mutable access to the transport.
    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.inner.as_mut()
    }

    /// Take the transport back.
    pub fn into_inner(self) -> Option<S> {
        self.inner
    }
}

/// Receiving half of a split [`AsyncNegotiateStream`].
pub struct ReadHalf<S> {
    inner: tokio::io::ReadHalf<S>,
    side: ReadSide,
    timeout: Option<Duration>,
    cancel: CancelWatch,
    hooks: Hooks,
    failure: Option<CoreError>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ReadHalf<S> {
    /// Read decrypted application bytes. Same contract as [`AsyncNegotiateStream::read`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(failure) = &self.failure {
            return Err(Error::Protocol(CoreError::InvalidOperation(format!(
                "session failed: {}",
                failure
            ))));
        }
        let outcome =
            read_data(&mut self.inner, &mut self.side, self.timeout, &self.cancel, buf).await;
        match outcome {
            ReadOutcome::Done(n) => Ok(n),
            ReadOutcome::Interrupted(e) => Err(Error::Protocol(e)),
            ReadOutcome::Io(e) => Err(Error::Io(e)),
            ReadOutcome::Fatal(e) => {
                self.hooks.failure(&e);
                self.side.release();
                self.failure = Some(e.clone());
                Err(Error::Protocol(e))
            }
        }
    }
}

/// Sending half of a split [`AsyncNegotiateStream`].
pub struct WriteHalf<S> {
    inner: tokio::io::WriteHalf<S>,
    side: WriteSide,
    timeout: Option<Duration>,
    cancel: CancelWatch,
    hooks: Hooks,
    leave_open: bool,
    closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WriteHalf<S> {
    /// Seal and write `data`. Same contract as [`AsyncNegotiateStream::write`].
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(closed());
        }
        let outcome =
            write_data(&mut self.inner, &mut self.side, self.timeout, &self.cancel, data).await;
        if let Err(Error::Protocol(e)) = &outcome {
            if e.is_terminal() {
                self.hooks.failure(e);
            }
        }
        outcome
    }

    /// Flush the transport.
    pub async fn flush(&mut self) -> Result<()> {
        flush_transport(&mut self.inner, self.timeout, &self.cancel).await
    }

    /// Send end-of-stream and shut down the write direction unless
    /// `leave_inner_stream_open` is set.
    pub async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let announce = self.side.can_close();
        self.side.release();
        self.hooks.close();
        close_transport(&mut self.inner, self.timeout, announce, self.leave_open).await
    }
}
