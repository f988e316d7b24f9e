//! Stream configuration.

use negstream_core::{SessionConfig, SessionObserver};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for a [`crate::NegotiateStream`] or [`crate::AsyncNegotiateStream`].
///
/// Timeouts and the cancellation token apply to the tokio stream. The blocking stream relies
/// on the transport's own timeouts (see [`crate::tcp`]); a transport timeout surfaces as
/// `TimedOut` either way.
#[derive(Clone, Default)]
pub struct StreamConfig {
    /// Handshake limits and requirements.
    pub session: SessionConfig,
    /// Keep the transport open when the stream is closed.
    pub leave_inner_stream_open: bool,
    /// Deadline for the whole handshake.
    pub handshake_timeout: Option<Duration>,
    /// Deadline for each read, write or flush after the handshake.
    pub io_timeout: Option<Duration>,
    /// Cancels the handshake, read, write or flush pending when triggered, or the next one
    /// started. Each firing interrupts one operation; a cancelled handshake fails the session.
    pub cancel: Option<CancellationToken>,
    /// Lifecycle hooks.
    pub observer: Option<Arc<dyn SessionObserver>>,
}

impl StreamConfig {
    /// Set the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Set the per-operation deadline.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach an observer.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("session", &self.session)
            .field("leave_inner_stream_open", &self.leave_inner_stream_open)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("cancel", &self.cancel.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
