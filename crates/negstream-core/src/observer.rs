//! Hook points for surrounding tooling.
//!
//! Sessions carry no counters of their own. Tooling that wants telemetry implements
//! [`SessionObserver`] and attaches it to a stream; every method has a no-op default.

use crate::{mechanism::Identity, Error, Role};

/// Receives session lifecycle events.
pub trait SessionObserver: Send + Sync {
    /// A handshake started.
    fn on_handshake_start(&self, _role: Role) {}

    /// A handshake completed successfully.
    fn on_authenticated(&self, _role: Role, _remote: &Identity) {}

    /// A handshake or data operation failed terminally.
    fn on_failure(&self, _role: Role, _error: &Error) {}

    /// The session was closed.
    fn on_close(&self, _role: Role) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
