//! Session management and handshake state machine.
//!
//! Implements:
//! - The token-exchange loop between the local role and a [`Mechanism`]
//! - Capability validation against the caller's requirements
//! - Read/write gating on handshake state
//!
//! The session performs no I/O. A driver (blocking or async, see `negstream-transport`)
//! writes the frames a [`Transition`] asks for and feeds back every frame it reads, so
//! both calling conventions share exactly this loop.

use crate::{
    frame::{Frame, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_TOKEN_SIZE},
    mechanism::{
        Capabilities, HandshakeParams, Identity, ImpersonationLevel, Mechanism, ProtectionLevel,
        Role, Status, Step,
    },
    observer::SessionObserver,
    seal::{FrameSealer, FrameUnsealer},
    Error, Result,
};
use std::sync::Arc;

/// Capabilities the caller insists on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    /// Minimum message protection.
    pub protection: ProtectionLevel,
    /// Whether the peer must have authenticated itself too.
    pub mutual_authentication: bool,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            protection: ProtectionLevel::EncryptAndSign,
            mutual_authentication: false,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest handshake token accepted from the peer.
    pub max_token_size: usize,
    /// Largest sealed frame payload accepted from the peer.
    pub max_frame_size: usize,
    /// Capabilities the negotiated context must provide.
    pub requirements: Requirements,
    /// Impersonation level requested from the mechanism.
    pub impersonation: ImpersonationLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_token_size: DEFAULT_MAX_TOKEN_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            requirements: Requirements::default(),
            impersonation: ImpersonationLevel::default(),
        }
    }
}

/// Observable handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No authenticate call yet.
    NotStarted,
    /// Token exchange running.
    InProgress,
    /// Context established; data may flow.
    Succeeded,
    /// Terminal failure; the session is unusable.
    Failed,
}

/// What the driver must do after a handshake step.
#[derive(Debug, PartialEq, Eq)]
pub struct Transition {
    /// Frame to write to the transport first, if any.
    pub send: Option<Frame>,
    /// What follows the write.
    pub next: Next,
}

/// Continuation of the handshake after a [`Transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Read the next frame and pass it to [`Session::receive_token`].
    AwaitToken,
    /// Handshake complete; take the codec with [`Session::take_codec`].
    Complete,
}

/// Internal states.
enum SessionState {
    /// Initial state, no handshake started.
    NotStarted,
    /// Waiting for the peer's next token.
    AwaitingToken { mechanism: Box<dyn Mechanism> },
    /// Handshake complete, application data allowed.
    Established {
        capabilities: Capabilities,
        identity: Identity,
    },
    /// Handshake or data failure.
    Failed { error: Error },
    /// Closed by the owner.
    Closed { was_established: bool },
}

/// Session state machine for one endpoint of a connection.
pub struct Session {
    role: Role,
    config: SessionConfig,
    state: SessionState,
    target_name: Option<String>,
    /// Codec produced at the Succeeded transition, until the driver takes it.
    codec: Option<(FrameSealer, FrameUnsealer)>,
    /// Error token from a rejecting mechanism, sent in place of the bare abort frame.
    notice: Option<Frame>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Session {
    /// Create a new session with the given role.
    pub fn new(role: Role) -> Self {
        Self::with_config(role, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(role: Role, config: SessionConfig) -> Self {
        Self {
            role,
            config,
            state: SessionState::NotStarted,
            target_name: None,
            codec: None,
            notice: None,
            observer: None,
        }
    }

    /// Attach a lifecycle observer.
    pub fn set_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    /// Get current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        match self.state {
            SessionState::NotStarted => HandshakeState::NotStarted,
            SessionState::AwaitingToken { .. } => HandshakeState::InProgress,
            SessionState::Established { .. } => HandshakeState::Succeeded,
            SessionState::Failed { .. } => HandshakeState::Failed,
            SessionState::Closed { was_established } => {
                if was_established {
                    HandshakeState::Succeeded
                } else {
                    HandshakeState::Failed
                }
            }
        }
    }

    /// Check if handshake is complete and the session is open.
    pub fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established { .. })
    }

    /// Negotiated capabilities (only after success).
    pub fn capabilities(&self) -> Option<Capabilities> {
        match &self.state {
            SessionState::Established { capabilities, .. } => Some(*capabilities),
            _ => None,
        }
    }

    /// Remote identity (only after success).
    pub fn remote_identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Established { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// Target name the initiator authenticated against.
    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    /// Terminal error recorded when the session failed.
    pub fn failure(&self) -> Option<&Error> {
        match &self.state {
            SessionState::Failed { error } => Some(error),
            _ => None,
        }
    }

    // === Handshake ===

    /// Start the handshake with the mechanism selected for this session.
    ///
    /// The initiator's first token is returned for sending; the acceptor is told to
    /// wait for the peer.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if authentication was already attempted on this session.
    pub fn begin(
        &mut self,
        mut mechanism: Box<dyn Mechanism>,
        target_name: Option<&str>,
    ) -> Result<Transition> {
        match self.state {
            SessionState::NotStarted => {}
            SessionState::AwaitingToken { .. } => {
                // A previous handshake was interrupted mid-flight; handshakes do not resume.
                return Err(self.fail(Error::invalid(
                    "authentication already attempted; the previous handshake was interrupted",
                )));
            }
            _ => return Err(Error::invalid("authentication already attempted")),
        }

        tracing::debug!(role = ?self.role, spn = target_name, "handshake start");
        if let Some(observer) = &self.observer {
            observer.on_handshake_start(self.role);
        }

        self.target_name = target_name.map(str::to_owned);
        let params = HandshakeParams {
            role: self.role,
            target_name: self.target_name.clone(),
            protection: self.config.requirements.protection,
            impersonation: self.config.impersonation,
        };
        if let Err(e) = mechanism.start(&params) {
            return Err(self.fail(e));
        }

        match self.role {
            Role::Initiator => {
                let step = mechanism.step(None);
                self.apply_step(mechanism, step)
            }
            Role::Acceptor => {
                self.state = SessionState::AwaitingToken { mechanism };
                Ok(Transition {
                    send: None,
                    next: Next::AwaitToken,
                })
            }
        }
    }

    /// Feed the peer's next handshake frame.
    ///
    /// `None` means the transport reached EOF.
    pub fn receive_token(&mut self, frame: Option<Frame>) -> Result<Transition> {
        let mechanism = match std::mem::replace(&mut self.state, SessionState::NotStarted) {
            SessionState::AwaitingToken { mechanism } => mechanism,
            old_state => {
                self.state = old_state;
                return Err(Error::invalid("no handshake in progress"));
            }
        };

        let frame = match frame {
            Some(frame) if !frame.is_end_of_stream() => frame,
            _ => return Err(self.fail(Error::HandshakeAborted)),
        };
        if frame.payload().len() > self.config.max_token_size {
            return Err(self.fail(Error::ProtocolViolation(format!(
                "Handshake token of {} bytes exceeds limit of {}",
                frame.payload().len(),
                self.config.max_token_size
            ))));
        }

        tracing::trace!(len = frame.payload().len(), "handshake token received");
        let mut mechanism = mechanism;
        let step = mechanism.step(Some(frame.payload()));
        self.apply_step(mechanism, step)
    }

    fn apply_step(&mut self, mechanism: Box<dyn Mechanism>, step: Step) -> Result<Transition> {
        match step.status {
            Status::Ok => {}
            Status::Rejected(reason) => {
                self.notice = step.token_out.filter(|t| !t.is_empty()).map(Frame::new);
                return Err(self.fail(Error::Authentication(reason)));
            }
            Status::InvalidToken(reason) => {
                return Err(self.fail(Error::ProtocolViolation(format!(
                    "Invalid handshake token: {}",
                    reason
                ))))
            }
        }

        let send = step
            .token_out
            .filter(|token| !token.is_empty())
            .map(Frame::new);
        if let Some(frame) = &send {
            tracing::trace!(len = frame.payload().len(), "handshake token produced");
        }

        if !step.done {
            self.state = SessionState::AwaitingToken { mechanism };
            return Ok(Transition {
                send,
                next: Next::AwaitToken,
            });
        }

        self.complete(mechanism)?;
        Ok(Transition {
            send,
            next: Next::Complete,
        })
    }

    fn complete(&mut self, mechanism: Box<dyn Mechanism>) -> Result<()> {
        let (capabilities, identity) =
            match (mechanism.capabilities(), mechanism.remote_identity()) {
                (Some(caps), Some(identity)) => (caps, identity),
                _ => {
                    return Err(self.fail(Error::ProtocolViolation(
                        "Mechanism completed without a security context".into(),
                    )))
                }
            };

        let requirements = self.config.requirements;
        if !capabilities.satisfies(requirements.protection) {
            return Err(self.fail(Error::CapabilityUnmet(format!(
                "{:?} requested but negotiated {:?}",
                requirements.protection, capabilities
            ))));
        }
        if requirements.mutual_authentication && !capabilities.is_mutual {
            return Err(self.fail(Error::CapabilityUnmet(
                "mutual authentication required".into(),
            )));
        }

        let (sealer, unsealer) = match mechanism.into_protection() {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail(e)),
        };
        self.codec = Some((
            FrameSealer::new(capabilities, sealer),
            FrameUnsealer::new(capabilities, unsealer),
        ));

        tracing::info!(
            role = ?self.role,
            peer = %identity.name,
            package = %identity.authentication_type,
            mutual = capabilities.is_mutual,
            encrypted = capabilities.can_encrypt,
            "authenticated"
        );
        if let Some(observer) = &self.observer {
            observer.on_authenticated(self.role, &identity);
        }
        self.state = SessionState::Established {
            capabilities,
            identity,
        };
        Ok(())
    }

    /// Take the frame codec produced by a successful handshake. Yields it once.
    pub fn take_codec(&mut self) -> Option<(FrameSealer, FrameUnsealer)> {
        self.codec.take()
    }

    // === Failure and gating ===

    /// Record a terminal failure raised outside the state machine (transport error,
    /// timeout, cancellation, integrity failure). Returns the error for propagation.
    pub fn fail(&mut self, error: Error) -> Error {
        if matches!(self.state, SessionState::Closed { .. }) {
            return error;
        }
        tracing::warn!(role = ?self.role, error = %error, "session failed");
        if let Some(observer) = &self.observer {
            observer.on_failure(self.role, &error);
        }
        self.codec = None;
        self.state = SessionState::Failed {
            error: error.clone(),
        };
        error
    }

    /// Whether a local failure should be announced to a waiting peer with an
    /// end-of-stream frame.
    pub fn should_notify_peer(error: &Error) -> bool {
        matches!(
            error,
            Error::Authentication(_) | Error::ProtocolViolation(_) | Error::CapabilityUnmet(_)
        )
    }

    /// Frame telling the peer the handshake failed locally.
    ///
    /// The mechanism's error token if it produced one, otherwise end-of-stream.
    pub fn take_abort_notice(&mut self) -> Frame {
        self.notice.take().unwrap_or_else(Frame::end_of_stream)
    }

    /// Gate for read and write.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` before success, after failure, or after close.
    pub fn ensure_established(&self) -> Result<()> {
        match &self.state {
            SessionState::Established { .. } => Ok(()),
            SessionState::NotStarted | SessionState::AwaitingToken { .. } => {
                Err(Error::invalid("not yet authenticated"))
            }
            SessionState::Failed { error } => Err(Error::InvalidOperation(format!(
                "session failed: {}",
                error
            ))),
            SessionState::Closed { .. } => Err(Error::invalid("session closed")),
        }
    }

    /// Mark the session closed. Returns `false` if it already was.
    pub fn close(&mut self) -> bool {
        if let SessionState::Closed { .. } = self.state {
            return false;
        }
        let was_established = self.is_established();
        self.codec = None;
        self.state = SessionState::Closed { was_established };
        tracing::debug!(role = ?self.role, "session closed");
        if let Some(observer) = &self.observer {
            observer.on_close(self.role);
        }
        true
    }
}
