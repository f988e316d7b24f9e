//! Mechanism adapter abstraction.
//!
//! A mechanism (Kerberos, NTLM, or whatever a negotiation layer resolved) is an opaque
//! step function over handshake tokens. The handshake engine never inspects tokens and
//! never branches on which mechanism it is driving.
//!
//! Implementations:
//! - `negstream-mechanism`: simulated Negotiate package (Kerberos- and NTLM-like)
//! - Testing: any type implementing [`Mechanism`]

use crate::Result;
use std::fmt;

/// Session role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiator (client): sends the first handshake token.
    Initiator,
    /// Acceptor (server): waits for the peer's first token.
    Acceptor,
}

/// Protection requested for post-handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProtectionLevel {
    /// Frames travel unmodified.
    None,
    /// Frames carry a MAC.
    Sign,
    /// Frames are encrypted and authenticated.
    #[default]
    EncryptAndSign,
}

/// How the acceptor may use the initiator's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImpersonationLevel {
    /// Acceptor can identify the client but not act as it.
    #[default]
    Identification,
    /// Acceptor can act as the client locally.
    Impersonation,
    /// Acceptor can act as the client on remote systems.
    Delegation,
}

/// Parameters handed to a mechanism before its first step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    /// Local role.
    pub role: Role,
    /// Service principal name the initiator authenticates against.
    pub target_name: Option<String>,
    /// Requested message protection.
    pub protection: ProtectionLevel,
    /// Requested impersonation level.
    pub impersonation: ImpersonationLevel,
}

/// Outcome status of one mechanism step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Step succeeded.
    Ok,
    /// Credential or target rejected.
    Rejected(String),
    /// Peer token could not be parsed.
    InvalidToken(String),
}

/// Result of one call to [`Mechanism::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Token to send to the peer; `None` or empty means nothing to send.
    pub token_out: Option<Vec<u8>>,
    /// Step status.
    pub status: Status,
    /// Whether the local side of the exchange is complete.
    pub done: bool,
}

impl Step {
    /// Successful step that still expects a peer token.
    pub fn continue_with(token: Vec<u8>) -> Self {
        Self {
            token_out: Some(token),
            status: Status::Ok,
            done: false,
        }
    }

    /// Successful final step, optionally with a last token for the peer.
    pub fn complete(token_out: Option<Vec<u8>>) -> Self {
        Self {
            token_out,
            status: Status::Ok,
            done: true,
        }
    }

    /// Rejection with a reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            token_out: None,
            status: Status::Rejected(reason.into()),
            done: true,
        }
    }

    /// Rejection that also hands the peer an error token explaining it.
    pub fn rejected_with_notice(reason: impl Into<String>, notice: Vec<u8>) -> Self {
        Self {
            token_out: Some(notice),
            status: Status::Rejected(reason.into()),
            done: true,
        }
    }

    /// Malformed peer token.
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self {
            token_out: None,
            status: Status::InvalidToken(reason.into()),
            done: true,
        }
    }
}

/// Negotiated message-protection capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Frames can be encrypted.
    pub can_encrypt: bool,
    /// Frames can be signed.
    pub can_sign: bool,
    /// Both peers verified each other.
    pub is_mutual: bool,
}

impl Capabilities {
    /// Whether these capabilities satisfy a requested protection level.
    pub fn satisfies(&self, level: ProtectionLevel) -> bool {
        match level {
            ProtectionLevel::None => true,
            ProtectionLevel::Sign => self.can_sign || self.can_encrypt,
            ProtectionLevel::EncryptAndSign => self.can_encrypt && self.can_sign,
        }
    }
}

/// Authentication package that produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    /// Kerberos.
    Kerberos,
    /// NTLM.
    Ntlm,
}

impl fmt::Display for AuthenticationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationType::Kerberos => f.write_str("Kerberos"),
            AuthenticationType::Ntlm => f.write_str("NTLM"),
        }
    }
}

/// Identity of the remote peer as resolved by the mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Package that authenticated the peer.
    pub authentication_type: AuthenticationType,
    /// Peer name (`user@REALM`, `DOMAIN\user`, or the target name seen by an initiator).
    pub name: String,
    /// Whether the peer was authenticated.
    pub is_authenticated: bool,
}

/// Outbound per-message protection for one direction.
///
/// Implementations keep their own sequence state; calls arrive in frame order.
pub trait MessageSealer: Send {
    /// Encrypt and authenticate one chunk.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Attach a MAC to one chunk; the plaintext travels in the clear.
    fn sign(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Inbound per-message protection for one direction.
pub trait MessageUnsealer: Send {
    /// Reverse [`MessageSealer::encrypt`].
    ///
    /// # Errors
    ///
    /// `Error::Decryption` when the payload cannot be opened.
    fn decrypt(&mut self, sealed: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`MessageSealer::sign`], returning the plaintext.
    ///
    /// # Errors
    ///
    /// `Error::Integrity` when the MAC does not verify.
    fn verify(&mut self, signed: &[u8]) -> Result<Vec<u8>>;
}

/// Sealer/unsealer pair produced by a completed mechanism.
pub type Protection = (Box<dyn MessageSealer>, Box<dyn MessageUnsealer>);

/// One side of an authentication mechanism.
///
/// The handshake engine calls [`Mechanism::start`] once, then [`Mechanism::step`] until
/// `done`. After a successful final step it reads [`Mechanism::capabilities`] and
/// [`Mechanism::remote_identity`] and consumes the mechanism with
/// [`Mechanism::into_protection`].
pub trait Mechanism: Send {
    /// Bind role, target and requested protection before the first step.
    fn start(&mut self, params: &HandshakeParams) -> Result<()>;

    /// Advance the exchange with the peer's token (`None` for the initiator's first step).
    fn step(&mut self, token_in: Option<&[u8]>) -> Step;

    /// Negotiated capabilities; `None` until complete.
    fn capabilities(&self) -> Option<Capabilities>;

    /// Identity of the remote peer; `None` until complete.
    fn remote_identity(&self) -> Option<Identity>;

    /// Per-message protection functions for the established context.
    fn into_protection(self: Box<Self>) -> Result<Protection>;
}
