//! Kerberos-like mechanism.
//!
//! Two legs, mutually authenticated:
//!
//! ```text
//! initiator                                   acceptor
//!   │  realm.issue_ticket(credential, spn)        │
//!   │── AP-REQ { spn, ticket, authenticator } ───>│ keytab lookup, open ticket,
//!   │                                             │ open authenticator
//!   │<──────────── AP-REP { sealed nonces } ──────│ done
//!   │ verify echoed nonce, done                   │
//! ```
//!
//! The authenticator and AP-REP are sealed with AES-256-GCM under the ticket's session
//! key. Message keys are derived from the session key and both nonces.

use crate::{
    protection::{self, capabilities_for, decode_level, encode_level},
    realm::{Credential, Keytab, Realm},
    token::{TokenReader, TokenWriter},
    Error, Result,
};
use negstream_core::{
    AuthenticationType, Capabilities, Error as CoreError, HandshakeParams, Identity, Mechanism,
    Protection, ProtectionLevel, Result as CoreResult, Role, Step,
};
use negstream_crypto::{aead::AeadAlgorithm, random_bytes};
use std::sync::Arc;
use zeroize::Zeroizing;

const AP_REQ: u8 = 0x01;
const AP_REP: u8 = 0x02;
const AUTHENTICATOR: u8 = 0x03;
const AP_REP_BODY: u8 = 0x04;

const AUTHENTICATOR_AAD: &[u8] = b"negstream-krb-authenticator";
const AP_REP_AAD: &[u8] = b"negstream-krb-ap-rep";

/// Rejection reason when the acceptor holds no key for the requested SPN.
pub const UNKNOWN_SERVICE: &str = "service principal unknown to target";

/// Established context shared by both roles.
struct Context {
    session_key: Zeroizing<[u8; 32]>,
    initiator_nonce: [u8; 16],
    acceptor_nonce: [u8; 16],
    capabilities: Capabilities,
    identity: Identity,
}

impl Context {
    fn protection(&self, role: Role) -> Result<Protection> {
        let mut nonces = [0u8; 32];
        nonces[..16].copy_from_slice(&self.initiator_nonce);
        nonces[16..].copy_from_slice(&self.acceptor_nonce);
        protection::protection(AeadAlgorithm::Aes256Gcm, &self.session_key, &nonces, role)
    }
}

enum InitiatorState {
    Initial,
    AwaitingReply {
        session_key: Zeroizing<[u8; 32]>,
        nonce: [u8; 16],
    },
    Complete(Context),
    Failed,
}

/// Initiator side.
pub struct KerberosInitiator {
    realm: Arc<Realm>,
    credential: Credential,
    target: String,
    protection: ProtectionLevel,
    state: InitiatorState,
}

impl KerberosInitiator {
    /// Create an initiator authenticating `credential` through `realm`.
    pub fn new(realm: Arc<Realm>, credential: Credential) -> Self {
        Self {
            realm,
            credential,
            target: String::new(),
            protection: ProtectionLevel::default(),
            state: InitiatorState::Initial,
        }
    }

    fn request(&mut self) -> Step {
        let ticket = match self.realm.issue_ticket(&self.credential, &self.target) {
            Ok(ticket) => ticket,
            Err(reason) => {
                tracing::debug!(user = self.credential.user(), %reason, "ticket request refused");
                return Step::rejected(reason);
            }
        };
        let nonce = random_bytes::<16>();
        let authenticator = Zeroizing::new(
            TokenWriter::new(AUTHENTICATOR)
                .string(self.credential.user())
                .bytes(&nonce)
                .u8(encode_level(self.protection))
                .finish(),
        );
        let sealed = match AeadAlgorithm::Aes256Gcm.seal(
            &ticket.session_key,
            0,
            &authenticator,
            AUTHENTICATOR_AAD,
        ) {
            Ok(sealed) => sealed,
            Err(e) => return Step::rejected(e.to_string()),
        };
        let token = TokenWriter::new(AP_REQ)
            .string(&self.target)
            .bytes(&ticket.sealed)
            .bytes(&sealed)
            .finish();
        self.state = InitiatorState::AwaitingReply {
            session_key: ticket.session_key,
            nonce,
        };
        Step::continue_with(token)
    }

    fn verify_reply(
        &self,
        token: &[u8],
        session_key: &[u8; 32],
        nonce: &[u8; 16],
    ) -> Result<[u8; 16]> {
        let mut reader = TokenReader::new(token, AP_REP)?;
        let sealed = reader.bytes()?;
        reader.finish()?;

        let body = AeadAlgorithm::Aes256Gcm.open(session_key, 1, sealed, AP_REP_AAD)?;
        let mut reader = TokenReader::new(&body, AP_REP_BODY)?;
        let echoed = reader.array::<16>()?;
        let acceptor_nonce = reader.array::<16>()?;
        reader.finish()?;
        if &echoed != nonce {
            return Err(Error::Token("AP-REP does not answer this request".into()));
        }
        Ok(acceptor_nonce)
    }
}

impl Mechanism for KerberosInitiator {
    fn start(&mut self, params: &HandshakeParams) -> CoreResult<()> {
        self.target = params
            .target_name
            .clone()
            .ok_or_else(|| CoreError::InvalidOperation("target name required".into()))?;
        self.protection = params.protection;
        Ok(())
    }

    fn step(&mut self, token_in: Option<&[u8]>) -> Step {
        match (std::mem::replace(&mut self.state, InitiatorState::Failed), token_in) {
            (InitiatorState::Initial, None) => self.request(),
            (InitiatorState::AwaitingReply { session_key, nonce }, Some(token)) => {
                match self.verify_reply(token, &session_key, &nonce) {
                    Ok(acceptor_nonce) => {
                        self.state = InitiatorState::Complete(Context {
                            session_key,
                            initiator_nonce: nonce,
                            acceptor_nonce,
                            capabilities: capabilities_for(self.protection, true),
                            identity: Identity {
                                authentication_type: AuthenticationType::Kerberos,
                                name: self.target.clone(),
                                is_authenticated: true,
                            },
                        });
                        Step::complete(None)
                    }
                    Err(Error::Crypto(_)) => Step::rejected("mutual authentication failed"),
                    Err(e) => Step::invalid_token(e.to_string()),
                }
            }
            _ => Step::invalid_token("unexpected token for Kerberos initiator"),
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        match &self.state {
            InitiatorState::Complete(ctx) => Some(ctx.capabilities),
            _ => None,
        }
    }

    fn remote_identity(&self) -> Option<Identity> {
        match &self.state {
            InitiatorState::Complete(ctx) => Some(ctx.identity.clone()),
            _ => None,
        }
    }

    fn into_protection(self: Box<Self>) -> CoreResult<Protection> {
        match &self.state {
            InitiatorState::Complete(ctx) => Ok(ctx.protection(Role::Initiator)?),
            _ => Err(CoreError::InvalidOperation("Kerberos context not established".into())),
        }
    }
}

/// Acceptor side.
pub struct KerberosAcceptor {
    realm: Arc<Realm>,
    keytab: Keytab,
    context: Option<Context>,
    finished: bool,
}

/// Outcome of processing an AP-REQ.
enum Verdict {
    Accept(Context, Vec<u8>),
    Reject(String),
}

impl KerberosAcceptor {
    /// Create an acceptor serving the SPNs in `keytab`.
    pub fn new(realm: Arc<Realm>, keytab: Keytab) -> Self {
        Self {
            realm,
            keytab,
            context: None,
            finished: false,
        }
    }

    fn accept(&self, token: &[u8]) -> Result<Verdict> {
        let mut reader = TokenReader::new(token, AP_REQ)?;
        let spn = reader.string()?;
        let ticket = reader.bytes()?;
        let sealed_authenticator = reader.bytes()?;
        reader.finish()?;

        let Some(ticket) = self.keytab.open_ticket(&spn, ticket)? else {
            tracing::debug!(%spn, "no keytab entry");
            return Ok(Verdict::Reject(UNKNOWN_SERVICE.into()));
        };

        let authenticator = match AeadAlgorithm::Aes256Gcm.open(
            &ticket.session_key,
            0,
            sealed_authenticator,
            AUTHENTICATOR_AAD,
        ) {
            Ok(plain) => plain,
            Err(_) => return Ok(Verdict::Reject("authenticator does not match ticket".into())),
        };
        let mut reader = TokenReader::new(&authenticator, AUTHENTICATOR)?;
        let user = reader.string()?;
        let initiator_nonce = reader.array::<16>()?;
        let level = decode_level(reader.u8()?)
            .ok_or_else(|| Error::Token("unknown protection level".into()))?;
        reader.finish()?;
        if user != ticket.user {
            return Ok(Verdict::Reject("authenticator does not match ticket".into()));
        }

        let acceptor_nonce = random_bytes::<16>();
        let body = Zeroizing::new(
            TokenWriter::new(AP_REP_BODY)
                .bytes(&initiator_nonce)
                .bytes(&acceptor_nonce)
                .finish(),
        );
        let sealed = AeadAlgorithm::Aes256Gcm.seal(&ticket.session_key, 1, &body, AP_REP_AAD)?;
        let reply = TokenWriter::new(AP_REP).bytes(&sealed).finish();

        let context = Context {
            session_key: ticket.session_key,
            initiator_nonce,
            acceptor_nonce,
            capabilities: capabilities_for(level, true),
            identity: Identity {
                authentication_type: AuthenticationType::Kerberos,
                name: self.realm.kerberos_name(&user),
                is_authenticated: true,
            },
        };
        Ok(Verdict::Accept(context, reply))
    }
}

impl Mechanism for KerberosAcceptor {
    fn start(&mut self, _params: &HandshakeParams) -> CoreResult<()> {
        Ok(())
    }

    fn step(&mut self, token_in: Option<&[u8]>) -> Step {
        let token = match (self.finished, token_in) {
            (false, Some(token)) => token,
            _ => return Step::invalid_token("unexpected token for Kerberos acceptor"),
        };
        self.finished = true;
        match self.accept(token) {
            Ok(Verdict::Accept(context, reply)) => {
                self.context = Some(context);
                Step::complete(Some(reply))
            }
            Ok(Verdict::Reject(reason)) => Step::rejected(reason),
            Err(Error::Crypto(_)) => Step::rejected("ticket cannot be decrypted"),
            Err(e) => Step::invalid_token(e.to_string()),
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        self.context.as_ref().map(|ctx| ctx.capabilities)
    }

    fn remote_identity(&self) -> Option<Identity> {
        self.context.as_ref().map(|ctx| ctx.identity.clone())
    }

    fn into_protection(self: Box<Self>) -> CoreResult<Protection> {
        match &self.context {
            Some(ctx) => Ok(ctx.protection(Role::Acceptor)?),
            None => Err(CoreError::InvalidOperation("Kerberos context not established".into())),
        }
    }
}
