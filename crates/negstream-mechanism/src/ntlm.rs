//! NTLM-like mechanism.
//!
//! Challenge/response without mutual authentication:
//!
//! ```text
//! initiator                                         acceptor
//!   │── NEGOTIATE { level } ───────────────────────────>│
//!   │<─────────────────── CHALLENGE { server_challenge }│
//!   │── AUTHENTICATE { user, client_challenge,          │
//!   │                  response, level } ──────────────>│ verify against realm, done
//!   │<────────────────────────────── ACCEPT { mic } ────│
//!   │ verify mic, done                                  │
//! ```
//!
//! The final ACCEPT leg proves the acceptor derived the same session key, so a rejected
//! response reaches the initiator as an authentication failure. It does not authenticate
//! the acceptor: anyone with the user's password could produce it. Frames are sealed
//! with ChaCha20-Poly1305.

use crate::{
    protection::{self, capabilities_for, decode_level, encode_level},
    realm::{Credential, Realm},
    token::{TokenReader, TokenWriter},
    Error, Result,
};
use negstream_core::{
    AuthenticationType, Capabilities, Error as CoreError, HandshakeParams, Identity, Mechanism,
    Protection, ProtectionLevel, Result as CoreResult, Role, Step,
};
use negstream_crypto::{
    aead::AeadAlgorithm,
    kdf::derive_long_term_key,
    mac::{self, hmac_sha256},
    random_bytes,
};
use std::sync::Arc;
use zeroize::Zeroizing;

const NEGOTIATE: u8 = 0x11;
const CHALLENGE: u8 = 0x12;
const AUTHENTICATE: u8 = 0x13;
const ACCEPT: u8 = 0x14;

/// Challenges exchanged in legs two and three.
#[derive(Clone, Copy)]
struct Challenges {
    server: [u8; 16],
    client: [u8; 16],
}

impl Challenges {
    fn transcript(&self, level: ProtectionLevel) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[..16].copy_from_slice(&self.server);
        out[16..32].copy_from_slice(&self.client);
        out[32] = encode_level(level);
        out
    }

    fn response(&self, key: &[u8; 32], level: ProtectionLevel) -> Result<[u8; mac::MAC_LEN]> {
        Ok(mac::sign(key, 0, &self.transcript(level))?)
    }

    fn session_key(&self, key: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        Ok(Zeroizing::new(hmac_sha256(
            key,
            &[b"negstream-ntlm-session", &self.server, &self.client],
        )?))
    }

    fn mic(&self, session_key: &[u8; 32], level: ProtectionLevel) -> Result<[u8; mac::MAC_LEN]> {
        Ok(mac::sign(session_key, 1, &self.transcript(level))?)
    }
}

struct Context {
    session_key: Zeroizing<[u8; 32]>,
    challenges: Challenges,
    capabilities: Capabilities,
    identity: Identity,
}

impl Context {
    fn protection(&self, role: Role) -> Result<Protection> {
        let mut context = [0u8; 32];
        context[..16].copy_from_slice(&self.challenges.server);
        context[16..].copy_from_slice(&self.challenges.client);
        protection::protection(
            AeadAlgorithm::ChaCha20Poly1305,
            &self.session_key,
            &context,
            role,
        )
    }
}

enum InitiatorState {
    Initial,
    AwaitingChallenge,
    AwaitingAccept {
        session_key: Zeroizing<[u8; 32]>,
        challenges: Challenges,
    },
    Complete(Context),
    Failed,
}

/// Initiator side.
pub struct NtlmInitiator {
    realm: Arc<Realm>,
    credential: Credential,
    target: String,
    protection: ProtectionLevel,
    state: InitiatorState,
}

impl NtlmInitiator {
    /// Create an initiator for `credential`; `realm` supplies the domain name.
    pub fn new(realm: Arc<Realm>, credential: Credential) -> Self {
        Self {
            realm,
            credential,
            target: String::new(),
            protection: ProtectionLevel::default(),
            state: InitiatorState::Initial,
        }
    }

    fn authenticate(&mut self, token: &[u8]) -> Result<Vec<u8>> {
        let mut reader = TokenReader::new(token, CHALLENGE)?;
        let server = reader.array::<16>()?;
        reader.finish()?;

        let challenges = Challenges {
            server,
            client: random_bytes::<16>(),
        };
        let key = derive_long_term_key(
            &self.realm.ntlm_name(self.credential.user()),
            self.credential.password(),
        )?;
        let response = challenges.response(&key, self.protection)?;
        let token = TokenWriter::new(AUTHENTICATE)
            .string(self.credential.user())
            .bytes(&challenges.client)
            .bytes(&response)
            .u8(encode_level(self.protection))
            .finish();
        self.state = InitiatorState::AwaitingAccept {
            session_key: challenges.session_key(&key)?,
            challenges,
        };
        Ok(token)
    }

    fn verify_accept(
        &self,
        token: &[u8],
        session_key: &[u8; 32],
        challenges: &Challenges,
    ) -> Result<bool> {
        let mut reader = TokenReader::new(token, ACCEPT)?;
        let mic = reader.bytes()?;
        reader.finish()?;
        Ok(mac::verify(session_key, 1, &challenges.transcript(self.protection), mic).is_ok())
    }
}

impl Mechanism for NtlmInitiator {
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
            (InitiatorState::Initial, None) => {
                self.state = InitiatorState::AwaitingChallenge;
                Step::continue_with(
                    TokenWriter::new(NEGOTIATE)
                        .u8(encode_level(self.protection))
                        .finish(),
                )
            }
            (InitiatorState::AwaitingChallenge, Some(token)) => match self.authenticate(token) {
                Ok(token) => Step::continue_with(token),
                Err(e) => Step::invalid_token(e.to_string()),
            },
            (
                InitiatorState::AwaitingAccept {
                    session_key,
                    challenges,
                },
                Some(token),
            ) => match self.verify_accept(token, &session_key, &challenges) {
                Ok(true) => {
                    self.state = InitiatorState::Complete(Context {
                        session_key,
                        challenges,
                        capabilities: capabilities_for(self.protection, false),
                        identity: Identity {
                            authentication_type: AuthenticationType::Ntlm,
                            name: self.target.clone(),
                            is_authenticated: true,
                        },
                    });
                    Step::complete(None)
                }
                Ok(false) => Step::rejected("acceptor did not confirm the session key"),
                Err(e) => Step::invalid_token(e.to_string()),
            },
            _ => Step::invalid_token("unexpected token for NTLM initiator"),
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
            _ => Err(CoreError::InvalidOperation("NTLM context not established".into())),
        }
    }
}

enum AcceptorState {
    AwaitingNegotiate,
    AwaitingAuthenticate {
        server_challenge: [u8; 16],
        level: ProtectionLevel,
    },
    Complete(Context),
    Failed,
}

/// Acceptor side. Verifies responses against the realm.
pub struct NtlmAcceptor {
    realm: Arc<Realm>,
    state: AcceptorState,
}

/// Outcome of processing AUTHENTICATE.
enum Verdict {
    Accept(Context, Vec<u8>),
    Reject(&'static str),
}

impl NtlmAcceptor {
    /// Create an acceptor checking responses against `realm`.
    pub fn new(realm: Arc<Realm>) -> Self {
        Self {
            realm,
            state: AcceptorState::AwaitingNegotiate,
        }
    }

    fn challenge(&mut self, token: &[u8]) -> Result<Vec<u8>> {
        let mut reader = TokenReader::new(token, NEGOTIATE)?;
        let level = decode_level(reader.u8()?)
            .ok_or_else(|| Error::Token("unknown protection level".into()))?;
        reader.finish()?;

        let server_challenge = random_bytes::<16>();
        self.state = AcceptorState::AwaitingAuthenticate {
            server_challenge,
            level,
        };
        Ok(TokenWriter::new(CHALLENGE).bytes(&server_challenge).finish())
    }

    fn verify(
        &self,
        token: &[u8],
        server_challenge: [u8; 16],
        level: ProtectionLevel,
    ) -> Result<Verdict> {
        let mut reader = TokenReader::new(token, AUTHENTICATE)?;
        let user = reader.string()?;
        let client = reader.array::<16>()?;
        let response = reader.bytes()?;
        let repeated = decode_level(reader.u8()?);
        reader.finish()?;
        if repeated != Some(level) {
            return Err(Error::Token("protection level changed mid-handshake".into()));
        }

        let Some(key) = self.realm.ntlm_key(&user)? else {
            tracing::debug!(%user, "unknown NTLM account");
            return Ok(Verdict::Reject("bad credential"));
        };
        let challenges = Challenges {
            server: server_challenge,
            client,
        };
        if mac::verify(&key, 0, &challenges.transcript(level), response).is_err() {
            return Ok(Verdict::Reject("bad credential"));
        }

        let session_key = challenges.session_key(&key)?;
        let mic = challenges.mic(&session_key, level)?;
        let accept = TokenWriter::new(ACCEPT).bytes(&mic).finish();
        let context = Context {
            session_key,
            challenges,
            capabilities: capabilities_for(level, false),
            identity: Identity {
                authentication_type: AuthenticationType::Ntlm,
                name: self.realm.ntlm_name(&user),
                is_authenticated: true,
            },
        };
        Ok(Verdict::Accept(context, accept))
    }
}

impl Mechanism for NtlmAcceptor {
    fn start(&mut self, _params: &HandshakeParams) -> CoreResult<()> {
        Ok(())
    }

    fn step(&mut self, token_in: Option<&[u8]>) -> Step {
        match (std::mem::replace(&mut self.state, AcceptorState::Failed), token_in) {
            (AcceptorState::AwaitingNegotiate, Some(token)) => match self.challenge(token) {
                Ok(challenge) => Step::continue_with(challenge),
                Err(e) => Step::invalid_token(e.to_string()),
            },
            (
                AcceptorState::AwaitingAuthenticate {
                    server_challenge,
                    level,
                },
                Some(token),
            ) => match self.verify(token, server_challenge, level) {
                Ok(Verdict::Accept(context, accept)) => {
                    self.state = AcceptorState::Complete(context);
                    Step::complete(Some(accept))
                }
                Ok(Verdict::Reject(reason)) => Step::rejected(reason),
                Err(e) => Step::invalid_token(e.to_string()),
            },
            _ => Step::invalid_token("unexpected token for NTLM acceptor"),
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        match &self.state {
            AcceptorState::Complete(ctx) => Some(ctx.capabilities),
            _ => None,
        }
    }

    fn remote_identity(&self) -> Option<Identity> {
        match &self.state {
            AcceptorState::Complete(ctx) => Some(ctx.identity.clone()),
            _ => None,
        }
    }

    fn into_protection(self: Box<Self>) -> CoreResult<Protection> {
        match &self.state {
            AcceptorState::Complete(ctx) => Ok(ctx.protection(Role::Acceptor)?),
            _ => Err(CoreError::InvalidOperation("NTLM context not established".into())),
        }
    }
}
