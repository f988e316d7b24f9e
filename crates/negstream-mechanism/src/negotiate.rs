//! Negotiate package: picks Kerberos or NTLM once, then delegates.
//!
//! Every token is prefixed with one byte naming the package it belongs to. A rejection is
//! sent to the peer as a `REJECT` token carrying the reason, so both ends report the same
//! authentication failure.
//!
//! Selection happens once, when the initiator starts: Kerberos if the user has a Kerberos
//! principal and the target SPN is registered in the realm, NTLM otherwise. A failure of
//! the selected package fails the handshake; the other package is never tried.

use crate::{
    kerberos::{KerberosAcceptor, KerberosInitiator},
    ntlm::{NtlmAcceptor, NtlmInitiator},
    realm::{Credential, Keytab, Realm},
};
use negstream_core::{
    AuthenticationType, Capabilities, Error as CoreError, HandshakeParams, Identity, Mechanism,
    Protection, Result as CoreResult, Role, Status, Step,
};
use std::sync::Arc;

const KERBEROS: u8 = 0x01;
const NTLM: u8 = 0x02;
const REJECT: u8 = 0x7F;

fn package_tag(package: AuthenticationType) -> u8 {
    match package {
        AuthenticationType::Kerberos => KERBEROS,
        AuthenticationType::Ntlm => NTLM,
    }
}

/// A token as seen by the negotiate layer.
enum Envelope<'a> {
    Package(AuthenticationType, &'a [u8]),
    Reject(String),
}

fn open_envelope(token: &[u8]) -> Option<Envelope<'_>> {
    let (tag, body) = token.split_first()?;
    match *tag {
        KERBEROS => Some(Envelope::Package(AuthenticationType::Kerberos, body)),
        NTLM => Some(Envelope::Package(AuthenticationType::Ntlm, body)),
        REJECT => Some(Envelope::Reject(String::from_utf8_lossy(body).into_owned())),
        _ => None,
    }
}

/// Prefix outbound tokens with the package tag and turn local rejections into notices.
fn seal_envelope(package: AuthenticationType, mut step: Step) -> Step {
    if let Status::Rejected(reason) = &step.status {
        let mut notice = Vec::with_capacity(1 + reason.len());
        notice.push(REJECT);
        notice.extend_from_slice(reason.as_bytes());
        step.token_out = Some(notice);
        return step;
    }
    if let Some(token) = step.token_out.as_mut().filter(|t| !t.is_empty()) {
        token.insert(0, package_tag(package));
    }
    step
}

/// The package a side is running, once chosen.
struct Selected {
    package: AuthenticationType,
    mechanism: Box<dyn Mechanism>,
}

impl Selected {
    fn step(&mut self, envelope: Option<Envelope<'_>>) -> Step {
        let token = match envelope {
            None => None,
            Some(Envelope::Reject(reason)) => return Step::rejected(reason),
            Some(Envelope::Package(package, body)) if package == self.package => Some(body),
            Some(Envelope::Package(package, _)) => {
                return Step::invalid_token(format!(
                    "{} token during {} exchange",
                    package, self.package
                ))
            }
        };
        let step = self.mechanism.step(token);
        seal_envelope(self.package, step)
    }

    fn into_protection(self) -> CoreResult<Protection> {
        self.mechanism.into_protection()
    }
}

/// Negotiate initiator.
pub struct NegotiateInitiator {
    realm: Arc<Realm>,
    credential: Credential,
    selected: Option<Selected>,
}

impl NegotiateInitiator {
    /// Create an initiator presenting `credential` to services of `realm`.
    pub fn new(realm: Arc<Realm>, credential: Credential) -> Self {
        Self {
            realm,
            credential,
            selected: None,
        }
    }

    /// Package chosen at start.
    pub fn selected(&self) -> Option<AuthenticationType> {
        self.selected.as_ref().map(|s| s.package)
    }
}

impl Mechanism for NegotiateInitiator {
    fn start(&mut self, params: &HandshakeParams) -> CoreResult<()> {
        if params.role != Role::Initiator {
            return Err(CoreError::InvalidOperation(
                "initiator mechanism used for acceptor session".into(),
            ));
        }
        if self.selected.is_some() {
            return Err(CoreError::InvalidOperation("negotiation already started".into()));
        }
        let target = params
            .target_name
            .as_deref()
            .ok_or_else(|| CoreError::InvalidOperation("target name required".into()))?;

        let package = if self.realm.has_kerberos_principal(self.credential.user())
            && self.realm.is_registered(target)
        {
            AuthenticationType::Kerberos
        } else {
            AuthenticationType::Ntlm
        };
        tracing::debug!(
            %package,
            spn = target,
            user = self.credential.user(),
            "negotiate selected package"
        );

        let mut mechanism: Box<dyn Mechanism> = match package {
            AuthenticationType::Kerberos => Box::new(KerberosInitiator::new(
                self.realm.clone(),
                self.credential.clone(),
            )),
            AuthenticationType::Ntlm => Box::new(NtlmInitiator::new(
                self.realm.clone(),
                self.credential.clone(),
            )),
        };
        mechanism.start(params)?;
        self.selected = Some(Selected { package, mechanism });
        Ok(())
    }

    fn step(&mut self, token_in: Option<&[u8]>) -> Step {
        let Some(selected) = self.selected.as_mut() else {
            return Step::invalid_token("negotiation not started");
        };
        match token_in {
            None => selected.step(None),
            Some(token) => match open_envelope(token) {
                Some(envelope) => selected.step(Some(envelope)),
                None => Step::invalid_token("unknown negotiate token"),
            },
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        self.selected.as_ref()?.mechanism.capabilities()
    }

    fn remote_identity(&self) -> Option<Identity> {
        self.selected.as_ref()?.mechanism.remote_identity()
    }

    fn into_protection(self: Box<Self>) -> CoreResult<Protection> {
        match self.selected {
            Some(selected) => selected.into_protection(),
            None => Err(CoreError::InvalidOperation("negotiation not started".into())),
        }
    }
}

/// Negotiate acceptor. Follows whichever package the initiator's first token names.
pub struct NegotiateAcceptor {
    realm: Arc<Realm>,
    keytab: Keytab,
    params: Option<HandshakeParams>,
    selected: Option<Selected>,
}

impl NegotiateAcceptor {
    /// Create an acceptor serving the SPNs in `keytab` for users of `realm`.
    pub fn new(realm: Arc<Realm>, keytab: Keytab) -> Self {
        Self {
            realm,
            keytab,
            params: None,
            selected: None,
        }
    }

    /// Package the initiator chose, once its first token arrived.
    pub fn selected(&self) -> Option<AuthenticationType> {
        self.selected.as_ref().map(|s| s.package)
    }

    fn select(&mut self, package: AuthenticationType) -> CoreResult<()> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| CoreError::InvalidOperation("negotiation not started".into()))?;
        let mut mechanism: Box<dyn Mechanism> = match package {
            AuthenticationType::Kerberos => Box::new(KerberosAcceptor::new(
                self.realm.clone(),
                self.keytab.clone(),
            )),
            AuthenticationType::Ntlm => Box::new(NtlmAcceptor::new(self.realm.clone())),
        };
        mechanism.start(params)?;
        tracing::debug!(%package, "negotiate accepted package");
        self.selected = Some(Selected { package, mechanism });
        Ok(())
    }
}

impl Mechanism for NegotiateAcceptor {
    fn start(&mut self, params: &HandshakeParams) -> CoreResult<()> {
        if params.role != Role::Acceptor {
            return Err(CoreError::InvalidOperation(
                "acceptor mechanism used for initiator session".into(),
            ));
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn step(&mut self, token_in: Option<&[u8]>) -> Step {
        let Some(envelope) = token_in.and_then(open_envelope) else {
            return Step::invalid_token("unknown negotiate token");
        };
        if self.selected.is_none() {
            match &envelope {
                Envelope::Reject(reason) => return Step::rejected(reason.clone()),
                Envelope::Package(package, _) => {
                    if let Err(e) = self.select(*package) {
                        return Step::invalid_token(e.to_string());
                    }
                }
            }
        }
        match self.selected.as_mut() {
            Some(selected) => selected.step(Some(envelope)),
            None => Step::invalid_token("negotiation not started"),
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        self.selected.as_ref()?.mechanism.capabilities()
    }

    fn remote_identity(&self) -> Option<Identity> {
        self.selected.as_ref()?.mechanism.remote_identity()
    }

    fn into_protection(self: Box<Self>) -> CoreResult<Protection> {
        match self.selected {
            Some(selected) => selected.into_protection(),
            None => Err(CoreError::InvalidOperation("negotiation not started".into())),
        }
    }
}
