//! Simulated security realm.
//!
//! A [`Realm`] plays the part of the KDC and domain controller: it knows every user's
//! password, which users may use Kerberos, and which service principal names (SPNs) are
//! registered. An acceptor holds a [`Keytab`] with keys for the SPNs it serves, which
//! may be a strict subset of the realm's registrations.

use crate::{
    token::{TokenReader, TokenWriter},
    Error, Result,
};
use negstream_crypto::{aead::AeadAlgorithm, kdf::derive_long_term_key, random_bytes};
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroizing;

const TICKET: u8 = 0x40;

/// User name and password presented by an initiator.
#[derive(Clone)]
pub struct Credential {
    user: String,
    password: Zeroizing<String>,
}

impl Credential {
    /// Create a credential.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Account name, without realm or domain.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

struct Account {
    password: Zeroizing<String>,
    kerberos: bool,
}

/// Users, passwords and registered services of one realm.
pub struct Realm {
    name: String,
    domain: String,
    accounts: HashMap<String, Account>,
    services: HashMap<String, Zeroizing<[u8; 32]>>,
}

/// Ticket issued by the realm for one service.
pub(crate) struct ServiceTicket {
    /// Opaque to the initiator; sealed under the service key.
    pub(crate) sealed: Vec<u8>,
    pub(crate) session_key: Zeroizing<[u8; 32]>,
}

impl Realm {
    /// Create an empty realm.
    ///
    /// `name` is the Kerberos realm (`LINUX.CONTOSO.COM`), `domain` the NTLM domain (`LINUX`).
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            accounts: HashMap::new(),
            services: HashMap::new(),
        }
    }

    /// Realm mirroring the single-realm enterprise test environment.
    ///
    /// - Kerberos users `defaultcred`, `user1`, `user2` (password `password`)
    /// - NTLM-only user `ntlmonly` (password `password`)
    /// - Registered services `HOST/localhost`, `HOST/linuxclient.linux.contoso.com`,
    ///   `NEWSERVICE/localhost`
    pub fn linux_contoso() -> Self {
        Self::new("LINUX.CONTOSO.COM", "LINUX")
            .with_user("defaultcred", "password")
            .with_user("user1", "password")
            .with_user("user2", "password")
            .with_ntlm_only_user("ntlmonly", "password")
            .with_service("HOST/localhost")
            .with_service("HOST/linuxclient.linux.contoso.com")
            .with_service("NEWSERVICE/localhost")
    }

    /// Add a user able to use Kerberos and NTLM.
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.insert_account(user.into(), password.into(), true);
        self
    }

    /// Add a user without a Kerberos principal.
    pub fn with_ntlm_only_user(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.insert_account(user.into(), password.into(), false);
        self
    }

    /// Register a service principal name with a fresh random key.
    pub fn with_service(mut self, spn: impl Into<String>) -> Self {
        self.services
            .insert(spn.into(), Zeroizing::new(random_bytes::<32>()));
        self
    }

    /// Register a service principal name whose key derives from `password`.
    ///
    /// Realms built separately agree on such keys, so an initiator and an acceptor in
    /// different processes can share a ticket.
    pub fn with_service_password(mut self, spn: impl Into<String>, password: &str) -> Result<Self> {
        let spn = spn.into();
        let key = derive_long_term_key(&format!("{}@{}", spn, self.name), password)?;
        self.services.insert(spn, key);
        Ok(self)
    }

    /// [`Realm::linux_contoso`] with every service key derived from `service_password`.
    pub fn linux_contoso_with_service_password(service_password: &str) -> Result<Self> {
        let mut realm = Self::linux_contoso();
        let spns: Vec<String> = realm.services.keys().cloned().collect();
        for spn in spns {
            realm = realm.with_service_password(spn, service_password)?;
        }
        Ok(realm)
    }

    fn insert_account(&mut self, user: String, password: String, kerberos: bool) {
        self.accounts.insert(
            user,
            Account {
                password: Zeroizing::new(password),
                kerberos,
            },
        );
    }

    /// Kerberos realm name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// NTLM domain name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether `user` has a Kerberos principal.
    pub fn has_kerberos_principal(&self, user: &str) -> bool {
        self.accounts.get(user).is_some_and(|a| a.kerberos)
    }

    /// Whether `spn` is registered anywhere in the realm.
    pub fn is_registered(&self, spn: &str) -> bool {
        self.services.contains_key(spn)
    }

    /// `user@REALM`.
    pub fn kerberos_name(&self, user: &str) -> String {
        format!("{}@{}", user, self.name)
    }

    /// `DOMAIN\user`.
    pub fn ntlm_name(&self, user: &str) -> String {
        format!("{}\\{}", self.domain, user)
    }

    /// Export a keytab holding the keys of `spns`.
    ///
    /// # Errors
    /// `Error::Config` if an SPN is not registered in the realm.
    pub fn keytab<'a>(&self, spns: impl IntoIterator<Item = &'a str>) -> Result<Keytab> {
        let mut entries = HashMap::new();
        for spn in spns {
            let key = self
                .services
                .get(spn)
                .ok_or_else(|| Error::Config(format!("{} is not registered in {}", spn, self.name)))?;
            entries.insert(spn.to_string(), key.clone());
        }
        Ok(Keytab { entries })
    }

    /// Verify the credential and issue a ticket for `spn`.
    ///
    /// The error string is the rejection reason shown to both peers.
    pub(crate) fn issue_ticket(
        &self,
        credential: &Credential,
        spn: &str,
    ) -> core::result::Result<ServiceTicket, String> {
        if !self.check_password(credential) || !self.has_kerberos_principal(credential.user()) {
            return Err("bad credential".into());
        }
        let service_key = self
            .services
            .get(spn)
            .ok_or_else(|| format!("service principal {} not found in realm", spn))?;

        let session_key = Zeroizing::new(random_bytes::<32>());
        let plain = Zeroizing::new(
            TokenWriter::new(TICKET)
                .string(credential.user())
                .bytes(&session_key[..])
                .finish(),
        );
        let sealed = AeadAlgorithm::Aes256Gcm
            .seal(service_key, 0, &plain, spn.as_bytes())
            .map_err(|e| e.to_string())?;
        Ok(ServiceTicket {
            sealed,
            session_key,
        })
    }

    /// Long-term NTLM key of `user`, if the account exists.
    pub(crate) fn ntlm_key(&self, user: &str) -> Result<Option<Zeroizing<[u8; 32]>>> {
        match self.accounts.get(user) {
            Some(account) => Ok(Some(derive_long_term_key(
                &self.ntlm_name(user),
                &account.password,
            )?)),
            None => Ok(None),
        }
    }

    fn check_password(&self, credential: &Credential) -> bool {
        self.accounts
            .get(credential.user())
            .is_some_and(|a| a.password.as_str() == credential.password())
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("accounts", &self.accounts.len())
            .field("services", &self.services.len())
            .finish()
    }
}

/// Decrypted contents of a service ticket.
pub(crate) struct TicketContents {
    pub(crate) user: String,
    pub(crate) session_key: Zeroizing<[u8; 32]>,
}

/// Service keys held by an acceptor.
#[derive(Clone, Default)]
pub struct Keytab {
    entries: HashMap<String, Zeroizing<[u8; 32]>>,
}

impl Keytab {
    /// Whether the keytab holds a key for `spn`.
    pub fn contains(&self, spn: &str) -> bool {
        self.entries.contains_key(spn)
    }

    /// Service principal names in the keytab.
    pub fn spns(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Open a ticket issued for `spn`.
    ///
    /// Returns `Ok(None)` when the keytab has no key for `spn`.
    pub(crate) fn open_ticket(&self, spn: &str, sealed: &[u8]) -> Result<Option<TicketContents>> {
        let Some(key) = self.entries.get(spn) else {
            return Ok(None);
        };
        let plain = AeadAlgorithm::Aes256Gcm.open(key, 0, sealed, spn.as_bytes())?;
        let mut reader = TokenReader::new(&plain, TICKET)?;
        let user = reader.string()?;
        let session_key = Zeroizing::new(reader.array::<32>()?);
        reader.finish()?;
        Ok(Some(TicketContents { user, session_key }))
    }
}

impl fmt::Debug for Keytab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
