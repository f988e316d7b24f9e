//! Handshake engine conformance.
//!
//! Drives two `Session`s against each other with a scripted mechanism whose tokens are
//! arbitrary bytes, so the engine's behaviour is observed independently of any real
//! authentication package.

use negstream::core::{
    AuthenticationType, Capabilities, Error, Frame, HandshakeParams, HandshakeState, Identity,
    Mechanism, MessageSealer, MessageUnsealer, Next, ProtectionLevel, Protection, Requirements,
    Role, Session, SessionConfig, Step,
};
use std::sync::{Arc, Mutex};

/// Tokens each side emits, in order. An entry of `None` rejects instead.
#[derive(Clone)]
struct Script {
    legs: Vec<Option<Vec<u8>>>,
    caps: Capabilities,
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
}

/// Error token sent by a rejecting side.
const NOTICE: u8 = 0x7F;

struct Scripted {
    script: Script,
    leg: usize,
}

impl Scripted {
    fn boxed(script: &Script) -> Box<dyn Mechanism> {
        Box::new(Self {
            script: script.clone(),
            leg: 0,
        })
    }
}

struct Clear;

impl MessageSealer for Clear {
    fn encrypt(&mut self, p: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(p.to_vec())
    }
    fn sign(&mut self, p: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(p.to_vec())
    }
}

impl MessageUnsealer for Clear {
    fn decrypt(&mut self, s: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(s.to_vec())
    }
    fn verify(&mut self, s: &[u8]) -> negstream::core::Result<Vec<u8>> {
        Ok(s.to_vec())
    }
}

impl Mechanism for Scripted {
    fn start(&mut self, _params: &HandshakeParams) -> negstream::core::Result<()> {
        Ok(())
    }

    fn step(&mut self, token_in: Option<&[u8]>) -> Step {
        if let Some(token) = token_in {
            self.script.seen.lock().unwrap().push(token.to_vec());
            if token == [NOTICE] {
                return Step::rejected("scripted rejection");
            }
        }
        let legs = &self.script.legs;
        let Some(leg) = legs.get(self.leg).cloned() else {
            return Step::complete(None);
        };
        self.leg += 1;
        let last = self.leg == legs.len();
        match leg {
            None => Step::rejected_with_notice("scripted rejection", vec![NOTICE]),
            Some(token) if last => Step::complete(Some(token)),
            Some(token) => Step::continue_with(token),
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        (self.leg >= self.script.legs.len()).then_some(self.script.caps)
    }

    fn remote_identity(&self) -> Option<Identity> {
        (self.leg >= self.script.legs.len()).then(|| Identity {
            authentication_type: AuthenticationType::Kerberos,
            name: "scripted".into(),
            is_authenticated: true,
        })
    }

    fn into_protection(self: Box<Self>) -> negstream::core::Result<Protection> {
        Ok((Box::new(Clear), Box::new(Clear)))
    }
}

const FULL: Capabilities = Capabilities {
    can_encrypt: true,
    can_sign: true,
    is_mutual: true,
};

fn script(legs: Vec<Option<&[u8]>>) -> Script {
    Script {
        legs: legs.into_iter().map(|l| l.map(<[u8]>::to_vec)).collect(),
        caps: FULL,
        seen: Arc::default(),
    }
}

/// Run both sides to completion; returns each session with its result.
fn run(
    client_script: &Script,
    server_script: &Script,
    server_config: SessionConfig,
) -> (
    Session,
    Result<(), Error>,
    Session,
    Result<(), Error>,
) {
    let mut client = Session::new(Role::Initiator);
    let mut server = Session::with_config(Role::Acceptor, server_config);

    let mut to_server = Vec::new();
    let mut to_client = Vec::new();
    let mut client_done = None;
    let mut server_done = None;

    let record = |outcome: Result<negstream::core::Transition, Error>,
                  session: &mut Session,
                  outbox: &mut Vec<Frame>,
                  done: &mut Option<Result<(), Error>>| {
        match outcome {
            Ok(t) => {
                outbox.extend(t.send);
                if t.next == Next::Complete {
                    *done = Some(Ok(()));
                }
            }
            Err(e) => {
                if Session::should_notify_peer(&e) {
                    outbox.push(session.take_abort_notice());
                }
                *done = Some(Err(e));
            }
        }
    };

    let outcome = client.begin(Scripted::boxed(client_script), Some("HOST/test"));
    record(outcome, &mut client, &mut to_server, &mut client_done);
    let outcome = server.begin(Scripted::boxed(server_script), None);
    record(outcome, &mut server, &mut to_client, &mut server_done);

    for _ in 0..16 {
        if server_done.is_none() && !to_server.is_empty() {
            let frame = to_server.remove(0);
            let outcome = server.receive_token(Some(frame));
            record(outcome, &mut server, &mut to_client, &mut server_done);
        }
        if client_done.is_none() && !to_client.is_empty() {
            let frame = to_client.remove(0);
            let outcome = client.receive_token(Some(frame));
            record(outcome, &mut client, &mut to_server, &mut client_done);
        }
    }
    (
        client,
        client_done.expect("client finished"),
        server,
        server_done.expect("server finished"),
    )
}

#[test]
fn test_tokens_pass_through_unmodified() {
    let client = script(vec![Some(&b"\x00\x01opaque"[..]), Some(&b"last"[..])]);
    let server = script(vec![Some(&b"\xffreply"[..]), Some(&b""[..])]);
    let (c, c_res, s, s_res) = run(&client, &server, SessionConfig::default());

    assert_eq!(c_res, Ok(()));
    assert_eq!(s_res, Ok(()));
    assert_eq!(c.state(), HandshakeState::Succeeded);
    assert_eq!(s.state(), HandshakeState::Succeeded);
    assert_eq!(
        *server.seen.lock().unwrap(),
        vec![b"\x00\x01opaque".to_vec(), b"last".to_vec()]
    );
    assert_eq!(*client.seen.lock().unwrap(), vec![b"\xffreply".to_vec()]);
}

#[test]
fn test_rejection_reaches_both_sides() {
    let client = script(vec![Some(&b"hello"[..]), Some(&b"more"[..])]);
    let server = script(vec![None]);
    let (c, c_res, s, s_res) = run(&client, &server, SessionConfig::default());

    let expected = Err(Error::Authentication("scripted rejection".into()));
    assert_eq!(s_res, expected);
    assert_eq!(c_res, expected);
    assert_eq!(s.state(), HandshakeState::Failed);
    assert_eq!(c.state(), HandshakeState::Failed);
    assert_eq!(*client.seen.lock().unwrap(), vec![vec![NOTICE]]);
}

#[test]
fn test_capability_requirement_enforced() {
    let client = script(vec![Some(&b"one"[..])]);
    let weak = Script {
        caps: Capabilities {
            can_encrypt: false,
            can_sign: true,
            is_mutual: false,
        },
        ..script(vec![Some(&b""[..])])
    };
    let server_config = SessionConfig {
        requirements: Requirements {
            protection: ProtectionLevel::EncryptAndSign,
            mutual_authentication: false,
        },
        ..SessionConfig::default()
    };
    let (_, _, s, s_res) = run(&client, &weak, server_config);
    assert!(matches!(s_res, Err(Error::CapabilityUnmet(_))));
    assert_eq!(s.state(), HandshakeState::Failed);
}

#[test]
fn test_end_of_stream_mid_handshake_aborts() {
    let mut server = Session::new(Role::Acceptor);
    let server_script = script(vec![Some(&b"reply"[..])]);
    let t = server.begin(Scripted::boxed(&server_script), None).unwrap();
    assert_eq!(t.next, Next::AwaitToken);

    assert_eq!(
        server.receive_token(Some(Frame::end_of_stream())),
        Err(Error::HandshakeAborted)
    );
    assert_eq!(server.state(), HandshakeState::Failed);
}

#[test]
fn test_transport_eof_mid_handshake_aborts() {
    let mut server = Session::new(Role::Acceptor);
    server
        .begin(Scripted::boxed(&script(vec![Some(&b"x"[..])])), None)
        .unwrap();
    assert_eq!(server.receive_token(None), Err(Error::HandshakeAborted));
}

#[test]
fn test_token_ceiling() {
    let config = SessionConfig {
        max_token_size: 8,
        ..SessionConfig::default()
    };
    let mut server = Session::with_config(Role::Acceptor, config);
    server
        .begin(Scripted::boxed(&script(vec![Some(&b"x"[..])])), None)
        .unwrap();
    assert!(matches!(
        server.receive_token(Some(Frame::new(vec![1; 9]))),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn test_gating_and_single_authentication() {
    let mut session = Session::new(Role::Initiator);
    assert!(matches!(
        session.ensure_established(),
        Err(Error::InvalidOperation(_))
    ));

    let client = script(vec![Some(&b"only"[..])]);
    session
        .begin(Scripted::boxed(&client), Some("HOST/test"))
        .unwrap();
    assert!(session.is_established());
    assert!(session.take_codec().is_some());
    assert!(session.take_codec().is_none());

    assert_eq!(
        session.begin(Scripted::boxed(&client), Some("HOST/test")),
        Err(Error::InvalidOperation(
            "authentication already attempted".into()
        ))
    );
    assert!(session.is_established());

    assert!(session.close());
    assert!(!session.close());
    assert!(matches!(
        session.ensure_established(),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_failure_is_terminal() {
    let mut session = Session::new(Role::Acceptor);
    session
        .begin(Scripted::boxed(&script(vec![Some(&b"x"[..])])), None)
        .unwrap();
    session.fail(Error::TimedOut);
    assert_eq!(session.state(), HandshakeState::Failed);
    assert_eq!(session.failure(), Some(&Error::TimedOut));
    assert!(matches!(
        session.receive_token(Some(Frame::new(b"late".to_vec()))),
        Err(Error::InvalidOperation(_))
    ));
}
