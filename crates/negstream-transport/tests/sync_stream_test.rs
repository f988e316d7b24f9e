//! Blocking stream over loopback TCP.
//!
//! Each test runs the acceptor on a std thread and the initiator on the test thread.


use negstream_core::{
    AuthenticationType, Error as CoreError, HandshakeState, MAX_WRITE_DATA_SIZE,
};
use negstream_mechanism::UNKNOWN_SERVICE;
use negstream_transport::{Error, NegotiateStream, StreamConfig};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use test_helpers::*;

/// Spawn an acceptor that authenticates, then hands the stream to `serve`.
fn spawn_server<T, F>(socket: TcpStream, serve: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&mut NegotiateStream<TcpStream>, Result<(), Error>) -> T + Send + 'static,
{
    thread::spawn(move || {
        let realm = realm();
        let mut stream = NegotiateStream::new(socket);
        let outcome = stream.authenticate_as_server(acceptor(&realm));
        serve(&mut stream, outcome)
    })
}

fn read_to_end(stream: &mut NegotiateStream<TcpStream>) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).expect("read");
        if n == 0 {
            return received;
        }
        received.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn test_kerberos_loopback_round_trip() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        assert!(stream.is_server());
        assert!(stream.is_mutually_authenticated());
        let identity = stream.remote_identity().expect("identity").clone();
        (identity, read_to_end(stream))
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap();

    assert!(client.is_authenticated());
    assert!(client.is_mutually_authenticated());
    assert!(client.is_encrypted());
    assert!(client.is_signed());
    assert!(!client.is_server());
    assert_eq!(client.handshake_state(), HandshakeState::Succeeded);
    let view = client.remote_identity().unwrap();
    assert_eq!(view.authentication_type, AuthenticationType::Kerberos);
    assert_eq!(view.name, "HOST/localhost");

    let message = vec![b'A'; 65536];
    client.write(&message).unwrap();
    client.close().unwrap();

    let (identity, received) = server.join().unwrap();
    assert_eq!(identity.name, "user1@LINUX.CONTOSO.COM");
    assert_eq!(identity.authentication_type, AuthenticationType::Kerberos);
    assert_eq!(received, message);
}

#[test]
fn test_ntlm_for_unknown_host() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        stream.remote_identity().expect("identity").clone()
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(
            initiator(&realm, "user1", "password"),
            "UNKNOWNHOST/localhost",
        )
        .unwrap();
    assert!(!client.is_mutually_authenticated());
    assert!(client.is_encrypted());
    assert_eq!(
        client.remote_identity().unwrap().authentication_type,
        AuthenticationType::Ntlm
    );

    let identity = server.join().unwrap();
    assert_eq!(identity.name, "LINUX\\user1");
    assert_eq!(identity.authentication_type, AuthenticationType::Ntlm);
}

#[test]
fn test_exact_partial_reads() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        let mut out = [0u8; 20];
        assert_eq!(stream.read(&mut out[..5]).unwrap(), 5);
        assert_eq!(stream.read(&mut out[5..]).unwrap(), 15);
        out
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap();
    client.write(SAMPLE).unwrap();

    assert_eq!(&server.join().unwrap(), SAMPLE);
}

#[test]
fn test_message_above_frame_limit_needs_repeated_reads() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        let mut first = vec![0u8; MAX_WRITE_DATA_SIZE + 1];
        let n = stream.read(&mut first).unwrap();
        assert_eq!(n, MAX_WRITE_DATA_SIZE);
        let mut rest = [0u8; 8];
        assert_eq!(stream.read(&mut rest).unwrap(), 1);
        first[n] = rest[0];
        first
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(initiator(&realm, "user2", "password"), "HOST/localhost")
        .unwrap();
    let mut message = vec![b'x'; MAX_WRITE_DATA_SIZE];
    message.push(b'y');
    client.write(&message).unwrap();

    assert_eq!(server.join().unwrap(), message);
}

#[test]
fn test_io_traits() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        let mut received = Vec::new();
        Read::read_to_end(stream, &mut received).unwrap();
        received
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap();
    writeln!(client, "hello over {}", "negotiate").unwrap();
    client.close().unwrap();

    assert_eq!(server.join().unwrap(), b"hello over negotiate\n");
}

#[test]
fn test_gating_before_authentication() {
    let (client_socket, _server_socket) = tcp_pair();
    let mut client = NegotiateStream::new(client_socket);

    let err = client.read(&mut [0u8; 4]).unwrap_err();
    assert!(matches!(err.protocol(), Some(CoreError::InvalidOperation(_))));
    let err = client.write(b"early").unwrap_err();
    assert!(matches!(err.protocol(), Some(CoreError::InvalidOperation(_))));
    assert_eq!(client.handshake_state(), HandshakeState::NotStarted);
}

#[test]
fn test_second_authenticate_is_invalid() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |_, outcome| outcome.is_ok());

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap();
    let err = client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap_err();
    assert_eq!(
        err.protocol(),
        Some(&CoreError::InvalidOperation(
            "authentication already attempted".into()
        ))
    );
    assert!(client.is_authenticated());
    assert!(server.join().unwrap());
}

#[test]
fn test_service_missing_from_keytab_fails_both_sides() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        let err = outcome.unwrap_err();
        let gated = stream.read(&mut [0u8; 1]).unwrap_err();
        (err, stream.handshake_state(), gated)
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    let err = client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "NEWSERVICE/localhost")
        .unwrap_err();
    assert!(err.is_authentication());
    assert_eq!(
        err.protocol(),
        Some(&CoreError::Authentication(UNKNOWN_SERVICE.into()))
    );
    assert_eq!(client.handshake_state(), HandshakeState::Failed);
    assert!(matches!(
        client.write(b"x").unwrap_err().protocol(),
        Some(CoreError::InvalidOperation(_))
    ));

    let (server_err, state, gated) = server.join().unwrap();
    assert_eq!(
        server_err.protocol(),
        Some(&CoreError::Authentication(UNKNOWN_SERVICE.into()))
    );
    assert_eq!(state, HandshakeState::Failed);
    assert!(matches!(gated.protocol(), Some(CoreError::InvalidOperation(_))));
}

#[test]
fn test_bad_password_fails_both_sides() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |_, outcome| outcome.unwrap_err());

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    let err = client
        .authenticate_as_client(initiator(&realm, "user1", "wrong"), "HOST/localhost")
        .unwrap_err();
    assert_eq!(
        err.protocol(),
        Some(&CoreError::Authentication("bad credential".into()))
    );
    assert!(server.join().unwrap().is_authentication());
}

#[test]
fn test_peer_disconnect_aborts_handshake() {
    let (client_socket, server_socket) = tcp_pair();
    drop(client_socket);

    let realm = realm();
    let mut server = NegotiateStream::new(server_socket);
    let err = server.authenticate_as_server(acceptor(&realm)).unwrap_err();
    assert_eq!(err.protocol(), Some(&CoreError::HandshakeAborted));
    assert_eq!(server.handshake_state(), HandshakeState::Failed);
}

#[test]
fn test_transport_timeout_fails_handshake() {
    let (client_socket, server_socket) = tcp_pair();
    client_socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    let err = client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap_err();
    assert_eq!(err.protocol(), Some(&CoreError::TimedOut));
    assert_eq!(client.handshake_state(), HandshakeState::Failed);
    drop(server_socket);
}

#[test]
fn test_tampered_frame_fails_fast() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        let first = stream.read(&mut [0u8; 16]).unwrap_err();
        let second = stream.read(&mut [0u8; 16]).unwrap_err();
        (first, second)
    });

    let realm = realm();
    let mut client = NegotiateStream::new(client_socket);
    client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap();
    let forged = [24u8, 0, 0, 0]
        .into_iter()
        .chain([0xAB; 24])
        .collect::<Vec<_>>();
    client.get_mut().unwrap().write_all(&forged).unwrap();

    let (first, second) = server.join().unwrap();
    assert!(matches!(first.protocol(), Some(CoreError::Decryption(_))));
    assert!(matches!(second.protocol(), Some(CoreError::InvalidOperation(_))));
}

#[test]
fn test_flush_before_authentication_reaches_transport() {
    let (client_socket, _server_socket) = tcp_pair();
    let (tracking, flushed) = FlushTracking::new(client_socket);
    let mut client = NegotiateStream::new(tracking);

    assert!(!flushed.load(Ordering::SeqCst));
    client.flush().unwrap();
    assert!(flushed.load(Ordering::SeqCst));
}

#[test]
fn test_close_is_idempotent_and_honours_leave_open() {
    let (client_socket, server_socket) = tcp_pair();
    let server = spawn_server(server_socket, |stream, outcome| {
        outcome.expect("server authenticates");
        read_to_end(stream)
    });

    let realm = realm();
    let config = StreamConfig {
        leave_inner_stream_open: true,
        ..StreamConfig::default()
    };
    let mut client = NegotiateStream::with_config(client_socket, config);
    client
        .authenticate_as_client(initiator(&realm, "user1", "password"), "HOST/localhost")
        .unwrap();
    client.write(b"bye").unwrap();
    client.close().unwrap();
    client.close().unwrap();

    assert!(client.leave_inner_stream_open());
    assert!(client.get_ref().is_some());
    assert!(!client.is_authenticated());
    assert!(matches!(
        client.read(&mut [0u8; 1]).unwrap_err().protocol(),
        Some(CoreError::InvalidOperation(_))
    ));
    assert_eq!(server.join().unwrap(), b"bye");

    let mut dropped = NegotiateStream::new(tcp_pair().0);
    dropped.close().unwrap();
    assert!(dropped.get_ref().is_none());
}
