//! Loopback scenarios over real TCP sockets, against the single-realm fixture.
//!
//! Client and server authenticate concurrently; success cases check both views of the
//! negotiated context, failure cases check that a Kerberos failure never falls back to NTLM.

use negstream::core::{AuthenticationType, Error as CoreError, MAX_WRITE_DATA_SIZE};
use negstream::mechanism::{
    Credential, NegotiateAcceptor, NegotiateInitiator, Realm, UNKNOWN_SERVICE,
};
use negstream::transport::{tcp, AsyncNegotiateStream, NegotiateStream};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(30);
const KEYTAB: [&str; 2] = ["HOST/localhost", "HOST/linuxclient.linux.contoso.com"];
const TARGET_NAME: &str = "HOST/linuxclient.linux.contoso.com";
const SAMPLE: &[u8] = b"Sample Test Message";
const PARTIAL: usize = 5;

fn long_message() -> Vec<u8> {
    let mut message = vec![b'A'; MAX_WRITE_DATA_SIZE];
    message.push(b'Z');
    message
}

async fn connected_pair(
    realm: &Arc<Realm>,
    user: &str,
    password: &str,
    target: &str,
) -> (
    AsyncNegotiateStream<TcpStream>,
    negstream::transport::Result<()>,
    AsyncNegotiateStream<TcpStream>,
    negstream::transport::Result<()>,
) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(
        tcp::connect_async(addr, Some(TIMEOUT)),
        tcp::accept_async(&listener)
    );
    let mut client = AsyncNegotiateStream::new(connected.unwrap());
    let mut server = AsyncNegotiateStream::new(accepted.unwrap().0);

    let keytab = realm.keytab(KEYTAB).unwrap();
    let (c, s) = tokio::join!(
        client.authenticate_as_client(
            Box::new(NegotiateInitiator::new(
                realm.clone(),
                Credential::new(user, password)
            )),
            target
        ),
        server.authenticate_as_server(Box::new(NegotiateAcceptor::new(realm.clone(), keytab))),
    );
    (client, c, server, s)
}

#[tokio::test]
async fn test_valid_authentication_succeeds() {
    let realm = Arc::new(Realm::linux_contoso());
    let cases = [
        ("user1", true, "HOST/localhost"),
        ("user1", true, "HOST/linuxclient.linux.contoso.com"),
        ("user1", false, "UNKNOWNHOST/localhost"),
        ("ntlmonly", false, "HOST/localhost"),
        ("ntlmonly", false, "NEWSERVICE/localhost"),
        ("defaultcred", true, "HOST/localhost"),
        ("defaultcred", true, "HOST/linuxclient.linux.contoso.com"),
    ];

    for (user, kerberos, target) in cases {
        let (client, c, server, s) = connected_pair(&realm, user, "password", target).await;
        c.unwrap_or_else(|e| panic!("client {user} -> {target}: {e}"));
        s.unwrap_or_else(|e| panic!("server {user} -> {target}: {e}"));

        let package = if kerberos {
            AuthenticationType::Kerberos
        } else {
            AuthenticationType::Ntlm
        };
        let remote_name = if kerberos {
            format!("{user}@{}", realm.name())
        } else {
            format!("{}\\{user}", realm.domain())
        };

        for (stream, is_server, expected_name) in [
            (&client, false, target.to_string()),
            (&server, true, remote_name),
        ] {
            assert!(stream.is_authenticated());
            assert_eq!(stream.is_server(), is_server);
            assert_eq!(stream.is_mutually_authenticated(), kerberos);
            assert!(stream.is_encrypted());
            assert!(stream.is_signed());
            let identity = stream.remote_identity().unwrap();
            assert_eq!(identity.authentication_type, package);
            assert!(identity.is_authenticated);
            assert_eq!(identity.name, expected_name);
        }
    }
}

#[tokio::test]
async fn test_invalid_authentication_fails_without_fallback() {
    let realm = Arc::new(Realm::linux_contoso());
    let cases = [
        ("password", "NEWSERVICE/localhost", UNKNOWN_SERVICE),
        ("passwordxx", "HOST/localhost", "bad credential"),
    ];

    for (password, target, reason) in cases {
        let (client, c, server, s) = connected_pair(&realm, "user1", password, target).await;
        let expected = CoreError::Authentication(reason.into());
        assert_eq!(s.unwrap_err().protocol(), Some(&expected), "{target}");
        assert_eq!(c.unwrap_err().protocol(), Some(&expected), "{target}");
        assert!(!client.is_authenticated());
        assert!(!server.is_authenticated());
    }
}

#[tokio::test]
async fn test_successive_client_writes_async() {
    let realm = Arc::new(Realm::linux_contoso());
    let (mut client, c, mut server, s) =
        connected_pair(&realm, "defaultcred", "password", TARGET_NAME).await;
    c.unwrap();
    s.unwrap();

    let mut received = vec![0u8; SAMPLE.len()];
    let (w, r) = tokio::join!(client.write(SAMPLE), server.read(&mut received));
    w.unwrap();
    assert_eq!(r.unwrap(), SAMPLE.len());
    assert_eq!(received, SAMPLE);

    client.write(SAMPLE).await.unwrap();
    received.fill(0);
    assert_eq!(server.read(&mut received[..PARTIAL]).await.unwrap(), PARTIAL);
    assert_eq!(
        server.read(&mut received[PARTIAL..]).await.unwrap(),
        SAMPLE.len() - PARTIAL
    );
    assert_eq!(received, SAMPLE);
}

#[tokio::test]
async fn test_long_message_async() {
    let realm = Arc::new(Realm::linux_contoso());
    let (mut client, c, mut server, s) =
        connected_pair(&realm, "defaultcred", "password", TARGET_NAME).await;
    c.unwrap();
    s.unwrap();

    let message = long_message();
    client.write(&message).await.unwrap();
    let mut received = vec![0u8; message.len()];
    let mut read = 0;
    while read < message.len() {
        read += server.read(&mut received[read..]).await.unwrap();
    }
    assert_eq!(received, message);
}

#[test]
fn test_long_message_and_partial_reads_blocking() {
    let realm = Arc::new(Realm::linux_contoso());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_realm = realm.clone();
    let server = std::thread::spawn(move || {
        let (socket, _) = tcp::accept(&listener, Some(TIMEOUT)).unwrap();
        let keytab = server_realm.keytab(KEYTAB).unwrap();
        let mut stream = NegotiateStream::new(socket);
        stream
            .authenticate_as_server(Box::new(NegotiateAcceptor::new(server_realm, keytab)))
            .unwrap();

        let mut partial = vec![0u8; SAMPLE.len()];
        assert_eq!(stream.read(&mut partial[..PARTIAL]).unwrap(), PARTIAL);
        assert_eq!(
            stream.read(&mut partial[PARTIAL..]).unwrap(),
            SAMPLE.len() - PARTIAL
        );

        let expected = long_message();
        let mut received = vec![0u8; expected.len()];
        let mut read = 0;
        while read < expected.len() {
            read += stream.read(&mut received[read..]).unwrap();
        }
        (partial, received)
    });

    let socket = tcp::connect(addr, Some(TIMEOUT)).unwrap();
    let mut client = NegotiateStream::new(socket);
    client
        .authenticate_as_client(
            Box::new(NegotiateInitiator::new(
                realm,
                Credential::new("defaultcred", "password"),
            )),
            TARGET_NAME,
        )
        .unwrap();
    client.write(SAMPLE).unwrap();
    client.write(&long_message()).unwrap();
    client.close().unwrap();

    let (partial, received) = server.join().unwrap();
    assert_eq!(partial, SAMPLE);
    assert_eq!(received, long_message());
}
