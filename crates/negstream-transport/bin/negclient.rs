//! Demo client: authenticate, print the negotiated properties, send one message, close.

use clap::Parser;
use negstream_core::{ImpersonationLevel, ProtectionLevel};
use negstream_mechanism::{Credential, NegotiateInitiator, Realm};
use negstream_transport::{tcp, NegotiateStream, StreamConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "negclient", about = "Negotiated authentication stream test client")]
struct Args {
    /// Server host name or IP address.
    server: String,
    /// Server port.
    port: u16,
    /// Service principal name to authenticate against, e.g. HOST/localhost.
    target: String,
    /// User name; the default credential is used when omitted.
    #[arg(requires = "password")]
    user: Option<String>,
    /// Password for `user`.
    password: Option<String>,
    /// Secret the realm's service keys derive from; must match the server.
    #[arg(long, default_value = "password")]
    service_password: String,
    /// Socket timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Size of the message sent after authentication.
    #[arg(long, default_value_t = 65536)]
    message_len: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let realm = Arc::new(Realm::linux_contoso_with_service_password(
        &args.service_password,
    )?);
    let credential = match (&args.user, &args.password) {
        (Some(user), Some(password)) => Credential::new(user.as_str(), password.as_str()),
        _ => Credential::new("defaultcred", "password"),
    };

    let socket = tcp::connect(
        (args.server.as_str(), args.port),
        Some(Duration::from_secs(args.timeout)),
    )?;
    println!("Client connected to {}:{}", args.server, args.port);

    let mut config = StreamConfig::default();
    config.session.requirements.protection = ProtectionLevel::EncryptAndSign;
    config.session.impersonation = ImpersonationLevel::Identification;
    let mut stream = NegotiateStream::with_config(socket, config);

    print!("Client waiting for authentication...");
    stream.authenticate_as_client(
        Box::new(NegotiateInitiator::new(realm, credential)),
        &args.target,
    )?;
    println!("done.");
    display_properties(&stream);

    let message = vec![b'A'; args.message_len];
    stream.write(&message)?;
    println!("Sent {} bytes.", message.len());

    stream.close()?;
    println!("Closing client.");
    Ok(())
}

fn display_properties<S>(stream: &NegotiateStream<S>) {
    println!("IsAuthenticated: {}", stream.is_authenticated());
    println!("IsMutuallyAuthenticated: {}", stream.is_mutually_authenticated());
    println!("IsEncrypted: {}", stream.is_encrypted());
    println!("IsSigned: {}", stream.is_signed());
    println!("IsServer: {}", stream.is_server());
    println!("ImpersonationLevel: {:?}", stream.impersonation_level());
    if let Some(identity) = stream.remote_identity() {
        println!("ServerIdentity.AuthenticationType: {}", identity.authentication_type);
        println!("ServerIdentity.IsAuthenticated: {}", identity.is_authenticated);
        println!("ServerIdentity.Name: {}", identity.name);
    }
}
