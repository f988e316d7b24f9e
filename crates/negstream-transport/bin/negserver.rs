//! Demo server: accept in a loop, authenticate each client, read its message to EOF.

use clap::Parser;
use negstream_mechanism::{Keytab, NegotiateAcceptor, Realm};
use negstream_transport::{tcp, AsyncNegotiateStream, StreamConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "negserver", about = "Negotiated authentication stream test server")]
struct Args {
    /// Port to listen on.
    port: u16,
    /// Service principal names this server holds keys for.
    #[arg(
        long = "spn",
        default_values = ["HOST/localhost", "HOST/linuxclient.linux.contoso.com"]
    )]
    spns: Vec<String>,
    /// Secret the realm's service keys derive from; must match the client.
    #[arg(long, default_value = "password")]
    service_password: String,
    /// Per-operation timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let realm = Arc::new(Realm::linux_contoso_with_service_password(
        &args.service_password,
    )?);
    let keytab = realm.keytab(args.spns.iter().map(String::as_str))?;
    let timeout = Duration::from_secs(args.timeout);

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    println!("Listening on 0.0.0.0:{} for clients...", args.port);

    loop {
        print!("Waiting for client...");
        let (socket, _) = match tcp::accept_async(&listener).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        println!("client connected.");
        tokio::spawn(authenticate_client(
            socket,
            realm.clone(),
            keytab.clone(),
            timeout,
        ));
    }
}

async fn authenticate_client(
    socket: TcpStream,
    realm: Arc<Realm>,
    keytab: Keytab,
    timeout: Duration,
) {
    let config = StreamConfig::default()
        .with_handshake_timeout(timeout)
        .with_io_timeout(timeout);
    let mut stream = AsyncNegotiateStream::with_config(socket, config);

    if let Err(e) = serve(&mut stream, realm, keytab).await {
        println!("{}", e);
    }
    if let Err(e) = stream.close().await {
        tracing::debug!(error = %e, "close failed");
    }
}

async fn serve(
    stream: &mut AsyncNegotiateStream<TcpStream>,
    realm: Arc<Realm>,
    keytab: Keytab,
) -> negstream_transport::Result<()> {
    stream
        .authenticate_as_server(Box::new(NegotiateAcceptor::new(realm, keytab)))
        .await?;
    display_properties(stream);

    let mut buffer = vec![0u8; 65536];
    let mut received = 0usize;
    loop {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        received += n;
    }

    let name = stream
        .remote_identity()
        .map(|identity| identity.name.clone())
        .unwrap_or_default();
    println!("{} sent a message of length: {}", name, received);
    println!("Client disconnected.");
    println!();
    Ok(())
}

fn display_properties<S>(stream: &AsyncNegotiateStream<S>) {
    println!("IsAuthenticated: {}", stream.is_authenticated());
    println!("IsMutuallyAuthenticated: {}", stream.is_mutually_authenticated());
    println!("IsEncrypted: {}", stream.is_encrypted());
    println!("IsSigned: {}", stream.is_signed());
    println!("IsServer: {}", stream.is_server());
    println!("ImpersonationLevel: {:?}", stream.impersonation_level());
    if let Some(identity) = stream.remote_identity() {
        println!("ClientIdentity.AuthenticationType: {}", identity.authentication_type);
        println!("ClientIdentity.IsAuthenticated: {}", identity.is_authenticated);
        println!("ClientIdentity.Name: {}", identity.name);
    }
}
