//! TCP helpers.
//!
//! Connect and accept over `std::net` for [`crate::NegotiateStream`] and over `tokio::net`
//! for [`crate::AsyncNegotiateStream`]. Blocking sockets get read/write timeouts so that a
//! stalled peer surfaces as `TimedOut`; `TCP_NODELAY` is set since handshake tokens are
//! small and latency-bound.

use crate::{Error, Result};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

fn configure(stream: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(())
}

/// Connect a blocking socket, trying each resolved address in turn.
///
/// `timeout` bounds the connect and every later read and write.
///
/// # Errors
///
/// `ConnectionFailed` if the address does not resolve or no address accepts.
pub fn connect(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| Error::ConnectionFailed(format!("Invalid address: {}", e)))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(limit) => TcpStream::connect_timeout(&addr, limit),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                configure(&stream, timeout)?;
                tracing::debug!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(Error::ConnectionFailed(match last_error {
        Some(e) => format!("Connect failed: {}", e),
        None => "Address resolved to nothing".into(),
    }))
}

/// Accept one blocking connection and apply `timeout` to its reads and writes.
pub fn accept(listener: &TcpListener, timeout: Option<Duration>) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept()?;
    configure(&stream, timeout)?;
    tracing::debug!(%peer, "accepted");
    Ok((stream, peer))
}

/// Connect a tokio socket.
///
/// Per-operation deadlines for the resulting stream come from
/// [`crate::StreamConfig::io_timeout`].
pub async fn connect_async(
    addr: impl tokio::net::ToSocketAddrs,
    timeout: Option<Duration>,
) -> Result<tokio::net::TcpStream> {
    let connecting = tokio::net::TcpStream::connect(addr);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| Error::ConnectionFailed("Connect timed out".into()))?,
        None => connecting.await,
    }
    .map_err(|e| Error::ConnectionFailed(format!("Connect failed: {}", e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Accept one tokio connection.
pub async fn accept_async(
    listener: &tokio::net::TcpListener,
) -> Result<(tokio::net::TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    tracing::debug!(%peer, "accepted");
    Ok((stream, peer))
}
