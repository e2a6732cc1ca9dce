//! Transport abstraction for the session listener.
//!
//! The session only needs a bound listener that hands out byte streams. The
//! trait is implemented twice:
//!
//! - [`TcpTransport`] (production): a tokio `TcpListener`
//! - `SimTransport` (havoc-harness): Turmoil's deterministic TCP
//!
//! Agents dial the monitor directly; there is no client side in this trait.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

/// A bound, connection-oriented listener.
///
/// # Lifecycle
///
/// ```text
/// Transport::bind()  →  local_addr()  →  accept() ... accept()  →  drop
/// ```
///
/// Dropping the transport releases the listening socket.
#[async_trait]
pub trait Transport: Sized + Send + Sync + 'static {
    /// Byte stream for one accepted connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Bind a listener on `address` (`host:port`, port 0 picks an ephemeral
    /// port).
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the address is invalid or already in use.
    async fn bind(address: &str) -> io::Result<Self>;

    /// Address actually bound, including the assigned port.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the socket address cannot be queried.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Wait for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` on a transient accept failure (for example
    /// file descriptor exhaustion). Callers keep listening.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;
}

/// Production transport over tokio TCP.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        self.listener.accept().await
    }
}
