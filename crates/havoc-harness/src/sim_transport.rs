//! Turmoil-based session transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use havoc_core::transport::Transport;
use turmoil::net::{TcpListener, TcpStream};

/// Session listener over Turmoil's deterministic TCP.
///
/// Bind `0.0.0.0:<port>` inside a simulated host; agents on other hosts dial
/// `"<host>:<port>"`. Dropping the transport releases the port in the
/// simulated host.
pub struct SimTransport {
    listener: TcpListener,
}

impl SimTransport {
    /// Dial a listener from inside a simulated host.
    ///
    /// # Errors
    ///
    /// Returns error if the host is unknown or the connection is refused.
    pub async fn connect(address: &str) -> io::Result<TcpStream> {
        TcpStream::connect(address).await
    }
}

#[async_trait]
impl Transport for SimTransport {
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
