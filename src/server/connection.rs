//! Accepted connection handed to the external handler
//!
//! Wraps the accepted socket (plain TCP or TLS) behind one stream type so
//! handlers never care about the transport. When a connection cap is
//! configured the cap permit travels inside the connection and is released
//! only when the handler drops it.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OwnedSemaphorePermit;

/// Byte stream a connection can be backed by
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// One accepted connection
pub struct Connection {
    stream: Box<dyn IoStream>,
    peer_addr: SocketAddr,
    max_msg_size: usize,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    pub(crate) fn new(
        stream: Box<dyn IoStream>,
        peer_addr: SocketAddr,
        max_msg_size: usize,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            stream,
            peer_addr,
            max_msg_size,
            _permit: permit,
        }
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Advisory maximum message size from the server configuration
    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_read_write_delegation() {
        let (client, server) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut conn = Connection::new(Box::new(server), addr, 1024, None);

        assert_eq!(conn.peer_addr(), addr);
        assert_eq!(conn.max_msg_size(), 1024);

        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        client_wr.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        conn.write_all(b"pong").await.unwrap();
        conn.flush().await.unwrap();
        let mut buf = [0u8; 4];
        client_rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
