//! Listener source and accept loop
//!
//! Resolves the configured listener (caller-supplied override, TLS, or
//! plain TCP) and runs the accept loop: each accepted socket is handed to
//! the connection handler on its own task, transient accept errors retry
//! with exponential backoff, and a terminal error or the shutdown signal
//! ends the loop. Dropping out of the loop closes the listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_rustls::{rustls, TlsAcceptor};

use crate::error::{Error, Result};

use super::connection::{Connection, IoStream};
use super::handler::ConnectionHandler;

/// First backoff delay after a transient accept error
pub(crate) const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Backoff ceiling for consecutive transient accept errors
pub(crate) const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// A resolved listener, optionally TLS-wrapping accepted sockets
pub(crate) struct BoundListener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl BoundListener {
    /// Bind a new listener, wrapping with TLS when settings are present.
    /// Bind failure is fatal to `start`.
    pub(crate) async fn bind(
        addr: SocketAddr,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self {
            listener,
            tls: tls.map(TlsAcceptor::from),
        })
    }

    /// Use a caller-supplied listener verbatim: no TLS, no connection cap.
    pub(crate) fn external(listener: TcpListener) -> Self {
        Self {
            listener,
            tls: None,
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        self.tls.clone()
    }
}

/// Next delay after one more consecutive transient failure
pub(crate) fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        ACCEPT_BACKOFF_MIN
    } else {
        (current * 2).min(ACCEPT_BACKOFF_MAX)
    }
}

/// Whether an accept error is worth retrying
pub(crate) fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    // ENFILE / EMFILE: descriptor exhaustion clears up once connections close
    matches!(err.raw_os_error(), Some(23) | Some(24))
}

/// Accept loop. Owns the listener for the server's lifetime; returning
/// drops it, which is what unblocks and closes the socket.
pub(crate) async fn accept_loop(
    listener: BoundListener,
    handler: Arc<dyn ConnectionHandler>,
    limit: Option<Arc<Semaphore>>,
    max_msg_size: usize,
    tcp_nodelay: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let tls = listener.tls_acceptor();
    let mut backoff = Duration::ZERO;

    loop {
        // With a cap configured, hold an accept slot before accepting so
        // excess connections wait in the kernel queue instead of being
        // turned away.
        let permit = match &limit {
            Some(semaphore) => {
                let semaphore = Arc::clone(semaphore);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                }
            }
            None => None,
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    backoff = Duration::ZERO;
                    tracing::debug!(peer = %peer_addr, "connection accepted");

                    if tcp_nodelay {
                        if let Err(e) = socket.set_nodelay(true) {
                            tracing::debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
                        }
                    }

                    spawn_connection(
                        socket,
                        peer_addr,
                        tls.clone(),
                        Arc::clone(&handler),
                        permit,
                        max_msg_size,
                    );
                }
                Err(_) if *shutdown.borrow() => break,
                Err(ref e) if is_transient(e) => {
                    backoff = next_backoff(backoff);
                    tracing::warn!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient accept error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed, stopping accept loop");
                    break;
                }
            }
        }
    }
}

/// Dispatch an accepted socket to the handler on its own task. The TLS
/// handshake happens here, off the accept path, so a slow or broken
/// handshake cannot stall further accepts.
fn spawn_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn ConnectionHandler>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    max_msg_size: usize,
) {
    tokio::spawn(async move {
        let stream: Box<dyn IoStream> = match tls {
            Some(acceptor) => match acceptor.accept(socket).await {
                Ok(tls_stream) => Box::new(tls_stream),
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
                    return;
                }
            },
            None => Box::new(socket),
        };

        handler
            .serve(Connection::new(stream, peer_addr, max_msg_size, permit))
            .await;
        tracing::debug!(peer = %peer_addr, "connection handler finished");
    });
}
