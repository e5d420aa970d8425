//! Crate error types
//!
//! One error enum covers the whole lifecycle surface: bind and accept
//! failures, discovery-directory and broker failures, subscriber
//! validation, and lifecycle misuse.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for server lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to bind the listening socket. Fatal to `start`.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Generic I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Discovery directory call failed
    #[error("registry: {0}")]
    Registry(String),

    /// Broker call failed (connect, subscribe, publish)
    #[error("broker: {0}")]
    Broker(String),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Subscriber rejected at `subscribe` time
    #[error("invalid subscriber: {0}")]
    InvalidSubscriber(&'static str),

    /// The same subscriber instance was registered twice
    #[error("subscriber already registered for topic {0}")]
    DuplicateSubscriber(String),

    /// `start` called while the server is already running
    #[error("server already running")]
    AlreadyRunning,

    /// `stop` called while the server is not running
    #[error("server not running")]
    NotRunning,

    /// Health check reported failure
    #[error("unhealthy: {0}")]
    Unhealthy(String),

    /// Internal invariant failure (e.g. a background task panicked)
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Build a registry error from any displayable cause
    pub fn registry(msg: impl Into<String>) -> Self {
        Error::Registry(msg.into())
    }

    /// Build a broker error from any displayable cause
    pub fn broker(msg: impl Into<String>) -> Self {
        Error::Broker(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let e = Error::registry("node gone");
        assert_eq!(e.to_string(), "registry: node gone");

        let e = Error::DuplicateSubscriber("events".into());
        assert_eq!(e.to_string(), "subscriber already registered for topic events");

        let e = Error::InvalidSubscriber("no handler functions");
        assert_eq!(e.to_string(), "invalid subscriber: no handler functions");
    }

    #[test]
    fn test_bind_error_carries_source() {
        let e = Error::Bind {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("127.0.0.1:80"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
