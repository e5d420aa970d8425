//! Service endpoint server
//!
//! Owns the listening socket and the node's lifecycle: accept loop with
//! backoff, registration against the discovery directory, subscription
//! binding against the broker, and periodic health-checked refresh.

pub mod config;
pub mod connection;
pub mod handler;
pub mod lifecycle;
pub mod listener;
pub mod subscriber;

pub use config::{HealthCheck, ServerConfig, DEFAULT_MAX_MSG_SIZE};
pub use connection::{Connection, IoStream};
pub use handler::ConnectionHandler;
pub use lifecycle::Server;
pub use subscriber::Subscriber;
