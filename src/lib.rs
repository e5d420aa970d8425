//! Service endpoint lifecycle manager
//!
//! A library component for hosting a network service node: it binds the
//! listening socket (plain or TLS, optionally connection-capped), runs the
//! accept loop, advertises the node to a discovery directory, binds
//! declared topic subscriptions to a message broker, keeps the
//! registration fresh with a periodic health-checked ticker, and tears it
//! all down cleanly on shutdown.
//!
//! The wire protocol is not this crate's business: every accepted
//! connection is dispatched to a caller-supplied [`ConnectionHandler`].
//! The directory and broker are likewise consumed through narrow traits
//! ([`registry::Registry`], [`broker::Broker`]); in-process
//! implementations of both are included for tests and single-binary
//! deployments.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use svcnode_rs::broker::MemoryBroker;
//! use svcnode_rs::registry::MemoryRegistry;
//! use svcnode_rs::{Connection, ConnectionHandler, Server, ServerConfig, Subscriber};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl ConnectionHandler for Echo {
//!     async fn serve(&self, mut conn: Connection) {
//!         let (mut rd, mut wr) = tokio::io::split(&mut conn);
//!         let _ = tokio::io::copy(&mut rd, &mut wr).await;
//!     }
//! }
//!
//! # async fn run() -> svcnode_rs::Result<()> {
//! let config = ServerConfig::new(Arc::new(MemoryRegistry::new()), Arc::new(MemoryBroker::new()))
//!     .bind("127.0.0.1:9000".parse().unwrap())
//!     .name("echo")
//!     .register_interval(Duration::from_secs(30));
//!
//! let server = Arc::new(Server::new(config, Echo));
//! server
//!     .subscribe(Arc::new(
//!         Subscriber::new("echo.events").handler(|msg| async move {
//!             println!("event: {:?}", msg.body);
//!             Ok(())
//!         }),
//!     ))
//!     .await?;
//!
//! server.start().await?;
//! // ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod registry;
pub mod server;

pub use error::{Error, Result};
pub use server::{
    Connection, ConnectionHandler, HealthCheck, Server, ServerConfig, Subscriber,
    DEFAULT_MAX_MSG_SIZE,
};
