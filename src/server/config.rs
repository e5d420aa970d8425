//! Server configuration
//!
//! Every recognized option is an explicit, typed field: TLS settings,
//! connection caps, the listener override, registration TTL and refresh
//! interval, and the externally constructed registry and broker clients.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_rustls::rustls;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::registry::Registry;

/// Default advisory maximum message size surfaced to handlers (8 KiB)
pub const DEFAULT_MAX_MSG_SIZE: usize = 8 * 1024;

/// Periodic probe deciding whether the node should remain advertised
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Server configuration options
///
/// Created once at construction and replaced wholesale by
/// [`Server::init`](crate::server::Server::init).
pub struct ServerConfig {
    /// Address to bind to; port 0 picks an ephemeral port
    pub bind_addr: SocketAddr,

    /// Advertised service name
    pub name: String,

    /// Node id; combined with the name for the advertised node identity
    pub id: String,

    /// Advertised service version
    pub version: String,

    /// TLS settings; when present the listener wraps accepted sockets
    pub tls: Option<Arc<rustls::ServerConfig>>,

    /// Maximum simultaneous connections (0 = unlimited). Enforced by
    /// blocking further accepts, not by rejecting connections.
    pub max_connections: usize,

    /// Advisory maximum message size, surfaced to connection handlers
    pub max_msg_size: usize,

    /// Registration time-to-live passed to the registry (zero = no expiry)
    pub register_ttl: Duration,

    /// Re-registration/health-check interval (zero disables the ticker)
    pub register_interval: Duration,

    /// Optional health probe run once per ticker interval
    pub health_check: Option<Arc<dyn HealthCheck>>,

    /// Discovery directory client
    pub registry: Arc<dyn Registry>,

    /// Message broker client
    pub broker: Arc<dyn Broker>,

    /// External listener override; used verbatim, bypassing the bind
    /// address, TLS settings, and connection cap
    pub listener: Option<TcpListener>,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
}

impl ServerConfig {
    /// Create a config with defaults and the given collaborator clients
    pub fn new(registry: Arc<dyn Registry>, broker: Arc<dyn Broker>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            name: "server".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            version: "latest".to_string(),
            tls: None,
            max_connections: 0,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            register_ttl: Duration::ZERO,
            register_interval: Duration::ZERO,
            health_check: None,
            registry,
            broker,
            listener: None,
            tcp_nodelay: true,
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the advertised service name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the node id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the advertised version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Enable TLS with the given rustls settings
    pub fn tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the maximum simultaneous connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the advisory maximum message size
    pub fn max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set the registration TTL
    pub fn register_ttl(mut self, ttl: Duration) -> Self {
        self.register_ttl = ttl;
        self
    }

    /// Set the re-registration interval
    pub fn register_interval(mut self, interval: Duration) -> Self {
        self.register_interval = interval;
        self
    }

    /// Install a health probe
    pub fn health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Supply an already-bound listener, bypassing address/TLS/cap logic
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Disable TCP_NODELAY on accepted sockets
    pub fn disable_nodelay(mut self) -> Self {
        self.tcp_nodelay = false;
        self
    }

    /// Advertised node identity (`<name>-<id>`)
    pub fn node_id(&self) -> String {
        format!("{}-{}", self.name, self.id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("name must not be empty".into()));
        }
        if self.id.is_empty() {
            return Err(Error::Config("id must not be empty".into()));
        }
        if self.version.is_empty() {
            return Err(Error::Config("version must not be empty".into()));
        }
        if self.max_msg_size == 0 {
            return Err(Error::Config("max_msg_size must be positive".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("name", &self.name)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("tls", &self.tls.is_some())
            .field("max_connections", &self.max_connections)
            .field("max_msg_size", &self.max_msg_size)
            .field("register_ttl", &self.register_ttl)
            .field("register_interval", &self.register_interval)
            .field("health_check", &self.health_check.is_some())
            .field("listener", &self.listener.is_some())
            .field("tcp_nodelay", &self.tcp_nodelay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::registry::MemoryRegistry;

    fn config() -> ServerConfig {
        ServerConfig::new(Arc::new(MemoryRegistry::new()), Arc::new(MemoryBroker::new()))
    }

    #[test]
    fn test_default_config() {
        let config = config();

        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.name, "server");
        assert!(!config.id.is_empty());
        assert_eq!(config.version, "latest");
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.max_msg_size, DEFAULT_MAX_MSG_SIZE);
        assert_eq!(config.register_interval, Duration::ZERO);
        assert!(config.tls.is_none());
        assert!(config.tcp_nodelay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = config()
            .bind(addr)
            .name("greeter")
            .id("1")
            .version("1.0.0")
            .max_connections(50)
            .max_msg_size(64 * 1024)
            .register_ttl(Duration::from_secs(60))
            .register_interval(Duration::from_secs(30))
            .disable_nodelay();

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.name, "greeter");
        assert_eq!(config.node_id(), "greeter-1");
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.max_msg_size, 64 * 1024);
        assert_eq!(config.register_ttl, Duration::from_secs(60));
        assert_eq!(config.register_interval, Duration::from_secs(30));
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = config().name("");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_msg_size() {
        let config = config().max_msg_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
