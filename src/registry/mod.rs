//! Discovery directory client seam
//!
//! The server advertises itself to an external discovery directory and
//! removes itself on shutdown. The directory itself is an external
//! collaborator consumed through the [`Registry`] trait; this crate only
//! defines the contract plus an in-process implementation for tests,
//! demos, and single-binary deployments.

pub mod descriptor;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use descriptor::{Endpoint, Node, ServiceDescriptor};
pub use memory::MemoryRegistry;

/// Discovery directory client (driven port)
///
/// Implementations are expected to be idempotent: registering the same
/// descriptor twice refreshes it, deregistering an unknown descriptor is
/// not an error.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Advertise a service descriptor with the given time-to-live.
    ///
    /// A zero TTL means no expiry.
    async fn register(&self, service: &ServiceDescriptor, ttl: Duration) -> Result<()>;

    /// Remove a previously advertised descriptor.
    async fn deregister(&self, service: &ServiceDescriptor) -> Result<()>;

    /// Look up the descriptors currently advertised under a service name.
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceDescriptor>>;
}
