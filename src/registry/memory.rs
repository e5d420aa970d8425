//! In-process discovery registry
//!
//! Keeps advertised descriptors in a map, merging and pruning nodes by id.
//! Useful for tests, demos, and single-binary deployments where no external
//! directory exists. TTLs are recorded but never expired; an in-process
//! registry dies with the process anyway.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

use super::descriptor::{Node, ServiceDescriptor};
use super::Registry;

/// In-memory [`Registry`] implementation
#[derive(Default)]
pub struct MemoryRegistry {
    // name -> version -> descriptor
    services: RwLock<HashMap<String, HashMap<String, ServiceDescriptor>>>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of advertised descriptors across all services
    pub async fn len(&self) -> usize {
        self.services.read().await.values().map(HashMap::len).sum()
    }

    /// True when nothing is advertised
    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, service: &ServiceDescriptor, _ttl: Duration) -> Result<()> {
        let mut services = self.services.write().await;
        let versions = services.entry(service.name.clone()).or_default();

        match versions.get_mut(&service.version) {
            Some(existing) => {
                // Merge: replace nodes with matching ids, append new ones
                for node in &service.nodes {
                    match existing.nodes.iter_mut().find(|n| n.id == node.id) {
                        Some(slot) => *slot = node.clone(),
                        None => existing.nodes.push(node.clone()),
                    }
                }
                existing.endpoints = service.endpoints.clone();
            }
            None => {
                versions.insert(service.version.clone(), service.clone());
            }
        }

        tracing::debug!(
            service = %service.name,
            version = %service.version,
            nodes = service.nodes.len(),
            "service registered"
        );
        Ok(())
    }

    async fn deregister(&self, service: &ServiceDescriptor) -> Result<()> {
        let mut services = self.services.write().await;

        if let Some(versions) = services.get_mut(&service.name) {
            if let Some(existing) = versions.get_mut(&service.version) {
                let gone: Vec<&Node> = service.nodes.iter().collect();
                existing
                    .nodes
                    .retain(|n| !gone.iter().any(|g| g.id == n.id));

                if existing.nodes.is_empty() {
                    versions.remove(&service.version);
                }
            }
            if versions.is_empty() {
                services.remove(&service.name);
            }
        }

        tracing::debug!(service = %service.name, "service deregistered");
        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<Vec<ServiceDescriptor>> {
        let services = self.services.read().await;
        Ok(services
            .get(name)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }
}
