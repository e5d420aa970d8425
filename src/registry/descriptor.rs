//! Directory-facing value objects
//!
//! Passive data carriers describing what a node advertises: its identity,
//! address, handler endpoints, and subscribed topics. Built fresh on each
//! registration attempt from live server state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The record advertised to the discovery directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name (shared by all nodes of the service)
    pub name: String,

    /// Service version
    pub version: String,

    /// Nodes backing this descriptor (this crate always advertises one)
    pub nodes: Vec<Node>,

    /// Handler endpoints plus one endpoint per non-internal subscription
    pub endpoints: Vec<Endpoint>,
}

/// A single addressable node of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable node identity (`<name>-<id>`)
    pub id: String,

    /// Dialable address of the node's listener
    pub address: String,
}

/// An advertised operation or subscription topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint name; for subscriptions this is the topic
    pub name: String,

    /// Free-form endpoint metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Endpoint {
    /// Create an endpoint with no metadata
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
