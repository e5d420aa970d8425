//! Message broker client seam
//!
//! Subscriptions declared on the server are bound to a broker when the
//! node registers and released when it deregisters. The broker itself is
//! an external collaborator consumed through the [`Broker`] trait; this
//! crate defines the contract plus an in-process implementation.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Result;

pub use memory::MemoryBroker;

/// A message delivered to subscription handlers
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Topic the message was published to
    pub topic: String,

    /// Transport headers
    pub header: HashMap<String, String>,

    /// Message payload
    pub body: Bytes,
}

impl Message {
    /// Create a message with an empty header map
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            header: HashMap::new(),
            body: body.into(),
        }
    }
}

/// Handler invoked for each delivered message
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Options applied when binding a subscription to the broker
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Queue group: members of the same group share delivery of each
    /// message instead of all receiving it
    pub queue: Option<String>,

    /// Acknowledge messages automatically after the handler returns
    pub auto_ack: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            queue: None,
            auto_ack: true,
        }
    }
}

/// Message broker client (driven port)
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the broker connection. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Tear the broker connection down. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Publish a message to a topic.
    async fn publish(&self, topic: &str, message: Message) -> Result<()>;

    /// Bind a handler to a topic, returning a live subscription handle.
    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>>;
}

/// A live broker subscription
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Topic this subscription is bound to
    fn topic(&self) -> &str;

    /// Release the subscription; no further messages are delivered.
    async fn unsubscribe(&self) -> Result<()>;
}
