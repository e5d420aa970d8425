//! Subscription descriptors
//!
//! A [`Subscriber`] declares a topic and its handler functions before the
//! server starts. Binding to the broker happens when the node registers;
//! the descriptor itself never talks to the broker. Identity is the
//! descriptor instance, not the topic: two subscribers on the same topic
//! (e.g. different queue groups) are distinct.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;

use crate::broker::{Message, MessageHandler, SubscribeOptions};
use crate::error::{Error, Result};
use crate::registry::Endpoint;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// A declared topic subscription
pub struct Subscriber {
    id: u64,
    topic: String,
    handlers: Vec<MessageHandler>,
    queue: Option<String>,
    auto_ack: bool,
    internal: bool,
}

impl Subscriber {
    /// Declare a subscription on a topic
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            topic: topic.into(),
            handlers: Vec::new(),
            queue: None,
            auto_ack: true,
            internal: false,
        }
    }

    /// Add a handler function; at least one is required
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers.push(Arc::new(move |msg| f(msg).boxed()));
        self
    }

    /// Join a queue group: members share delivery of each message
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Require explicit acknowledgement instead of auto-ack
    pub fn disable_auto_ack(mut self) -> Self {
        self.auto_ack = false;
        self
    }

    /// Exclude this subscription from the advertised descriptor
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Topic this subscription is declared on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether this subscription is excluded from advertisement
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn handlers(&self) -> &[MessageHandler] {
        &self.handlers
    }

    pub(crate) fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            queue: self.queue.clone(),
            auto_ack: self.auto_ack,
        }
    }

    /// Endpoint advertised for this subscription
    pub(crate) fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.topic.clone())
            .with_metadata("subscriber", "true")
            .with_metadata("topic", self.topic.clone())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::InvalidSubscriber("empty topic"));
        }
        if self.handlers.is_empty() {
            return Err(Error::InvalidSubscriber("no handler functions"));
        }
        Ok(())
    }
}
