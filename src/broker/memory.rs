//! In-process message broker
//!
//! Dispatches published messages directly to subscription handlers on the
//! publisher's task. Queue groups get shared delivery: each message goes
//! to one member of every group (round-robin) and to every queue-less
//! subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::{Broker, Message, MessageHandler, SubscribeOptions, Subscription};

struct SubEntry {
    id: u64,
    queue: Option<String>,
    handler: MessageHandler,
}

type TopicMap = HashMap<String, Vec<Arc<SubEntry>>>;

/// In-memory [`Broker`] implementation
#[derive(Default)]
pub struct MemoryBroker {
    connected: AtomicBool,
    topics: Arc<RwLock<TopicMap>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
}

impl MemoryBroker {
    /// Create a disconnected broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `connect` has been called
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::broker("not connected"));
        }

        let targets: Vec<Arc<SubEntry>> = {
            let topics = self.topics.read().await;
            let Some(entries) = topics.get(topic) else {
                return Ok(());
            };

            // Queue-less subscriptions all receive the message; each queue
            // group delivers to exactly one member.
            let mut groups: HashMap<&str, Vec<&Arc<SubEntry>>> = HashMap::new();
            let mut targets = Vec::new();
            for entry in entries {
                match &entry.queue {
                    Some(queue) => groups.entry(queue.as_str()).or_default().push(entry),
                    None => targets.push(Arc::clone(entry)),
                }
            }
            let pick = self.round_robin.fetch_add(1, Ordering::Relaxed);
            for members in groups.values() {
                targets.push(Arc::clone(members[pick % members.len()]));
            }
            targets
        };

        for entry in targets {
            let mut msg = message.clone();
            msg.topic = topic.to_string();
            if let Err(e) = (entry.handler)(msg).await {
                tracing::warn!(topic = topic, error = %e, "subscription handler failed");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        if !self.is_connected() {
            return Err(Error::broker("not connected"));
        }

        let entry = Arc::new(SubEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            queue: options.queue,
            handler,
        });

        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .push(Arc::clone(&entry));

        Ok(Box::new(MemorySubscription {
            id: entry.id,
            topic: topic.to_string(),
            topics: Arc::clone(&self.topics),
        }))
    }
}

/// Handle for one [`MemoryBroker`] subscription
pub struct MemorySubscription {
    id: u64,
    topic: String,
    topics: Arc<RwLock<TopicMap>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut topics = self.topics.write().await;
        if let Some(entries) = topics.get_mut(&self.topic) {
            entries.retain(|e| e.id != self.id);
            if entries.is_empty() {
                topics.remove(&self.topic);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    use super::*;

    fn counting_handler(counter: Arc<AtomicUsize>) -> MessageHandler {
        Arc::new(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_publish_requires_connect() {
        let broker = MemoryBroker::new();
        let result = broker.publish("events", Message::new("events", "x")).await;
        assert!(matches!(result, Err(Error::Broker(_))));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_plain_subscriptions() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();

        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        broker
            .subscribe("events", counting_handler(Arc::clone(&a)), SubscribeOptions::default())
            .await
            .unwrap();
        broker
            .subscribe("events", counting_handler(Arc::clone(&b)), SubscribeOptions::default())
            .await
            .unwrap();

        broker.publish("events", Message::new("events", "x")).await.unwrap();

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queue_group_shares_delivery() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();

        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let opts = SubscribeOptions {
            queue: Some("workers".into()),
            auto_ack: true,
        };
        broker
            .subscribe("jobs", counting_handler(Arc::clone(&a)), opts.clone())
            .await
            .unwrap();
        broker
            .subscribe("jobs", counting_handler(Arc::clone(&b)), opts)
            .await
            .unwrap();

        for _ in 0..4 {
            broker.publish("jobs", Message::new("jobs", "x")).await.unwrap();
        }

        // Each message went to exactly one group member
        assert_eq!(a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let sub = broker
            .subscribe("events", counting_handler(Arc::clone(&count)), SubscribeOptions::default())
            .await
            .unwrap();

        broker.publish("events", Message::new("events", "x")).await.unwrap();
        sub.unsubscribe().await.unwrap();
        broker.publish("events", Message::new("events", "x")).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(broker.subscriber_count("events").await, 0);
    }
}
