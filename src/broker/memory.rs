//! In-memory broker implementation.
//!
//! Backs the pipeline in tests and single-node deployments. Messages are
//! held in unbounded per-topic channels and are lost on restart. All
//! subscriptions on a topic compete for messages regardless of group name
//! (single-group semantics); a nacked message is requeued at the tail until
//! the redelivery limit is reached, after which it is dropped with a
//! warning.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use crate::metrics::BROKER_REDELIVERY_DROPPED_TOTAL;

use super::{Acker, Broker, BrokerError, Delivery, Subscription};

/// Default number of redeliveries before a nacked message is dropped.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 3;

#[derive(Debug, Clone)]
struct StoredDelivery {
    key: String,
    payload: Vec<u8>,
    redelivery_count: u32,
}

struct TopicHandle {
    tx: mpsc::UnboundedSender<StoredDelivery>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<StoredDelivery>>>,
}

impl TopicHandle {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// In-process broker over unbounded per-topic channels.
pub struct InMemoryBroker {
    topics: DashMap<String, TopicHandle>,
    max_redeliveries: u32,
}

impl InMemoryBroker {
    /// Create a broker with the default redelivery limit.
    pub fn new() -> Self {
        Self::with_max_redeliveries(DEFAULT_MAX_REDELIVERIES)
    }

    /// Create a broker with a custom redelivery limit.
    ///
    /// A limit of 0 drops every nacked message immediately.
    pub fn with_max_redeliveries(max_redeliveries: u32) -> Self {
        Self {
            topics: DashMap::new(),
            max_redeliveries,
        }
    }

    fn topic(&self, name: &str) -> (mpsc::UnboundedSender<StoredDelivery>, Arc<Mutex<mpsc::UnboundedReceiver<StoredDelivery>>>) {
        let handle = self.topics.entry(name.to_string()).or_insert_with(TopicHandle::new);
        (handle.tx.clone(), handle.rx.clone())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let (tx, _) = self.topic(topic);
        tx.send(StoredDelivery {
            key: key.to_string(),
            payload,
            redelivery_count: 0,
        })
        .map_err(|_| BrokerError::TopicClosed(topic.to_string()))?;

        tracing::trace!(topic = %topic, key = %key, "Message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let (tx, rx) = self.topic(topic);

        tracing::debug!(topic = %topic, group = %group, "Consumer joined topic");

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            tx,
            rx,
            max_redeliveries: self.max_redeliveries,
        }))
    }
}

struct MemorySubscription {
    topic: String,
    tx: mpsc::UnboundedSender<StoredDelivery>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<StoredDelivery>>>,
    max_redeliveries: u32,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        let stored = {
            let mut rx = self.rx.lock().await;
            rx.recv().await?
        };

        let acker = Box::new(MemoryAcker {
            topic: self.topic.clone(),
            stored: stored.clone(),
            tx: self.tx.clone(),
            max_redeliveries: self.max_redeliveries,
        });

        Some(Delivery::new(
            stored.key,
            stored.payload,
            stored.redelivery_count,
            acker,
        ))
    }
}

struct MemoryAcker {
    topic: String,
    stored: StoredDelivery,
    tx: mpsc::UnboundedSender<StoredDelivery>,
    max_redeliveries: u32,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) {
        // Receiving already removed the message from the queue.
        tracing::trace!(topic = %self.topic, key = %self.stored.key, "Delivery acked");
    }

    async fn nack(self: Box<Self>) {
        let mut stored = self.stored;

        if stored.redelivery_count >= self.max_redeliveries {
            BROKER_REDELIVERY_DROPPED_TOTAL.inc();
            tracing::warn!(
                topic = %self.topic,
                key = %stored.key,
                redeliveries = stored.redelivery_count,
                "Dropping message after redelivery limit"
            );
            return;
        }

        stored.redelivery_count += 1;
        if self.tx.send(stored).is_err() {
            tracing::warn!(topic = %self.topic, "Topic closed, nacked message lost");
        }
    }
}
