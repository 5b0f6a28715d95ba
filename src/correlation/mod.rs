//! Request/response correlation across the status topic.
//!
//! A synchronous caller registers a pending slot under its request id and
//! suspends until the consumer side publishes a matching outcome or the
//! wait times out. Slots are removed on resolution and on timeout, so an
//! abandoned wait never leaks. An outcome with no registered waiter is
//! orphaned: it is logged and dropped, never fatal.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::DispatchError;
use crate::metrics::{CORRELATION_TIMEOUTS_TOTAL, OUTCOMES_ORPHANED_TOTAL};
use crate::notification::NotificationOutcome;

/// Maps request ids to single-resolution outcome slots.
pub struct ResponseCorrelator {
    pending: Arc<DashMap<Uuid, oneshot::Sender<NotificationOutcome>>>,
}

/// A registered wait for one outcome.
///
/// Obtained from [`ResponseCorrelator::register`]; consumed by waiting or
/// by abandoning the slot.
pub struct PendingOutcome {
    id: Uuid,
    rx: oneshot::Receiver<NotificationOutcome>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<NotificationOutcome>>>,
}

impl PendingOutcome {
    /// Suspend until the outcome arrives or the timeout elapses.
    ///
    /// On timeout the slot is removed, so a late outcome for this id is
    /// treated as orphaned.
    pub async fn wait(self, timeout: Duration) -> Result<NotificationOutcome, DispatchError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => {
                // Sender dropped without resolving: a newer registration took the slot
                Err(DispatchError::CorrelationSuperseded(self.id))
            }
            Err(_) => {
                self.pending.remove(&self.id);
                CORRELATION_TIMEOUTS_TOTAL.inc();
                tracing::warn!(id = %self.id, timeout = ?timeout, "Timed out waiting for outcome");
                Err(DispatchError::CorrelationTimeout(timeout))
            }
        }
    }

    /// Remove the slot without waiting (e.g. when routing failed).
    pub fn abandon(self) {
        self.pending.remove(&self.id);
    }
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Register a pending slot for a request id.
    ///
    /// Must happen before the request is enqueued so the outcome can never
    /// arrive unmatched. Registering an id that already has a waiter
    /// supersedes the old slot.
    pub fn register(&self, id: Uuid) -> PendingOutcome {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(id, tx).is_some() {
            tracing::warn!(id = %id, "Replacing stale pending correlation");
        }
        PendingOutcome {
            id,
            rx,
            pending: self.pending.clone(),
        }
    }

    /// Register and wait in one step.
    pub async fn await_outcome(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<NotificationOutcome, DispatchError> {
        self.register(id).wait(timeout).await
    }

    /// Hand an outcome to its waiter and remove the slot.
    ///
    /// Resolving an id with no waiter (unknown, already resolved, or timed
    /// out) is a no-op apart from logging; resolving twice therefore has
    /// the same observable effect as resolving once.
    pub fn resolve(&self, outcome: NotificationOutcome) {
        let id = outcome.id;
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!(id = %id, "Waiter went away before outcome delivery");
                }
            }
            None => {
                OUTCOMES_ORPHANED_TOTAL.inc();
                tracing::warn!(id = %id, "Orphaned outcome, no registered waiter");
            }
        }
    }

    /// Number of unresolved slots (monitoring/tests)
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ResponseCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumes the status topic and feeds outcomes into the correlator.
///
/// This is the consumer half of the correlation loop: dispatcher workers
/// publish outcomes to the status topic, and this task resolves waiting
/// callers. Status messages are acknowledged on receipt; a lost outcome
/// only ever costs a caller its timeout.
pub struct StatusSubscriber {
    broker: Arc<dyn Broker>,
    correlator: Arc<ResponseCorrelator>,
    topic: String,
    group: String,
    shutdown: broadcast::Sender<()>,
}

impl StatusSubscriber {
    pub fn new(
        broker: Arc<dyn Broker>,
        correlator: Arc<ResponseCorrelator>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            broker,
            correlator,
            topic: topic.into(),
            group: group.into(),
            shutdown,
        }
    }

    /// Get a shutdown signal sender
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Run the status consumption loop until shutdown.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut subscription = self
            .broker
            .subscribe(&self.topic, &self.group)
            .await
            .map_err(DispatchError::from)?;
        let mut shutdown_rx = self.shutdown.subscribe();

        tracing::info!(topic = %self.topic, "Status subscriber started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Status subscriber stopping");
                    break;
                }
                delivery = subscription.next() => {
                    let Some(delivery) = delivery else {
                        tracing::info!(topic = %self.topic, "Status topic closed");
                        break;
                    };

                    match serde_json::from_slice::<NotificationOutcome>(&delivery.payload) {
                        Ok(outcome) => self.correlator.resolve(outcome),
                        Err(e) => {
                            tracing::warn!(
                                key = %delivery.key,
                                error = %e,
                                "Discarding undecodable status message"
                            );
                        }
                    }
                    delivery.ack().await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::notification::{Channel, NotificationRequest};

    fn outcome_for(id: Uuid) -> NotificationOutcome {
        let request = NotificationRequest::builder(Channel::Email, "a@b.c")
            .id(id)
            .subject("s")
            .build();
        NotificationOutcome::success_for(&request, "ok")
    }

    #[tokio::test]
    async fn test_resolve_before_timeout() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let id = Uuid::new_v4();

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .await_outcome(id, Duration::from_secs(1))
                    .await
            })
        };

        // Give the waiter a moment to register
        tokio::time::sleep(Duration::from_millis(10)).await;
        correlator.resolve(outcome_for(id));

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.id, id);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_slot() {
        let correlator = ResponseCorrelator::new();
        let id = Uuid::new_v4();

        let result = correlator
            .await_outcome(id, Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(DispatchError::CorrelationTimeout(_))));
        assert_eq!(correlator.pending_count(), 0);

        // A late outcome is orphaned, not delivered and not fatal
        correlator.resolve(outcome_for(id));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_noop() {
        let correlator = ResponseCorrelator::new();
        correlator.resolve(outcome_for(Uuid::new_v4()));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_double_resolve_is_idempotent() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let id = Uuid::new_v4();

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator.await_outcome(id, Duration::from_secs(1)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        correlator.resolve(outcome_for(id));
        // Second resolve for the same id: duplicate redelivery, dropped
        correlator.resolve(outcome_for(id));

        let outcome = waiter.await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_do_not_block_each_other() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let slow_id = Uuid::new_v4();
        let fast_id = Uuid::new_v4();

        let slow = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator.await_outcome(slow_id, Duration::from_secs(2)).await
            })
        };
        let fast = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator.await_outcome(fast_id, Duration::from_secs(2)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Resolving the second waiter must not depend on the first
        correlator.resolve(outcome_for(fast_id));
        let outcome = fast.await.unwrap().unwrap();
        assert_eq!(outcome.id, fast_id);

        correlator.resolve(outcome_for(slow_id));
        assert_eq!(slow.await.unwrap().unwrap().id, slow_id);
    }

    #[tokio::test]
    async fn test_abandon_removes_slot() {
        let correlator = ResponseCorrelator::new();
        let id = Uuid::new_v4();

        let pending = correlator.register(id);
        assert_eq!(correlator.pending_count(), 1);

        pending.abandon();
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_status_subscriber_resolves_from_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let correlator = Arc::new(ResponseCorrelator::new());
        let subscriber = Arc::new(StatusSubscriber::new(
            broker.clone(),
            correlator.clone(),
            "queue.status",
            "status-group",
        ));
        let shutdown = subscriber.shutdown_signal();

        let handle = {
            let subscriber = subscriber.clone();
            tokio::spawn(async move { subscriber.start().await })
        };

        let id = Uuid::new_v4();
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator.await_outcome(id, Duration::from_secs(1)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let payload = serde_json::to_vec(&outcome_for(id)).unwrap();
        broker
            .publish("queue.status", &id.to_string(), payload)
            .await
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.id, id);

        let _ = shutdown.send(());
        let _ = handle.await.unwrap();
    }
}
