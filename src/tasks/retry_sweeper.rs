//! Out-of-band retry of failed notifications.
//!
//! Dispatch failures that survive local retries are persisted as
//! failed-notification records. This task periodically drains a batch of
//! records below the attempt ceiling and re-enqueues each through the
//! priority router, so redispatch flows through the same pipeline as fresh
//! traffic. Records that reach the ceiling are purged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::RetryConfig;
use crate::producer::PriorityRouter;
use crate::store::NotificationStore;

/// Background task re-enqueueing failed notifications
pub struct RetrySweeper {
    config: RetryConfig,
    store: Arc<dyn NotificationStore>,
    router: Arc<PriorityRouter>,
    shutdown: broadcast::Receiver<()>,
}

impl RetrySweeper {
    pub fn new(
        config: RetryConfig,
        store: Arc<dyn NotificationStore>,
        router: Arc<PriorityRouter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            store,
            router,
            shutdown,
        }
    }

    /// Run sweep rounds until shutdown
    pub async fn run(mut self) {
        if !self.config.enabled {
            tracing::info!("Retry sweeper disabled");
            return;
        }

        let mut timer = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_seconds,
            max_attempts = self.config.max_attempts,
            batch_size = self.config.batch_size,
            "Retry sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Retry sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep().await;
                }
            }
        }

        tracing::info!("Retry sweeper stopped");
    }

    /// One sweep round: purge exhausted records, then re-enqueue a batch.
    pub async fn sweep(&self) {
        match self.store.purge_exhausted(self.config.max_attempts).await {
            Ok(0) => {}
            Ok(purged) => {
                tracing::info!(purged = purged, "Purged notifications past the retry ceiling");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to purge exhausted records");
            }
        }

        let batch = match self
            .store
            .failed_batch(self.config.max_attempts, self.config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load failed-notification batch");
                return;
            }
        };

        if batch.is_empty() {
            return;
        }

        tracing::info!(count = batch.len(), "Retrying failed notifications");

        let mut requeued = 0;
        for record in batch {
            // Count the attempt first so a crash mid-sweep cannot retry forever
            if let Err(e) = self.store.mark_retry_attempt(record.id).await {
                tracing::warn!(id = %record.id, error = %e, "Failed to mark retry attempt");
                continue;
            }

            match self.router.route(&record.request).await {
                Ok(_) => {
                    requeued += 1;
                    if let Err(e) = self.store.delete_failed(record.id).await {
                        tracing::warn!(id = %record.id, error = %e, "Failed to delete retried record");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        id = %record.id,
                        retry_count = record.retry_count,
                        error = %e,
                        "Re-enqueue of failed notification failed"
                    );
                }
            }
        }

        tracing::info!(requeued = requeued, "Retry sweep completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::broker::{Broker, InMemoryBroker, Subscription};
    use crate::config::BrokerConfig;
    use crate::notification::{Channel, NotificationRequest};
    use crate::resilience::ResiliencePolicy;
    use crate::store::InMemoryStore;

    fn sweeper_parts() -> (Arc<InMemoryBroker>, Arc<InMemoryStore>, RetrySweeper) {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryStore::new());
        let router = Arc::new(PriorityRouter::new(
            broker.clone(),
            Arc::new(ResiliencePolicy::new()),
            &BrokerConfig::default(),
        ));
        let (shutdown, _) = broadcast::channel(1);
        let sweeper = RetrySweeper::new(
            RetryConfig {
                enabled: true,
                interval_seconds: 3600,
                max_attempts: 2,
                batch_size: 10,
            },
            store.clone(),
            router,
            shutdown.subscribe(),
        );
        (broker, store, sweeper)
    }

    fn failed_request() -> NotificationRequest {
        NotificationRequest::builder(Channel::Email, "a@b.c")
            .subject("s")
            .content("body")
            .build()
    }

    #[tokio::test]
    async fn test_sweep_requeues_and_deletes() {
        let (broker, store, sweeper) = sweeper_parts();
        let request = failed_request();
        store.save_failed(&request, "smtp down").await.unwrap();

        sweeper.sweep().await;

        // Record is gone and the request is back on its priority topic
        assert_eq!(store.failed_count(), 0);

        let mut sub = broker.subscribe("queue.normal", "t").await.unwrap();
        let delivery = sub.next().await.unwrap();
        let decoded: NotificationRequest = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(decoded.id, request.id);
        delivery.ack().await;
    }

    #[tokio::test]
    async fn test_sweep_purges_exhausted_records() {
        let (_broker, store, sweeper) = sweeper_parts();
        let request = failed_request();
        store.save_failed(&request, "smtp down").await.unwrap();
        store.mark_retry_attempt(request.id).await.unwrap();
        store.mark_retry_attempt(request.id).await.unwrap();

        // Already at the ceiling of 2: not batched, purged instead
        sweeper.sweep().await;
        assert_eq!(store.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_with_empty_store_is_quiet() {
        let (_broker, store, sweeper) = sweeper_parts();
        sweeper.sweep().await;
        assert_eq!(store.failed_count(), 0);
    }
}
