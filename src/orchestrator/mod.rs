//! Synchronous submission entry point.
//!
//! `submit` bridges a synchronous caller onto the asynchronous pipeline:
//! register the pending correlation, enqueue through the priority router,
//! and suspend until the consumer side publishes the outcome or the wait
//! ceiling elapses. The producer and consumer halves share nothing but the
//! broker, so the HTTP-facing process and the dispatch workers can run as
//! separate scaling units.

use std::sync::Arc;
use std::time::Duration;

use crate::correlation::ResponseCorrelator;
use crate::error::DispatchError;
use crate::notification::{NotificationOutcome, NotificationRequest};
use crate::producer::PriorityRouter;
use crate::store::NotificationStore;

/// Accepts requests and correlates their asynchronous outcomes.
pub struct NotificationOrchestrator {
    router: Arc<PriorityRouter>,
    correlator: Arc<ResponseCorrelator>,
    store: Arc<dyn NotificationStore>,
    response_timeout: Duration,
}

impl NotificationOrchestrator {
    pub fn new(
        router: Arc<PriorityRouter>,
        correlator: Arc<ResponseCorrelator>,
        store: Arc<dyn NotificationStore>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            router,
            correlator,
            store,
            response_timeout,
        }
    }

    /// Submit a request and wait for its outcome.
    ///
    /// Returns the outcome produced by the dispatch workers, a failure
    /// outcome immediately when routing itself fails terminally, or
    /// `CorrelationTimeout` when no outcome arrives within the ceiling.
    /// A dispatch still in flight when the caller times out runs to
    /// completion; its outcome is then orphaned.
    #[tracing::instrument(
        name = "orchestrator.submit",
        skip(self, request),
        fields(id = %request.id, priority = %request.priority, channel = %request.channel)
    )]
    pub async fn submit(
        &self,
        request: NotificationRequest,
    ) -> Result<NotificationOutcome, DispatchError> {
        // Register before enqueueing so the outcome can never race the waiter
        let pending = self.correlator.register(request.id);

        if let Err(err) = self.router.route(&request).await {
            pending.abandon();
            tracing::warn!(
                id = %request.id,
                error = %err,
                "Routing failed, returning failure outcome without waiting"
            );

            if let Err(store_err) = self.store.save_failed(&request, &err.to_string()).await {
                tracing::warn!(
                    id = %request.id,
                    error = %store_err,
                    "Failed to persist failed notification"
                );
            }

            return Ok(NotificationOutcome::failure_for(
                &request,
                format!("enqueue failed: {}", err),
            ));
        }

        pending.wait(self.response_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::broker::{Broker, InMemoryBroker, Subscription};
    use crate::config::BrokerConfig;
    use crate::notification::{Channel, Priority};
    use crate::producer::RouteBinding;
    use crate::resilience::ResiliencePolicy;
    use crate::store::InMemoryStore;

    fn test_request() -> NotificationRequest {
        NotificationRequest::builder(Channel::Email, "a@b.c")
            .subject("s")
            .content("body")
            .build()
    }

    fn orchestrator_with(
        broker: Arc<InMemoryBroker>,
        store: Arc<InMemoryStore>,
        correlator: Arc<ResponseCorrelator>,
        timeout: Duration,
    ) -> NotificationOrchestrator {
        let router = Arc::new(PriorityRouter::new(
            broker,
            Arc::new(ResiliencePolicy::new()),
            &BrokerConfig::default(),
        ));
        NotificationOrchestrator::new(router, correlator, store, timeout)
    }

    #[tokio::test]
    async fn test_submit_resolves_with_published_outcome() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryStore::new());
        let correlator = Arc::new(ResponseCorrelator::new());
        let orchestrator = orchestrator_with(
            broker.clone(),
            store,
            correlator.clone(),
            Duration::from_secs(1),
        );

        let request = test_request();
        let id = request.id;
        let echo = request.clone();

        let resolver = tokio::spawn({
            let correlator = correlator.clone();
            async move {
                // Simulate the consumer side resolving after a short delay
                tokio::time::sleep(Duration::from_millis(20)).await;
                correlator.resolve(NotificationOutcome::success_for(&echo, "ok"));
            }
        });

        let outcome = orchestrator.submit(request).await.unwrap();
        assert_eq!(outcome.id, id);
        assert!(outcome.success);
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_times_out_without_outcome() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryStore::new());
        let correlator = Arc::new(ResponseCorrelator::new());
        let orchestrator = orchestrator_with(
            broker,
            store,
            correlator.clone(),
            Duration::from_millis(30),
        );

        let result = orchestrator.submit(test_request()).await;
        assert!(matches!(result, Err(DispatchError::CorrelationTimeout(_))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_routing_failure_returns_failure_outcome_immediately() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryStore::new());
        let correlator = Arc::new(ResponseCorrelator::new());

        // Router with no bindings: every priority is unsupported
        let router = Arc::new(PriorityRouter::with_routes(
            broker.clone(),
            Arc::new(ResiliencePolicy::new()),
            HashMap::<Priority, RouteBinding>::new(),
        ));
        let orchestrator = NotificationOrchestrator::new(
            router,
            correlator.clone(),
            store.clone(),
            Duration::from_secs(5),
        );

        let request = test_request();
        let id = request.id;

        let start = std::time::Instant::now();
        let outcome = orchestrator.submit(request).await.unwrap();

        // Returned without waiting on the correlation ceiling
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!outcome.success);
        assert_eq!(outcome.id, id);
        assert!(outcome.message.contains("enqueue failed"));

        // Slot cleaned up and failure persisted for out-of-band retry
        assert_eq!(correlator.pending_count(), 0);
        assert!(store.failed_record(id).is_some());

        // Nothing was enqueued
        let mut sub = broker.subscribe("queue.normal", "t").await.unwrap();
        tokio::select! {
            _ = sub.next() => panic!("unexpected enqueue"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
}
