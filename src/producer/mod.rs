//! Producer-side priority routing.
//!
//! Maps a notification's priority tier onto its destination topic and runs
//! the enqueue under the shared resilience executor. The request id is the
//! partition key, so all messages for one logical notification land in the
//! same partition and keep their relative order.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::error::DispatchError;
use crate::metrics::{ENQUEUED_TOTAL, ENQUEUE_FAILED_TOTAL};
use crate::notification::{NotificationRequest, Priority};
use crate::resilience::{ResiliencePolicy, RetryPolicy};

/// Circuit breaker resource guarding all enqueue traffic
const PRODUCER_RESOURCE: &str = "notification-producer";

/// Proof that a request was accepted onto a topic.
#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    /// Request identifier, also the partition key
    pub id: Uuid,
    /// Topic the request landed on
    pub topic: String,
}

/// Destination and retry policy for one priority tier.
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub topic: String,
    pub retry: RetryPolicy,
}

/// Routes requests onto priority topics.
pub struct PriorityRouter {
    broker: Arc<dyn Broker>,
    resilience: Arc<ResiliencePolicy>,
    routes: HashMap<Priority, RouteBinding>,
}

impl PriorityRouter {
    /// Build the default route table from the broker topic layout.
    ///
    /// LOW and NORMAL share the normal topic under the standard retry
    /// policy; HIGH gets its own topic under the standard policy; CRITICAL
    /// gets its own topic under the aggressive policy.
    pub fn new(
        broker: Arc<dyn Broker>,
        resilience: Arc<ResiliencePolicy>,
        config: &BrokerConfig,
    ) -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            Priority::Low,
            RouteBinding {
                topic: config.normal_topic.clone(),
                retry: RetryPolicy::standard(),
            },
        );
        routes.insert(
            Priority::Normal,
            RouteBinding {
                topic: config.normal_topic.clone(),
                retry: RetryPolicy::standard(),
            },
        );
        routes.insert(
            Priority::High,
            RouteBinding {
                topic: config.high_topic.clone(),
                retry: RetryPolicy::standard(),
            },
        );
        routes.insert(
            Priority::Critical,
            RouteBinding {
                topic: config.critical_topic.clone(),
                retry: RetryPolicy::aggressive(),
            },
        );

        Self::with_routes(broker, resilience, routes)
    }

    /// Build a router from an explicit route table.
    ///
    /// A priority missing from the table fails `route` with
    /// `UnsupportedPriority`; nothing is ever silently defaulted.
    pub fn with_routes(
        broker: Arc<dyn Broker>,
        resilience: Arc<ResiliencePolicy>,
        routes: HashMap<Priority, RouteBinding>,
    ) -> Self {
        Self {
            broker,
            resilience,
            routes,
        }
    }

    /// Enqueue a request onto the topic its priority maps to.
    #[tracing::instrument(
        name = "router.route",
        skip(self, request),
        fields(id = %request.id, priority = %request.priority)
    )]
    pub async fn route(&self, request: &NotificationRequest) -> Result<EnqueueReceipt, DispatchError> {
        let binding = self
            .routes
            .get(&request.priority)
            .ok_or(DispatchError::UnsupportedPriority(request.priority))?;

        let payload = serde_json::to_vec(request)?;
        let key = request.id.to_string();

        let broker = self.broker.clone();
        let topic = binding.topic.clone();
        let result = self
            .resilience
            .execute(PRODUCER_RESOURCE, &binding.retry, move || {
                let broker = broker.clone();
                let topic = topic.clone();
                let key = key.clone();
                let payload = payload.clone();
                async move {
                    broker
                        .publish(&topic, &key, payload)
                        .await
                        .map_err(DispatchError::from)
                }
            })
            .await;

        match result {
            Ok(()) => {
                ENQUEUED_TOTAL
                    .with_label_values(&[request.priority.as_str()])
                    .inc();
                tracing::info!(
                    id = %request.id,
                    topic = %binding.topic,
                    "Notification enqueued"
                );
                Ok(EnqueueReceipt {
                    id: request.id,
                    topic: binding.topic.clone(),
                })
            }
            Err(err) => {
                ENQUEUE_FAILED_TOTAL
                    .with_label_values(&[request.priority.as_str()])
                    .inc();
                tracing::error!(
                    id = %request.id,
                    topic = %binding.topic,
                    error = %err,
                    "Enqueue failed after retries"
                );
                Err(err)
            }
        }
    }
}
