//! Consumer-side priority dispatch.
//!
//! One worker pool per priority tier, each consuming its own topic with its
//! own concurrency and acknowledgment behavior:
//!
//! - NORMAL: single worker, auto-ack; a message is consumed the moment it
//!   reaches the worker and failures are terminal, never redelivered.
//! - HIGH: three workers, manual ack; acknowledged only after a successful
//!   channel dispatch, otherwise left to the broker for redelivery.
//! - CRITICAL: five workers, manual ack plus one synchronous in-process
//!   retry before deferring to broker redelivery.
//!
//! Every channel call runs under the resilience executor keyed by channel
//! name. Fatal failures (circuit open, unsupported channel, bad template)
//! are terminal on every tier: the worker publishes a degraded outcome and
//! acknowledges, since redelivery cannot succeed while the condition holds.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::broker::{Broker, Delivery, Subscription};
use crate::channel::SenderRegistry;
use crate::config::{BrokerConfig, DispatcherConfig};
use crate::error::DispatchError;
use crate::metrics::{DISPATCH_FAILED_TOTAL, DISPATCH_SUCCESS_TOTAL, OUTCOMES_PUBLISHED_TOTAL};
use crate::notification::{NotificationOutcome, NotificationRequest, Priority};
use crate::resilience::{ResiliencePolicy, RetryPolicy};
use crate::store::NotificationStore;
use crate::template::TemplateCatalog;

/// Acknowledgment behavior of a tier's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Ack on receipt; processing failures are terminal
    Auto,
    /// Ack only after a successful dispatch
    Manual,
    /// Manual ack plus one in-process retry before redelivery
    ManualImmediateRetry,
}

/// Runtime shape of one tier's worker pool.
#[derive(Debug, Clone)]
pub struct TierSpec {
    pub priority: Priority,
    pub topic: String,
    pub group: String,
    pub concurrency: usize,
    pub ack: AckMode,
    /// Retry policy for the channel call inside one dispatch
    pub channel_retry: RetryPolicy,
}

struct WorkerContext {
    broker: Arc<dyn Broker>,
    senders: Arc<SenderRegistry>,
    store: Arc<dyn NotificationStore>,
    templates: Arc<TemplateCatalog>,
    resilience: Arc<ResiliencePolicy>,
    status_topic: String,
}

/// Per-priority worker pools consuming the request topics.
pub struct PriorityDispatcher {
    context: Arc<WorkerContext>,
    shutdown: broadcast::Sender<()>,
}

impl PriorityDispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        senders: Arc<SenderRegistry>,
        store: Arc<dyn NotificationStore>,
        templates: Arc<TemplateCatalog>,
        resilience: Arc<ResiliencePolicy>,
        status_topic: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            context: Arc::new(WorkerContext {
                broker,
                senders,
                store,
                templates,
                resilience,
                status_topic: status_topic.into(),
            }),
            shutdown,
        }
    }

    /// Get a shutdown signal sender
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Tier layout derived from configuration.
    ///
    /// The critical tier performs single-attempt channel calls: its
    /// retry-on-any-error behavior is the worker-level immediate retry, so
    /// the provider is invoked at most twice before broker redelivery.
    pub fn tier_specs(broker: &BrokerConfig, dispatcher: &DispatcherConfig) -> Vec<TierSpec> {
        vec![
            TierSpec {
                priority: Priority::Normal,
                topic: broker.normal_topic.clone(),
                group: broker.consumer_group.clone(),
                concurrency: dispatcher.normal_concurrency,
                ack: AckMode::Auto,
                channel_retry: RetryPolicy::standard(),
            },
            TierSpec {
                priority: Priority::High,
                topic: broker.high_topic.clone(),
                group: format!("{}-high", broker.consumer_group),
                concurrency: dispatcher.high_concurrency,
                ack: AckMode::Manual,
                channel_retry: RetryPolicy::standard(),
            },
            TierSpec {
                priority: Priority::Critical,
                topic: broker.critical_topic.clone(),
                group: format!("{}-critical", broker.consumer_group),
                concurrency: dispatcher.critical_concurrency,
                ack: AckMode::ManualImmediateRetry,
                channel_retry: RetryPolicy::single_attempt(),
            },
        ]
    }

    /// Subscribe and spawn every tier's worker pool.
    pub async fn start(
        &self,
        broker_config: &BrokerConfig,
        dispatcher_config: &DispatcherConfig,
    ) -> Result<Vec<JoinHandle<()>>, DispatchError> {
        let mut handles = Vec::new();

        for tier in Self::tier_specs(broker_config, dispatcher_config) {
            for worker_idx in 0..tier.concurrency {
                let subscription = self
                    .context
                    .broker
                    .subscribe(&tier.topic, &tier.group)
                    .await?;

                tracing::info!(
                    tier = %tier.priority,
                    topic = %tier.topic,
                    worker = worker_idx,
                    "Dispatch worker started"
                );

                handles.push(tokio::spawn(worker_loop(
                    self.context.clone(),
                    tier.clone(),
                    subscription,
                    self.shutdown.subscribe(),
                )));
            }
        }

        Ok(handles)
    }
}

async fn worker_loop(
    ctx: Arc<WorkerContext>,
    tier: TierSpec,
    mut subscription: Box<dyn Subscription>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!(tier = %tier.priority, "Dispatch worker stopping");
                break;
            }
            delivery = subscription.next() => {
                let Some(delivery) = delivery else {
                    tracing::info!(tier = %tier.priority, topic = %tier.topic, "Topic closed");
                    break;
                };
                handle_delivery(&ctx, &tier, delivery).await;
            }
        }
    }
}

async fn handle_delivery(ctx: &WorkerContext, tier: &TierSpec, delivery: Delivery) {
    let request: NotificationRequest = match serde_json::from_slice(&delivery.payload) {
        Ok(request) => request,
        Err(e) => {
            // Poison message: redelivery cannot fix it
            tracing::warn!(
                tier = %tier.priority,
                key = %delivery.key,
                error = %e,
                "Discarding undecodable request payload"
            );
            delivery.ack().await;
            return;
        }
    };

    tracing::info!(
        tier = %tier.priority,
        id = %request.id,
        channel = %request.channel,
        redeliveries = delivery.redelivery_count,
        "Processing notification"
    );

    match tier.ack {
        AckMode::Auto => {
            delivery.ack().await;
            let _ = process_message(ctx, tier, &request, true).await;
        }
        AckMode::Manual => match process_message(ctx, tier, &request, false).await {
            Ok(()) => delivery.ack().await,
            Err(err) if failure_is_terminal(&err) => delivery.ack().await,
            Err(_) => delivery.nack().await,
        },
        AckMode::ManualImmediateRetry => match process_message(ctx, tier, &request, false).await {
            Ok(()) => delivery.ack().await,
            Err(err) if failure_is_terminal(&err) => delivery.ack().await,
            Err(_) => {
                tracing::info!(id = %request.id, "Immediate retry for critical notification");
                match process_message(ctx, tier, &request, false).await {
                    Ok(()) => delivery.ack().await,
                    Err(err) if failure_is_terminal(&err) => delivery.ack().await,
                    Err(_) => delivery.nack().await,
                }
            }
        },
    }
}

/// Failures that redelivery cannot repair while the condition holds.
///
/// These produce a degraded outcome and an acknowledgment on every tier.
fn failure_is_terminal(err: &DispatchError) -> bool {
    matches!(
        err,
        DispatchError::CircuitOpen { .. }
            | DispatchError::UnsupportedChannel(_)
            | DispatchError::Template(_)
    )
}

/// Run one dispatch attempt to its terminal state.
///
/// On success the outcome is published and recorded. On failure a
/// failed-notification record is persisted; the failure outcome is only
/// published when the failure is terminal for this delivery
/// (`terminal_on_failure`, i.e. the auto-ack tier, or a fatal error class).
/// A history record is appended regardless of the result.
async fn process_message(
    ctx: &WorkerContext,
    tier: &TierSpec,
    request: &NotificationRequest,
    terminal_on_failure: bool,
) -> Result<(), DispatchError> {
    match dispatch_channel(ctx, tier, request).await {
        Ok(detail) => {
            DISPATCH_SUCCESS_TOTAL
                .with_label_values(&[tier.priority.as_str()])
                .inc();
            let outcome = NotificationOutcome::success_for(request, detail);
            publish_outcome(ctx, &outcome).await;
            append_history(ctx, &outcome).await;
            Ok(())
        }
        Err(err) => {
            DISPATCH_FAILED_TOTAL
                .with_label_values(&[tier.priority.as_str()])
                .inc();
            tracing::error!(
                tier = %tier.priority,
                id = %request.id,
                channel = %request.channel,
                error = %err,
                "Channel dispatch failed"
            );

            save_failed(ctx, request, &err).await;

            let outcome = NotificationOutcome::failure_for(request, err.to_string());
            if terminal_on_failure || failure_is_terminal(&err) {
                publish_outcome(ctx, &outcome).await;
            }
            append_history(ctx, &outcome).await;

            Err(err)
        }
    }
}

/// Resolve the sender, render the body, and run the provider call under the
/// channel's circuit breaker and the tier's retry policy.
async fn dispatch_channel(
    ctx: &WorkerContext,
    tier: &TierSpec,
    request: &NotificationRequest,
) -> Result<String, DispatchError> {
    let sender = ctx.senders.get(request.channel)?;
    let body = ctx.templates.render(request)?;

    let resource = request.channel.as_str();
    let request_owned = request.clone();

    let receipt = ctx
        .resilience
        .execute(resource, &tier.channel_retry, move || {
            let sender = sender.clone();
            let request = request_owned.clone();
            let body = body.clone();
            async move { sender.send(&request, &body).await }
        })
        .await?;

    Ok(format!("{} sent successfully: {}", request.channel, receipt.detail))
}

async fn publish_outcome(ctx: &WorkerContext, outcome: &NotificationOutcome) {
    let payload = match serde_json::to_vec(outcome) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(id = %outcome.id, error = %e, "Failed to serialize outcome");
            return;
        }
    };

    match ctx
        .broker
        .publish(&ctx.status_topic, &outcome.id.to_string(), payload)
        .await
    {
        Ok(()) => {
            OUTCOMES_PUBLISHED_TOTAL.inc();
            tracing::debug!(id = %outcome.id, success = outcome.success, "Outcome published");
        }
        Err(e) => {
            tracing::error!(id = %outcome.id, error = %e, "Failed to publish outcome");
        }
    }
}

async fn append_history(ctx: &WorkerContext, outcome: &NotificationOutcome) {
    if let Err(e) = ctx.store.append_history(outcome).await {
        tracing::warn!(id = %outcome.id, error = %e, "Failed to append history record");
    }
}

async fn save_failed(ctx: &WorkerContext, request: &NotificationRequest, err: &DispatchError) {
    if let Err(e) = ctx.store.save_failed(request, &err.to_string()).await {
        tracing::warn!(id = %request.id, error = %e, "Failed to persist failed notification");
    }
}
