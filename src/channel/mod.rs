//! Channel sender seam.
//!
//! Concrete provider transports (SMTP, SMS gateways, push services) live
//! outside this service; the dispatcher only sees the `ChannelSender` trait.
//! Each implementation owns its provider-specific failure classification by
//! returning `TransientSend` or `PermanentSend`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::notification::{Channel, NotificationRequest};

/// Receipt returned by a provider after accepting a notification.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Provider-side identifier for the accepted message, when available
    pub provider_id: Option<String>,
    /// Short human-readable description
    pub detail: String,
}

impl DeliveryReceipt {
    /// Receipt with a detail message and no provider id
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            provider_id: None,
            detail: detail.into(),
        }
    }

    /// Attach the provider-side message identifier
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }
}

/// Outbound transport for one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel this sender serves
    fn channel(&self) -> Channel;

    /// Hand the rendered notification to the provider.
    async fn send(
        &self,
        request: &NotificationRequest,
        body: &str,
    ) -> Result<DeliveryReceipt, DispatchError>;
}

/// Lookup table from channel to its sender.
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    /// Register a sender for its channel, replacing any existing one
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    /// Resolve the sender for a channel.
    pub fn get(&self, channel: Channel) -> Result<Arc<dyn ChannelSender>, DispatchError> {
        self.senders
            .get(&channel)
            .cloned()
            .ok_or(DispatchError::UnsupportedChannel(channel))
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Development sender that logs deliveries instead of calling a provider.
pub struct LogSender {
    channel: Channel,
}

impl LogSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LogSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        request: &NotificationRequest,
        body: &str,
    ) -> Result<DeliveryReceipt, DispatchError> {
        tracing::info!(
            channel = %self.channel,
            recipient = %request.recipient,
            subject = %request.subject,
            body_len = body.len(),
            "Delivering notification (log sender)"
        );
        Ok(DeliveryReceipt::new(format!("{} logged", self.channel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_resolves_registered_channel() {
        let mut registry = SenderRegistry::new();
        registry.register(Arc::new(LogSender::new(Channel::Email)));

        let sender = registry.get(Channel::Email).unwrap();
        assert_eq!(sender.channel(), Channel::Email);
    }

    #[test]
    fn test_registry_unknown_channel_fails() {
        let registry = SenderRegistry::new();
        let err = match registry.get(Channel::Push) {
            Ok(_) => panic!("expected UnsupportedChannel error"),
            Err(e) => e,
        };
        assert!(matches!(err, DispatchError::UnsupportedChannel(Channel::Push)));
    }

    #[tokio::test]
    async fn test_log_sender_accepts() {
        let sender = LogSender::new(Channel::Sms);
        let request = NotificationRequest::builder(Channel::Sms, "+1555")
            .subject("s")
            .content("body")
            .build();

        let receipt = sender.send(&request, "body").await.unwrap();
        assert!(receipt.detail.contains("sms"));
    }
}
