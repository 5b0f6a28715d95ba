use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Electronic mail
    Email,
    /// Text message
    Sms,
    /// Mobile push notification
    Push,
}

impl Channel {
    /// Resource name used for circuit-breaker keying and logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority levels for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Low priority, can be delayed
    Low,
    /// Normal priority (default)
    #[default]
    Normal,
    /// High priority, should be delivered promptly
    High,
    /// Critical priority, immediate delivery required
    Critical,
}

impl Priority {
    /// Get numeric value for priority comparison
    pub fn as_weight(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    /// Lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_weight().cmp(&other.as_weight())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to deliver one notification over one channel.
///
/// Immutable once enqueued. The id doubles as the broker partition key and
/// the correlation identifier that links the asynchronous outcome back to a
/// synchronous waiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Unique identifier, generated when the caller does not supply one
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Priority tier, defaults to NORMAL
    #[serde(default)]
    pub priority: Priority,
    /// Delivery channel
    pub channel: Channel,
    /// Email address, phone number, or device token
    pub recipient: String,
    /// Subject line (ignored by channels without one)
    pub subject: String,
    /// Literal body content, used when no template is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Name of a registered body template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    /// Values substituted into the template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_data: Option<HashMap<String, String>>,
}

impl NotificationRequest {
    /// Create a builder for a request on the given channel
    pub fn builder(channel: Channel, recipient: impl Into<String>) -> NotificationRequestBuilder {
        NotificationRequestBuilder::new(channel, recipient)
    }
}

/// Builder for creating notification requests
#[derive(Debug, Clone)]
pub struct NotificationRequestBuilder {
    id: Option<Uuid>,
    priority: Priority,
    channel: Channel,
    recipient: String,
    subject: String,
    content: Option<String>,
    template_name: Option<String>,
    template_data: Option<HashMap<String, String>>,
}

impl NotificationRequestBuilder {
    fn new(channel: Channel, recipient: impl Into<String>) -> Self {
        Self {
            id: None,
            priority: Priority::default(),
            channel,
            recipient: recipient.into(),
            subject: String::new(),
            content: None,
            template_name: None,
            template_data: None,
        }
    }

    /// Use a caller-supplied identifier instead of a generated one
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the priority tier
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the subject line
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the literal body content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Render the body from a named template with the given values
    pub fn template(mut self, name: impl Into<String>, data: HashMap<String, String>) -> Self {
        self.template_name = Some(name.into());
        self.template_data = Some(data);
        self
    }

    /// Build the request
    pub fn build(self) -> NotificationRequest {
        NotificationRequest {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            priority: self.priority,
            channel: self.channel,
            recipient: self.recipient,
            subject: self.subject,
            content: self.content,
            template_name: self.template_name,
            template_data: self.template_data,
        }
    }
}

/// Terminal result of one dispatch attempt, published on the status topic.
///
/// The id equals the originating request's id so a waiting caller can be
/// correlated; outcomes without a registered waiter are orphaned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationOutcome {
    /// Correlation identifier (equal to the request id)
    pub id: Uuid,
    /// Channel the dispatch ran on
    pub channel: Channel,
    /// Recipient address or token
    pub recipient: String,
    /// Whether the channel provider accepted the notification
    pub success: bool,
    /// Human-readable description of the result
    pub message: String,
    /// When the dispatch reached its terminal state
    pub completed_at: DateTime<Utc>,
}

impl NotificationOutcome {
    /// Successful outcome for a request
    pub fn success_for(request: &NotificationRequest, message: impl Into<String>) -> Self {
        Self {
            id: request.id,
            channel: request.channel,
            recipient: request.recipient.clone(),
            success: true,
            message: message.into(),
            completed_at: Utc::now(),
        }
    }

    /// Failed outcome for a request
    pub fn failure_for(request: &NotificationRequest, message: impl Into<String>) -> Self {
        Self {
            id: request.id,
            channel: request.channel,
            recipient: request.recipient.clone(),
            success: false,
            message: message.into(),
            completed_at: Utc::now(),
        }
    }
}
