use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::resilience::CircuitBreakerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Topic and consumer-group layout on the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_normal_topic")]
    pub normal_topic: String,
    #[serde(default = "default_high_topic")]
    pub high_topic: String,
    #[serde(default = "default_critical_topic")]
    pub critical_topic: String,
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Redeliveries before the in-memory broker drops a nacked message
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

/// Worker pool sizes per priority tier.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_normal_concurrency")]
    pub normal_concurrency: usize,
    #[serde(default = "default_high_concurrency")]
    pub high_concurrency: usize,
    #[serde(default = "default_critical_concurrency")]
    pub critical_concurrency: usize,
}

/// Circuit breaker settings shared by all named resources.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default = "default_open_cooldown_seconds")]
    pub open_cooldown_seconds: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl ResilienceConfig {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: self.window_size,
            failure_rate_threshold: self.failure_rate_threshold,
            open_cooldown: Duration::from_secs(self.open_cooldown_seconds),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

/// How long a synchronous caller waits for its outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_response_timeout_seconds")]
    pub response_timeout_seconds: u64,
}

impl CorrelationConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_seconds)
    }
}

/// Failed-notification retry sweeper settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    #[serde(default = "default_retry_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_batch_size")]
    pub batch_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_normal_topic() -> String {
    "queue.normal".to_string()
}

fn default_high_topic() -> String {
    "queue.high".to_string()
}

fn default_critical_topic() -> String {
    "queue.critical".to_string()
}

fn default_status_topic() -> String {
    "queue.status".to_string()
}

fn default_consumer_group() -> String {
    "notification-workers".to_string()
}

fn default_max_redeliveries() -> u32 {
    3
}

fn default_normal_concurrency() -> usize {
    1
}

fn default_high_concurrency() -> usize {
    3
}

fn default_critical_concurrency() -> usize {
    5
}

fn default_window_size() -> usize {
    10
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_open_cooldown_seconds() -> u64 {
    30
}

fn default_half_open_max_calls() -> u32 {
    3
}

fn default_response_timeout_seconds() -> u64 {
    180
}

fn default_retry_enabled() -> bool {
    true
}

fn default_retry_interval_seconds() -> u64 {
    60
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_batch_size() -> usize {
    50
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, BROKER_NORMAL_TOPIC, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            normal_topic: default_normal_topic(),
            high_topic: default_high_topic(),
            critical_topic: default_critical_topic(),
            status_topic: default_status_topic(),
            consumer_group: default_consumer_group(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            normal_concurrency: default_normal_concurrency(),
            high_concurrency: default_high_concurrency(),
            critical_concurrency: default_critical_concurrency(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            failure_rate_threshold: default_failure_rate_threshold(),
            open_cooldown_seconds: default_open_cooldown_seconds(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            response_timeout_seconds: default_response_timeout_seconds(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            interval_seconds: default_retry_interval_seconds(),
            max_attempts: default_retry_max_attempts(),
            batch_size: default_retry_batch_size(),
        }
    }
}
