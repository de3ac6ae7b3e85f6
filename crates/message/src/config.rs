use serde::{Deserialize, Serialize};

use crate::types::{MessagePriority, PersistenceMode, QueueType};

fn default_max_size() -> u32 {
    10_000
}
fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_clients() -> u32 {
    100
}
fn default_message_ttl_ms() -> u64 {
    300_000
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retry_delay_ms() -> u64 {
    60_000
}
fn default_dead_letter_ttl_ms() -> u64 {
    86_400_000
}
fn default_batch_size() -> u32 {
    100
}
fn default_batch_timeout_ms() -> u64 {
    1_000
}

/// Per-queue configuration. Every field has a default so embedders only
/// spell out what they change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default)]
    pub queue_type: QueueType,
    #[serde(default)]
    pub persistence: PersistenceMode,
    /// Capacity in messages. Zero-capacity queues reject every send.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default = "default_max_clients")]
    pub max_consumers: u32,
    #[serde(default = "default_max_clients")]
    pub max_producers: u32,
    /// TTL applied to messages that carry no explicit expiry; 0 disables.
    #[serde(default = "default_message_ttl_ms")]
    pub message_ttl_ms: u64,
    /// Queue TTL; 0 means the queue never expires.
    #[serde(default)]
    pub queue_ttl_ms: u64,
    #[serde(default = "default_true")]
    pub enable_dead_letter: bool,
    /// Target DLQ name; empty derives `<name>_DLQ`.
    #[serde(default)]
    pub dead_letter_queue: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub enable_retry_backoff: bool,
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_dead_letter_ttl_ms")]
    pub dead_letter_ttl_ms: u64,
    #[serde(default)]
    pub enable_priority: bool,
    #[serde(default = "default_true")]
    pub enable_batching: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        QueueConfig {
            name: name.into(),
            queue_type: QueueType::Standard,
            persistence: PersistenceMode::MemoryOnly,
            max_size: default_max_size(),
            max_size_bytes: default_max_size_bytes(),
            max_consumers: default_max_clients(),
            max_producers: default_max_clients(),
            message_ttl_ms: default_message_ttl_ms(),
            queue_ttl_ms: 0,
            enable_dead_letter: true,
            dead_letter_queue: String::new(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            enable_retry_backoff: true,
            retry_backoff_multiplier: default_backoff_multiplier(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            dead_letter_ttl_ms: default_dead_letter_ttl_ms(),
            enable_priority: false,
            enable_batching: true,
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }

    /// The configured dead-letter queue name, or the `<name>_DLQ` derivation.
    pub fn dead_letter_queue_name(&self) -> String {
        if self.dead_letter_queue.is_empty() {
            format!("{}_DLQ", self.name)
        } else {
            self.dead_letter_queue.clone()
        }
    }
}

fn default_max_subscribers() -> u32 {
    1_000
}
fn default_topic_ttl_ms() -> u64 {
    60_000
}
fn default_retention_ms() -> u64 {
    3_600_000
}
fn default_retention_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_partition_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicConfig {
    pub name: String,
    #[serde(default)]
    pub persistence: PersistenceMode,
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: u32,
    #[serde(default = "default_topic_ttl_ms")]
    pub message_ttl_ms: u64,
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    #[serde(default = "default_retention_bytes")]
    pub retention_bytes: u64,
    #[serde(default)]
    pub enable_partitioning: bool,
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,
    /// Message type names permitted on this topic; empty allows all.
    #[serde(default)]
    pub allowed_message_types: Vec<String>,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>) -> Self {
        TopicConfig {
            name: name.into(),
            persistence: PersistenceMode::MemoryOnly,
            max_subscribers: default_max_subscribers(),
            message_ttl_ms: default_topic_ttl_ms(),
            retention_ms: default_retention_ms(),
            retention_bytes: default_retention_bytes(),
            enable_partitioning: false,
            partition_count: default_partition_count(),
            allowed_message_types: Vec::new(),
        }
    }
}

fn default_prefetch() -> u32 {
    10
}
fn default_min_priority() -> MessagePriority {
    MessagePriority::Low
}
fn default_ack_timeout_ms() -> u64 {
    30_000
}
fn default_consumer_batch() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub consumer_id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_true")]
    pub auto_acknowledge: bool,
    #[serde(default = "default_prefetch")]
    pub prefetch_count: u32,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default)]
    pub enable_batching: bool,
    #[serde(default = "default_consumer_batch")]
    pub batch_size: u32,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Lowest priority this consumer declares interest in.
    #[serde(default = "default_min_priority")]
    pub min_priority: MessagePriority,
}

impl ConsumerConfig {
    pub fn new(consumer_id: impl Into<String>) -> Self {
        ConsumerConfig {
            consumer_id: consumer_id.into(),
            group_id: String::new(),
            auto_acknowledge: true,
            prefetch_count: default_prefetch(),
            ack_timeout_ms: default_ack_timeout_ms(),
            enable_batching: false,
            batch_size: default_consumer_batch(),
            batch_timeout_ms: default_batch_timeout_ms(),
            min_priority: MessagePriority::Low,
        }
    }
}

fn default_producer_ack_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub producer_id: String,
    #[serde(default)]
    pub enable_batching: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default)]
    pub wait_for_acknowledge: bool,
    #[serde(default = "default_producer_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_interval_ms: u64,
}

impl ProducerConfig {
    pub fn new(producer_id: impl Into<String>) -> Self {
        ProducerConfig {
            producer_id: producer_id.into(),
            enable_batching: false,
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            wait_for_acknowledge: false,
            ack_timeout_ms: default_producer_ack_timeout_ms(),
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_config_defaults_from_json() {
        let config: QueueConfig = serde_json::from_str(r#"{"name": "orders"}"#).unwrap();
        assert_eq!(config.max_size, 10_000);
        assert_eq!(config.max_retries, 3);
        assert!(config.enable_dead_letter);
        assert_eq!(config.retry_backoff_multiplier, 2.0);
    }

    #[test]
    fn dlq_name_derivation() {
        let mut config = QueueConfig::new("orders");
        assert_eq!(config.dead_letter_queue_name(), "orders_DLQ");
        config.dead_letter_queue = "graveyard".into();
        assert_eq!(config.dead_letter_queue_name(), "graveyard");
    }

    #[test]
    fn unknown_queue_config_keys_are_rejected() {
        let err = serde_json::from_str::<QueueConfig>(r#"{"name": "q", "bogus": 1}"#);
        assert!(err.is_err());
    }
}
