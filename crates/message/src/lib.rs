//! Core vocabulary of the helianthus broker: identifiers, message and
//! configuration types, stats snapshots, and the result-code taxonomy.

mod config;
mod error;
mod message;
mod stats;
mod types;

pub use config::{ConsumerConfig, ProducerConfig, QueueConfig, TopicConfig};
pub use error::QueueError;
pub use message::{ExternalBuf, Message, MessageHeader, MessagePayload};
pub use stats::{
    CompressionStats, DeadLetterQueueStats, EncryptionStats, PerformanceStats, QueueMetrics,
    QueueStats, TransactionStats,
};
pub use types::{
    DeadLetterReason, DeliveryMode, MessagePriority, MessageStatus, MessageType, PersistenceMode,
    QueueType,
};

/// 64-bit monotonic message identifier. Zero is reserved as "invalid".
pub type MessageId = u64;
/// 64-bit monotonic transaction identifier. Zero is reserved as "invalid".
pub type TransactionId = u64;
/// 64-bit monotonic alert identifier. Zero is reserved as "invalid".
pub type AlertId = u64;

pub type QueueId = u32;
pub type TopicId = u32;
pub type ShardId = u32;
pub type BatchId = u32;

pub const INVALID_MESSAGE_ID: MessageId = 0;
pub const INVALID_TRANSACTION_ID: TransactionId = 0;
pub const INVALID_BATCH_ID: BatchId = 0;

/// Message property keys written by the codec pipeline and the shard router.
/// User code must not reuse them.
pub mod properties {
    pub const COMPRESSED: &str = "Compressed";
    pub const ENCRYPTED: &str = "Encrypted";
    pub const PARTITION_KEY: &str = "partition_key";
}

/// Milliseconds since the Unix epoch, the broker's single clock format.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
