use serde::{Deserialize, Serialize};

use crate::types::DeadLetterReason;

/// Aggregated per-queue (or per-topic, or global) counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_messages: u64,
    pub pending_messages: u64,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub dead_letter_messages: u64,
    pub retried_messages: u64,
    pub expired_messages: u64,
    pub rejected_messages: u64,
    pub total_bytes: u64,
    pub active_consumers: u32,
    pub active_producers: u32,
    pub active_subscribers: u32,
    pub average_latency_ms: f64,
    pub throughput_per_second: f64,
    pub last_message_time: u64,
    pub created_time: u64,
}

/// Sliding-window snapshot published by the metrics sampler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub pending_messages: u64,
    pub total_messages: u64,
    pub processed_messages: u64,
    pub dead_letter_messages: u64,
    pub retried_messages: u64,
    pub enqueue_rate: f64,
    pub dequeue_rate: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub timestamp: u64,
}

/// Dead-letter accounting for one queue, broken down by reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadLetterQueueStats {
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    pub total_dead_letter_messages: u64,
    pub current_dead_letter_messages: u64,
    pub expired_messages: u64,
    pub max_retries_exceeded_messages: u64,
    pub rejected_messages: u64,
    pub queue_full_messages: u64,
    pub message_too_large_messages: u64,
    pub invalid_message_messages: u64,
    pub consumer_error_messages: u64,
    pub timeout_messages: u64,
    pub unknown_reason_messages: u64,
    pub last_dead_letter_time: u64,
    pub created_time: u64,
    /// Dead-lettered / total enqueued.
    pub dead_letter_rate: f64,
}

impl DeadLetterQueueStats {
    pub fn record(&mut self, reason: DeadLetterReason, now: u64) {
        self.total_dead_letter_messages += 1;
        self.last_dead_letter_time = now;
        match reason {
            DeadLetterReason::Expired => self.expired_messages += 1,
            DeadLetterReason::MaxRetriesExceeded => self.max_retries_exceeded_messages += 1,
            DeadLetterReason::Rejected => self.rejected_messages += 1,
            DeadLetterReason::QueueFull => self.queue_full_messages += 1,
            DeadLetterReason::MessageTooLarge => self.message_too_large_messages += 1,
            DeadLetterReason::InvalidMessage => self.invalid_message_messages += 1,
            DeadLetterReason::ConsumerError => self.consumer_error_messages += 1,
            DeadLetterReason::Timeout => self.timeout_messages += 1,
            DeadLetterReason::Unknown => self.unknown_reason_messages += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total_transactions: u64,
    pub committed_transactions: u64,
    pub rolled_back_transactions: u64,
    pub timeout_transactions: u64,
    pub failed_transactions: u64,
    pub success_rate: f64,
    pub rollback_rate: f64,
    pub timeout_rate: f64,
    pub average_commit_time_ms: f64,
    pub average_rollback_time_ms: f64,
    pub last_update_time: u64,
}

impl TransactionStats {
    /// Recompute the derived rates from the counters.
    pub fn refresh_rates(&mut self) {
        if self.total_transactions == 0 {
            self.success_rate = 0.0;
            self.rollback_rate = 0.0;
            self.timeout_rate = 0.0;
            return;
        }
        let total = self.total_transactions as f64;
        self.success_rate = self.committed_transactions as f64 / total;
        self.rollback_rate = self.rolled_back_transactions as f64 / total;
        self.timeout_rate = self.timeout_transactions as f64 / total;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub total_messages: u64,
    pub compressed_messages: u64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// Post / pre; lower is better.
    pub compression_ratio: f64,
    pub average_compression_time_ms: f64,
    pub average_decompression_time_ms: f64,
    pub last_update_time: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionStats {
    pub total_messages: u64,
    pub encrypted_messages: u64,
    pub average_encryption_time_ms: f64,
    pub average_decryption_time_ms: f64,
    pub last_update_time: u64,
}

/// Fast-path counters: memory pool, zero-copy, and batch operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_allocations: u64,
    pub total_deallocations: u64,
    pub total_bytes_allocated: u64,
    pub current_bytes_allocated: u64,
    pub peak_bytes_allocated: u64,
    pub memory_pool_hits: u64,
    pub memory_pool_misses: u64,
    pub memory_pool_hit_rate: f64,
    pub zero_copy_operations: u64,
    pub batch_operations: u64,
    pub average_zero_copy_time_ms: f64,
    pub average_batch_time_ms: f64,
    pub last_update_time: u64,
}
