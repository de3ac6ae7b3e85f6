use codec::{
    CompressionAlgorithm, CompressionConfig, EncryptionAlgorithm, EncryptionConfig,
};
use message::{
    now_ms, BatchId, CompressionStats, EncryptionStats, Message, MessageId, MessageType,
    PerformanceStats, QueueError,
};
use pool::{MemoryPool, MessageBatch, ZeroCopyBuffer};

use crate::broker::{Broker, EnqueueOptions};
use crate::export::{self, ExportSnapshot, QueueExport};

fn codec_error(err: codec::CodecError) -> QueueError {
    match err {
        codec::CodecError::AlgorithmUnsupported(name) => QueueError::NotImplemented(name),
        codec::CodecError::KeyInvalid(_) | codec::CodecError::IvInvalid(_) => {
            QueueError::InvalidConfig(err.to_string())
        }
        _ => QueueError::SerializationError(err.to_string()),
    }
}

impl Broker {
    // ---- codec configuration -------------------------------------------

    pub fn set_compression_config(
        &self,
        queue: &str,
        config: CompressionConfig,
    ) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        queue_arc.state.write().unwrap().compression = config;
        Ok(())
    }

    pub fn compression_config(&self, queue: &str) -> Result<CompressionConfig, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.compression.clone())
    }

    pub fn set_encryption_config(
        &self,
        queue: &str,
        config: EncryptionConfig,
    ) -> Result<(), QueueError> {
        if config.algorithm != EncryptionAlgorithm::None {
            if config.key.len() != config.algorithm.key_len() {
                return Err(QueueError::InvalidConfig(format!(
                    "{} requires a {}-byte key",
                    config.algorithm.as_str(),
                    config.algorithm.key_len()
                )));
            }
            if config.iv.len() < config.algorithm.iv_len() {
                return Err(QueueError::InvalidConfig(format!(
                    "{} requires at least a {}-byte IV",
                    config.algorithm.as_str(),
                    config.algorithm.iv_len()
                )));
            }
        }
        let queue_arc = self.core.queue(queue)?;
        queue_arc.state.write().unwrap().encryption = config;
        Ok(())
    }

    pub fn encryption_config(&self, queue: &str) -> Result<EncryptionConfig, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.encryption.clone())
    }

    pub fn compression_stats(&self, queue: &str) -> Result<CompressionStats, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.compression_tracker.snapshot())
    }

    pub fn all_compression_stats(&self) -> Vec<(String, CompressionStats)> {
        self.list_queues()
            .into_iter()
            .filter_map(|name| {
                self.compression_stats(&name)
                    .ok()
                    .map(|stats| (name, stats))
            })
            .collect()
    }

    pub fn encryption_stats(&self, queue: &str) -> Result<EncryptionStats, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.encryption_tracker.snapshot())
    }

    pub fn all_encryption_stats(&self) -> Vec<(String, EncryptionStats)> {
        self.list_queues()
            .into_iter()
            .filter_map(|name| {
                self.encryption_stats(&name)
                    .ok()
                    .map(|stats| (name, stats))
            })
            .collect()
    }

    // ---- manual codec calls --------------------------------------------

    pub fn compress_message(
        &self,
        message: &mut Message,
        algorithm: CompressionAlgorithm,
        level: u32,
    ) -> Result<(), QueueError> {
        codec::compress_message(message, algorithm, level).map_err(codec_error)
    }

    pub fn decompress_message(&self, message: &mut Message) -> Result<(), QueueError> {
        codec::decompress_message(message).map_err(codec_error)
    }

    pub fn encrypt_message(
        &self,
        message: &mut Message,
        algorithm: EncryptionAlgorithm,
        config: &EncryptionConfig,
    ) -> Result<(), QueueError> {
        codec::encrypt_message(message, algorithm, config).map_err(codec_error)
    }

    pub fn decrypt_message(
        &self,
        message: &mut Message,
        config: &EncryptionConfig,
    ) -> Result<(), QueueError> {
        codec::decrypt_message(message, config).map_err(codec_error)
    }

    // ---- memory pool ---------------------------------------------------

    /// A clone of the broker's pool handle for payload staging.
    pub fn memory_pool(&self) -> MemoryPool {
        self.core.mempool.clone()
    }

    pub fn compact_memory_pool(&self) {
        self.core.mempool.compact();
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        let (hits, misses, allocations, deallocations, current, peak) =
            self.core.mempool.counters();
        PerformanceStats {
            total_allocations: allocations,
            total_deallocations: deallocations,
            total_bytes_allocated: peak.max(current),
            current_bytes_allocated: current,
            peak_bytes_allocated: peak,
            memory_pool_hits: hits,
            memory_pool_misses: misses,
            memory_pool_hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            zero_copy_operations: self.core.perf.zero_copy_operations(),
            batch_operations: self.core.perf.batch_operations(),
            average_zero_copy_time_ms: self.core.perf.zero_copy_mean_ms(),
            average_batch_time_ms: self.core.perf.batch_mean_ms(),
            last_update_time: now_ms(),
        }
    }

    pub fn reset_performance_stats(&self) {
        self.core.perf.reset();
    }

    // ---- zero copy -----------------------------------------------------

    /// Wrap an owned vector for zero-copy sending. For external memory use
    /// `ZeroCopyBuffer::from_raw` directly.
    pub fn create_zero_copy_buffer(&self, data: Vec<u8>) -> ZeroCopyBuffer {
        ZeroCopyBuffer::from_vec(data)
    }

    /// Send a message whose payload references `buffer` without copying.
    /// The codec stages are skipped; compressing or encrypting would defeat
    /// the zero-copy path.
    pub async fn send_zero_copy(
        &self,
        queue: &str,
        buffer: ZeroCopyBuffer,
    ) -> Result<MessageId, QueueError> {
        let started = std::time::Instant::now();
        let message = Message::external(MessageType::Binary, buffer);
        let mut opts = EnqueueOptions::send();
        opts.encode = false;
        opts.event = "message_sent_zero_copy";
        let id = self.enqueue_message(queue, message, opts).await?;
        self.core
            .perf
            .record_zero_copy(started.elapsed().as_secs_f64() * 1e3);
        Ok(id)
    }

    // ---- batches -------------------------------------------------------

    pub fn create_batch(&self, queue: &str) -> Result<BatchId, QueueError> {
        self.core.ensure_accepting()?;
        let _ = self.core.queue(queue)?;
        let batch_id = self.core.next_batch_id();
        self.core
            .batches
            .lock()
            .unwrap()
            .insert(batch_id, MessageBatch::new(batch_id, queue));
        Ok(batch_id)
    }

    pub fn add_to_batch(&self, batch_id: BatchId, message: Message) -> Result<(), QueueError> {
        let mut batches = self.core.batches.lock().unwrap();
        let batch = batches.get_mut(&batch_id).ok_or_else(|| {
            QueueError::InvalidParameter(format!("no open batch {batch_id}"))
        })?;
        batch.push(message);
        Ok(())
    }

    pub fn batch_info(&self, batch_id: BatchId) -> Result<(String, usize), QueueError> {
        let batches = self.core.batches.lock().unwrap();
        batches
            .get(&batch_id)
            .map(|batch| (batch.queue_name.clone(), batch.len()))
            .ok_or_else(|| QueueError::InvalidParameter(format!("no open batch {batch_id}")))
    }

    /// Atomically enqueue the batch in order. An empty batch succeeds and
    /// still records one duration sample.
    pub async fn commit_batch(&self, batch_id: BatchId) -> Result<(), QueueError> {
        let batch = self
            .core
            .batches
            .lock()
            .unwrap()
            .remove(&batch_id)
            .ok_or_else(|| QueueError::InvalidParameter(format!("no open batch {batch_id}")))?;

        let started = std::time::Instant::now();
        let count = batch.len() as u64;
        let queue = batch.queue_name.clone();
        for message in batch.messages {
            self.enqueue_message(&queue, message, EnqueueOptions::send())
                .await?;
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        self.core.perf.record_batch(elapsed_ms);
        {
            let queue_arc = self.core.queue(&queue)?;
            let mut state = queue_arc.state.write().unwrap();
            state.batch_commits += 1;
            state.batch_messages += count;
        }
        Ok(())
    }

    pub fn abort_batch(&self, batch_id: BatchId) -> Result<(), QueueError> {
        self.core
            .batches
            .lock()
            .unwrap()
            .remove(&batch_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::InvalidParameter(format!("no open batch {batch_id}")))
    }

    // ---- metrics export ------------------------------------------------

    /// The Prometheus text body for this broker's metric surface.
    pub fn export_prometheus(&self) -> Result<String, QueueError> {
        let queues = self
            .list_queues()
            .into_iter()
            .filter_map(|name| {
                let queue = self.core.queue(&name).ok()?;
                let state = queue.state.read().unwrap();
                Some(QueueExport {
                    stats: state.stats_snapshot(),
                    metrics: state.metrics.clone(),
                    batch_commits: state.batch_commits,
                    batch_messages: state.batch_messages,
                    name,
                })
            })
            .collect();

        let snapshot = ExportSnapshot {
            queues,
            zero_copy_duration_ms: self.core.perf.zero_copy_mean_ms(),
            batch_duration_ms: self.core.perf.batch_mean_ms(),
            tx: self.core.txns.stats_snapshot(),
        };
        export::render(&snapshot)
    }
}
