use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cluster::{ClusterConfig, ClusterRouter, ReplicationLog};
use message::{
    now_ms, DeadLetterReason, Message, MessageId, MessageStatus, QueueConfig, QueueError,
    TransactionId,
};
use pool::{MemoryPool, MessageBatch};
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertManager, AlertType};
use crate::config::BrokerConfig;
use crate::handlers::Handlers;
use crate::monitor::{DeadLetterAlertType, DeadLetterMonitor};
use crate::perf::PerfTracker;
use crate::queue::{matches_filter, Queue};
use crate::scheduler::{ScheduledEntry, Scheduler};
use crate::tasks;
use crate::topic::Topic;
use crate::txn::TransactionManager;

/// The embedded broker. Clone-cheap handle; all state lives behind the
/// shared core. Public operations are safe to call from any task between
/// `initialize` and `shutdown`.
#[derive(Clone)]
pub struct Broker {
    pub(crate) core: Arc<BrokerCore>,
}

pub(crate) struct BrokerCore {
    pub config: RwLock<BrokerConfig>,
    /// Raw global-config entries, including unrecognized keys.
    pub raw_config: RwLock<HashMap<String, String>>,
    pub queues: RwLock<HashMap<String, Arc<Queue>>>,
    pub topics: RwLock<HashMap<String, Arc<Topic>>>,
    pub router: ClusterRouter,
    pub wal: ReplicationLog,
    pub scheduler: Scheduler,
    pub txns: TransactionManager,
    pub monitor: DeadLetterMonitor,
    pub alerts: AlertManager,
    pub perf: PerfTracker,
    pub mempool: MemoryPool,
    pub batches: Mutex<HashMap<u32, MessageBatch>>,
    pub handlers: Handlers,
    next_message_id: AtomicU64,
    next_txn_id: AtomicU64,
    next_alert_id: AtomicU64,
    next_batch_id: AtomicU32,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
    pub shutdown_token: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    pub consumer_workers: Mutex<HashMap<(String, String), tokio::task::JoinHandle<()>>>,
}

/// How an internal enqueue behaves; the public send uses the full path
/// while scheduler and routing re-entries skip parts of it.
pub(crate) struct EnqueueOptions {
    /// Allocate a fresh id even when the header carries one.
    pub assign_id: bool,
    /// Stamp the enqueue timestamp. Retries keep their original stamp.
    pub refresh_timestamp: bool,
    /// Run the auto-compression/encryption stages.
    pub encode: bool,
    /// Append to the shard WAL and gate on replication acks.
    pub replicate: bool,
    /// Apply the queue's retry policy to the header.
    pub apply_retry_policy: bool,
    pub event: &'static str,
}

impl EnqueueOptions {
    pub fn send() -> Self {
        EnqueueOptions {
            assign_id: true,
            refresh_timestamp: true,
            encode: true,
            replicate: true,
            apply_retry_policy: true,
            event: "message_sent",
        }
    }

    pub fn scheduled() -> Self {
        EnqueueOptions {
            assign_id: false,
            refresh_timestamp: true,
            encode: true,
            replicate: true,
            apply_retry_policy: true,
            event: "message_scheduled_dispatch",
        }
    }

    pub fn retry() -> Self {
        EnqueueOptions {
            assign_id: false,
            refresh_timestamp: false,
            encode: true,
            replicate: false,
            apply_retry_policy: false,
            event: "message_retry",
        }
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let router = ClusterRouter::new(
            ClusterConfig::single_node(config.node_id.clone()),
            config.shard_virtual_nodes,
        );
        let mempool = MemoryPool::new(config.pool.clone());
        let core = BrokerCore {
            router,
            wal: ReplicationLog::new(1),
            scheduler: Scheduler::new(),
            txns: TransactionManager::new(),
            monitor: DeadLetterMonitor::new(),
            alerts: AlertManager::new(config.alert_history_limit),
            perf: PerfTracker::new(config.perf_sample_ring),
            mempool,
            batches: Mutex::new(HashMap::new()),
            handlers: Handlers::default(),
            raw_config: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            next_message_id: AtomicU64::new(1),
            next_txn_id: AtomicU64::new(1),
            next_alert_id: AtomicU64::new(1),
            next_batch_id: AtomicU32::new(1),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            consumer_workers: Mutex::new(HashMap::new()),
            config: RwLock::new(config),
        };
        Broker {
            core: Arc::new(core),
        }
    }

    /// Spawn the background tasks and start accepting operations.
    /// Ordering: scheduler first, then the monitors, then sends.
    pub fn initialize(&self) -> Result<(), QueueError> {
        if self.core.initialized.swap(true, Ordering::SeqCst) {
            return Err(QueueError::InvalidState(
                "broker is already initialized".to_string(),
            ));
        }
        self.core.shutting_down.store(false, Ordering::SeqCst);

        let mut handles = self.core.tasks.lock().unwrap();
        handles.push(tokio::spawn(tasks::run_scheduler(Arc::clone(&self.core))));
        handles.push(tokio::spawn(tasks::run_dead_letter_monitor(Arc::clone(
            &self.core,
        ))));
        handles.push(tokio::spawn(tasks::run_metrics_sampler(Arc::clone(
            &self.core,
        ))));
        handles.push(tokio::spawn(tasks::run_heartbeat(Arc::clone(&self.core))));
        handles.push(tokio::spawn(tasks::run_txn_sweeper(Arc::clone(&self.core))));
        tracing::info!("broker initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.core.initialized.load(Ordering::SeqCst)
            && !self.core.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop accepting sends, drain the background tasks, wake every blocked
    /// receiver, and release worker tasks. Queued messages stay in memory
    /// but are no longer reachable through this handle.
    pub async fn shutdown(&self) {
        if self.core.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("broker shutting down");
        self.core.shutdown_token.cancel();

        let handles: Vec<_> = self.core.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::warn!(%err, "background task ended abnormally");
                }
            }
        }

        let workers: Vec<_> = {
            let mut workers = self.core.consumer_workers.lock().unwrap();
            workers.drain().map(|(_, handle)| handle).collect()
        };
        for worker in workers {
            worker.abort();
        }

        for queue in self.core.queues.read().unwrap().values() {
            queue.notify.notify_waiters();
        }
        for topic in self.core.topics.read().unwrap().values() {
            topic.shutdown();
        }
        self.core.initialized.store(false, Ordering::SeqCst);
    }

    // ---- send / receive ------------------------------------------------

    /// Enqueue a message, returning its assigned id. Suspends while the
    /// shard's replication acks are below `cluster.min_replication_acks`.
    pub async fn send(&self, queue: &str, message: Message) -> Result<MessageId, QueueError> {
        self.enqueue_message(queue, message, EnqueueOptions::send())
            .await
    }

    pub async fn send_batch(
        &self,
        queue: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        if messages.is_empty() {
            return Err(QueueError::InvalidParameter(
                "batch send requires at least one message".to_string(),
            ));
        }
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(self.send(queue, message).await?);
        }
        Ok(ids)
    }

    /// Dequeue the next message, waiting up to `timeout`. A zero timeout is
    /// a non-blocking poll. Delivery modes at or above at-least-once leave
    /// the message in the pending-ack map until `ack`.
    pub async fn receive(&self, queue: &str, timeout: Duration) -> Result<Message, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let queue_arc = self.core.queue(queue)?;
            if let Some(message) = self.try_dequeue(&queue_arc)? {
                return Ok(message);
            }
            if self.core.shutting_down.load(Ordering::SeqCst) {
                return Err(QueueError::Timeout);
            }
            if timeout.is_zero() || tokio::time::Instant::now() >= deadline {
                return Err(QueueError::Timeout);
            }
            tokio::select! {
                _ = queue_arc.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Err(QueueError::Timeout),
                _ = self.core.shutdown_token.cancelled() => return Err(QueueError::Timeout),
            }
        }
    }

    pub async fn receive_batch(
        &self,
        queue: &str,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let mut messages = Vec::new();
        // Wait for the first message; drain the rest non-blocking.
        match self.receive(queue, timeout).await {
            Ok(message) => messages.push(message),
            Err(QueueError::Timeout) => return Ok(messages),
            Err(err) => return Err(err),
        }
        while messages.len() < max_count.max(1) {
            let queue_arc = self.core.queue(queue)?;
            match self.try_dequeue(&queue_arc)? {
                Some(message) => messages.push(message),
                None => break,
            }
        }
        Ok(messages)
    }

    pub fn peek(&self, queue: &str) -> Result<Option<Message>, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.peek())
    }

    fn try_dequeue(&self, queue_arc: &Arc<Queue>) -> Result<Option<Message>, QueueError> {
        let now = now_ms();
        let mut expired = Vec::new();
        let dequeued = {
            let mut state = queue_arc.state.write().unwrap();
            state.dequeue(now, &mut expired)
        };
        // Expired heads discovered on the way out go to the DLQ.
        for message in expired {
            self.core
                .dead_letter(&queue_arc.name, message, DeadLetterReason::Expired);
        }
        let Some(mut message) = dequeued else {
            return Ok(None);
        };

        // Decode: decrypt first, then decompress.
        let (encryption, had_marks) = {
            let state = queue_arc.state.read().unwrap();
            let marked = message
                .header
                .properties
                .contains_key(message::properties::ENCRYPTED)
                || message
                    .header
                    .properties
                    .contains_key(message::properties::COMPRESSED);
            (state.encryption.clone(), marked)
        };
        if had_marks {
            let started = std::time::Instant::now();
            let decrypted = message
                .header
                .properties
                .contains_key(message::properties::ENCRYPTED);
            if let Err(err) = codec::decrypt_message(&mut message, &encryption) {
                self.core.handlers.emit_error(
                    &QueueError::InternalError(err.to_string()),
                    "decrypting received message",
                );
                self.core
                    .dead_letter(&queue_arc.name, message, DeadLetterReason::InvalidMessage);
                return Ok(None);
            }
            let decrypt_ms = started.elapsed().as_secs_f64() * 1e3;
            let started = std::time::Instant::now();
            let decompressed = message
                .header
                .properties
                .contains_key(message::properties::COMPRESSED);
            if let Err(err) = codec::decompress_message(&mut message) {
                self.core.handlers.emit_error(
                    &QueueError::InternalError(err.to_string()),
                    "decompressing received message",
                );
                self.core
                    .dead_letter(&queue_arc.name, message, DeadLetterReason::InvalidMessage);
                return Ok(None);
            }
            let decompress_ms = started.elapsed().as_secs_f64() * 1e3;

            let mut state = queue_arc.state.write().unwrap();
            if decrypted {
                state.encryption_tracker.record_decrypt(decrypt_ms);
            }
            if decompressed {
                state.compression_tracker.record_decompress(decompress_ms);
            }
        }

        message.status = MessageStatus::Delivered;
        let latency_ms = now.saturating_sub(message.header.timestamp) as f64;
        {
            let mut state = queue_arc.state.write().unwrap();
            state.window.record_latency(latency_ms);
            if message.header.delivery.requires_ack() {
                state
                    .pending_acks
                    .insert(message.header.id, message.clone());
            } else {
                state.stats.processed_messages += 1;
            }
            // Hand off to another waiting receiver when work remains.
            if state.ready_len() > 0 {
                queue_arc.notify.notify_one();
            }
        }
        Ok(Some(message))
    }

    // ---- acknowledgement ----------------------------------------------

    pub fn ack(&self, queue: &str, message_id: MessageId) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let mut state = queue_arc.state.write().unwrap();
        match state.pending_acks.remove(&message_id) {
            Some(_) => {
                state.acked.insert(message_id);
                state.stats.processed_messages += 1;
                Ok(())
            }
            None if state.acked.contains(&message_id) => Err(QueueError::InvalidState(format!(
                "message {message_id} was already acknowledged"
            ))),
            None => Err(QueueError::MessageNotFound(message_id)),
        }
    }

    pub fn ack_batch(&self, queue: &str, message_ids: &[MessageId]) -> Result<(), QueueError> {
        for id in message_ids {
            self.ack(queue, *id)?;
        }
        Ok(())
    }

    /// Refuse a previously received message. With `requeue` the message
    /// re-enters the queue after the retry backoff until its retry budget
    /// runs out; without it the message dead-letters immediately.
    pub fn reject(
        &self,
        queue: &str,
        message_id: MessageId,
        requeue: bool,
    ) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let now = now_ms();

        let (mut message, retry_delay) = {
            let mut state = queue_arc.state.write().unwrap();
            let Some(message) = state.pending_acks.remove(&message_id) else {
                return Err(QueueError::MessageNotFound(message_id));
            };
            if requeue && message.can_retry() {
                let exponent = message.header.retry_count;
                let config = &state.config;
                let delay_ms = if config.enable_retry_backoff {
                    let scaled = config.retry_delay_ms as f64
                        * config.retry_backoff_multiplier.powi(exponent as i32);
                    (scaled as u64).min(config.max_retry_delay_ms)
                } else {
                    config.retry_delay_ms
                };
                state.stats.retried_messages += 1;
                (message, Some(delay_ms))
            } else {
                (message, None)
            }
        };

        match retry_delay {
            Some(delay_ms) => {
                message.header.retry_count += 1;
                message.header.next_retry_time = now + delay_ms;
                message.status = MessageStatus::Pending;
                message.touch();
                self.core.scheduler.insert(
                    now + delay_ms,
                    ScheduledEntry::Retry {
                        queue: queue_arc.name.clone(),
                        message,
                    },
                );
                Ok(())
            }
            None => {
                let reason = if requeue {
                    DeadLetterReason::MaxRetriesExceeded
                } else {
                    DeadLetterReason::Rejected
                };
                self.core.dead_letter(&queue_arc.name, message, reason);
                Ok(())
            }
        }
    }

    // ---- scheduling ----------------------------------------------------

    /// Enqueue `message` into `queue` after `delay`. Returns the message id
    /// usable with `cancel_scheduled`.
    pub fn schedule_message(
        &self,
        queue: &str,
        mut message: Message,
        delay: Duration,
    ) -> Result<MessageId, QueueError> {
        self.core.ensure_accepting()?;
        let _ = self.core.queue(queue)?;
        if message.header.id == 0 {
            message.header.id = self.core.next_message_id();
        }
        let id = message.header.id;
        self.core.scheduler.insert(
            now_ms() + delay.as_millis() as u64,
            ScheduledEntry::Delayed {
                queue: queue.to_string(),
                message,
            },
        );
        Ok(id)
    }

    /// Repeatedly enqueue copies of `message` every `interval`. A zero
    /// `count` repeats without bound. The returned id cancels the series.
    pub fn schedule_recurring(
        &self,
        queue: &str,
        mut message: Message,
        interval: Duration,
        count: u32,
    ) -> Result<MessageId, QueueError> {
        self.core.ensure_accepting()?;
        let _ = self.core.queue(queue)?;
        if interval.is_zero() {
            return Err(QueueError::InvalidParameter(
                "recurring interval must be positive".to_string(),
            ));
        }
        if message.header.id == 0 {
            message.header.id = self.core.next_message_id();
        }
        let id = message.header.id;
        let interval_ms = interval.as_millis() as u64;
        self.core.scheduler.insert(
            now_ms() + interval_ms,
            ScheduledEntry::Recurring {
                queue: queue.to_string(),
                template: message,
                interval_ms,
                remaining: (count > 0).then_some(count),
            },
        );
        Ok(id)
    }

    pub fn cancel_scheduled(&self, message_id: MessageId) -> Result<(), QueueError> {
        if self.core.scheduler.cancel(message_id) {
            Ok(())
        } else {
            Err(QueueError::MessageNotFound(message_id))
        }
    }

    // ---- broadcast -----------------------------------------------------

    /// Fan a copy out to every queue and every topic, best effort per
    /// target. Returns the number of targets that accepted the message.
    pub async fn broadcast(&self, message: Message) -> Result<usize, QueueError> {
        let queues: Vec<String> = self.core.queues.read().unwrap().keys().cloned().collect();
        let topics: Vec<String> = self.core.topics.read().unwrap().keys().cloned().collect();
        let mut delivered = self.broadcast_to_queues(&queues, message.clone()).await?;
        delivered += self.broadcast_to_topics(&topics, message).await?;
        Ok(delivered)
    }

    pub async fn broadcast_to_queues(
        &self,
        queues: &[String],
        message: Message,
    ) -> Result<usize, QueueError> {
        self.core.ensure_accepting()?;
        let mut delivered = 0;
        for name in queues {
            let mut copy = message.clone();
            copy.header.id = 0;
            match self
                .enqueue_message(name, copy, EnqueueOptions::send())
                .await
            {
                Ok(_) => delivered += 1,
                Err(err) => {
                    tracing::warn!(queue = %name, %err, "broadcast target skipped");
                }
            }
        }
        Ok(delivered)
    }

    pub async fn broadcast_to_topics(
        &self,
        topics: &[String],
        message: Message,
    ) -> Result<usize, QueueError> {
        self.core.ensure_accepting()?;
        let mut delivered = 0;
        for name in topics {
            match self.publish(name, message.clone()) {
                Ok(_) => delivered += 1,
                Err(err) => {
                    tracing::warn!(topic = %name, %err, "broadcast target skipped");
                }
            }
        }
        Ok(delivered)
    }

    // ---- internal enqueue ---------------------------------------------

    pub(crate) async fn enqueue_message(
        &self,
        queue: &str,
        mut message: Message,
        opts: EnqueueOptions,
    ) -> Result<MessageId, QueueError> {
        self.core.ensure_accepting()?;
        let queue_arc = self.core.queue(queue)?;
        let now = now_ms();

        // Pre-checks and codec configuration under a short read lock.
        let (compression, encryption, max_bytes, filter) = {
            let state = queue_arc.state.read().unwrap();
            (
                state.compression.clone(),
                state.encryption.clone(),
                state.config.max_size_bytes,
                state.filter.clone(),
            )
        };
        if let Some(filter) = &filter {
            if !matches_filter(filter, &message) {
                return Err(QueueError::InvalidParameter(format!(
                    "message does not match the filter of queue '{queue}'"
                )));
            }
        }
        if message.payload.len() as u64 > max_bytes {
            return Err(QueueError::MessageTooLarge {
                size: message.payload.len(),
                limit: max_bytes as usize,
            });
        }

        if opts.assign_id || message.header.id == 0 {
            message.header.id = self.core.next_message_id();
        }
        if opts.refresh_timestamp {
            message.header.timestamp = now;
        }
        {
            let state = queue_arc.state.read().unwrap();
            if opts.apply_retry_policy {
                message.header.max_retries = state.config.max_retries;
            }
            if message.header.expire_time == 0 && state.config.message_ttl_ms > 0 {
                message.header.expire_time = now + state.config.message_ttl_ms;
            }
        }

        // Codec stages: compress, then encrypt.
        let mut compress_sample = None;
        let mut encrypt_sample = None;
        if opts.encode {
            let original_len = message.payload.len();
            if compression.enable_auto_compression
                && compression.algorithm != codec::CompressionAlgorithm::None
                && original_len >= compression.min_size
            {
                let started = std::time::Instant::now();
                codec::compress_message(&mut message, compression.algorithm, compression.level)
                    .map_err(|err| QueueError::SerializationError(err.to_string()))?;
                compress_sample = Some((
                    original_len,
                    message.payload.len(),
                    started.elapsed().as_secs_f64() * 1e3,
                ));
            }
            if encryption.enable_auto_encryption
                && encryption.algorithm != codec::EncryptionAlgorithm::None
            {
                let started = std::time::Instant::now();
                codec::encrypt_message(&mut message, encryption.algorithm, &encryption)
                    .map_err(|err| QueueError::SerializationError(err.to_string()))?;
                encrypt_sample = Some(started.elapsed().as_secs_f64() * 1e3);
            }
        }

        let message_id = message.header.id;
        let routed: Vec<String>;
        {
            let mut state = queue_arc.state.write().unwrap();
            if state.is_full() {
                drop(state);
                self.core.raise_alert(
                    AlertType::QueueFull,
                    queue,
                    format!("queue '{queue}' rejected a send at capacity"),
                    0.0,
                );
                return Err(QueueError::QueueFull(queue.to_string()));
            }
            if opts.encode {
                state
                    .compression_tracker
                    .record_compress(
                        compress_sample.map_or(message.payload.len(), |(pre, _, _)| pre),
                        compress_sample.map(|(_, post, ms)| (post, ms)),
                    );
                state.encryption_tracker.record_encrypt(encrypt_sample);
            }
            routed = state
                .routes
                .iter()
                .filter(|(_, routing_key)| {
                    routing_key.is_empty()
                        || message
                            .header
                            .properties
                            .get("routing_key")
                            .is_some_and(|value| value == *routing_key)
                })
                .map(|(target, _)| target.clone())
                .collect();
            state.enqueue(message.clone(), now);
        }
        queue_arc.notify.notify_one();

        // WAL ordering and the replication-ack gate come after the enqueue;
        // an ack-wait timeout reports failure without unwinding the send.
        if opts.replicate {
            self.replicate(queue, &message).await?;
        }

        // Router forwarding: a copy per matching target, single hop.
        for target in routed {
            if target == queue {
                continue;
            }
            if let Err(err) = self.core.forward_routed(&target, message.clone()) {
                tracing::warn!(source = %queue, %target, %err, "routed forward failed");
            }
        }

        self.core
            .handlers
            .emit_queue_event(queue, opts.event, &format!("id={message_id}"));
        Ok(message_id)
    }

    /// Block until the shard's healthy follower set can cover
    /// `min_replication_acks`, then append to the WAL.
    async fn replicate(&self, queue: &str, message: &Message) -> Result<(), QueueError> {
        let routing_key = message
            .header
            .properties
            .get(message::properties::PARTITION_KEY)
            .cloned()
            .unwrap_or_else(|| queue.to_string());
        let (shard, _node) = self
            .core
            .router
            .shard_for_key(&routing_key)
            .map_err(|err| QueueError::InternalError(err.to_string()))?;

        let (min_acks, wait_ms) = {
            let config = self.core.config.read().unwrap();
            (config.min_replication_acks, config.replication_wait_ms)
        };
        if min_acks > 0 {
            let deadline =
                tokio::time::Instant::now() + Duration::from_millis(wait_ms);
            loop {
                let healthy = self.core.router.healthy_followers(shard).len() as u32;
                if healthy >= min_acks {
                    break;
                }
                tokio::select! {
                    _ = self.core.router.changed() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(QueueError::Timeout);
                    }
                    _ = self.core.shutdown_token.cancelled() => {
                        return Err(QueueError::Timeout);
                    }
                }
            }
        }

        let followers = self.core.router.healthy_followers(shard);
        self.core
            .wal
            .append(shard, message.header.id, queue, &followers);
        Ok(())
    }
}

impl BrokerCore {
    pub fn queue(&self, name: &str) -> Result<Arc<Queue>, QueueError> {
        self.queues
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub fn topic(&self, name: &str) -> Result<Arc<Topic>, QueueError> {
        self.topics
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub fn ensure_initialized(&self) -> Result<(), QueueError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(QueueError::InvalidState(
                "broker is not initialized".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ensure_accepting(&self) -> Result<(), QueueError> {
        self.ensure_initialized()?;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::InvalidState(
                "broker is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    pub fn next_message_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_txn_id(&self) -> TransactionId {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_alert_id(&self) -> u64 {
        self.next_alert_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_batch_id(&self) -> u32 {
        self.next_batch_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Move a message into the owning queue's DLQ, creating the DLQ on
    /// first use. Owner and DLQ locks are taken strictly in sequence.
    pub fn dead_letter(&self, queue: &str, mut message: Message, reason: DeadLetterReason) {
        let now = now_ms();
        let Ok(queue_arc) = self.queue(queue) else {
            tracing::warn!(%queue, "dead-letter source queue vanished");
            return;
        };
        let (dlq_name, dlq_enabled) = {
            let mut state = queue_arc.state.write().unwrap();
            state.mark_dead_letter(&mut message, reason, now);
            (
                state.config.dead_letter_queue_name(),
                state.config.enable_dead_letter,
            )
        };
        if !dlq_enabled {
            tracing::debug!(%queue, reason = reason.as_str(), "dead-letter disabled; message dropped");
            return;
        }

        if let Err(err) = self.ensure_dead_letter_queue(&dlq_name) {
            self.handlers.emit_error(&err, "creating dead-letter queue");
            self.emit_dead_letter_inline(
                DeadLetterAlertType::ProcessingFailed,
                queue,
                &dlq_name,
                format!("failed to create dead-letter queue: {err}"),
            );
            return;
        }
        let Ok(dlq_arc) = self.queue(&dlq_name) else {
            return;
        };
        {
            let mut dlq_state = dlq_arc.state.write().unwrap();
            if dlq_state.is_full() {
                drop(dlq_state);
                self.emit_dead_letter_inline(
                    DeadLetterAlertType::QueueFull,
                    queue,
                    &dlq_name,
                    format!("dead-letter queue '{dlq_name}' is full"),
                );
                return;
            }
            dlq_state.enqueue(message, now);
        }
        dlq_arc.notify.notify_one();
        self.handlers
            .emit_queue_event(queue, "message_dead_lettered", reason.as_str());
        self.raise_alert(
            AlertType::DeadLetterHigh,
            queue,
            format!("message dead-lettered ({})", reason.as_str()),
            1.0,
        );
    }

    fn emit_dead_letter_inline(
        &self,
        alert_type: DeadLetterAlertType,
        queue: &str,
        dlq: &str,
        detail: String,
    ) {
        if let Some(alert) = self
            .monitor
            .raise_inline(alert_type, queue, dlq, detail, now_ms())
        {
            let handler = self.handlers.dead_letter_alert.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler(&alert);
            }
        }
    }

    /// Auto-create the DLQ on first use: FIFO, no further dead-lettering.
    fn ensure_dead_letter_queue(&self, dlq_name: &str) -> Result<(), QueueError> {
        if self.queues.read().unwrap().contains_key(dlq_name) {
            return Ok(());
        }
        let mut config = QueueConfig::new(dlq_name);
        config.queue_type = message::QueueType::DeadLetter;
        config.enable_dead_letter = false;
        config.enable_priority = false;
        config.message_ttl_ms = 0;
        let latency_ring = self.config.read().unwrap().latency_ring;
        let mut queues = self.queues.write().unwrap();
        queues
            .entry(dlq_name.to_string())
            .or_insert_with(|| Arc::new(Queue::new(config, latency_ring)));
        Ok(())
    }

    /// Direct single-hop enqueue used by router forwarding and dead-letter
    /// hand-off. Preserves an existing message id.
    pub fn forward_routed(&self, target: &str, mut message: Message) -> Result<(), QueueError> {
        let queue_arc = self.queue(target)?;
        if message.header.id == 0 {
            message.header.id = self.next_message_id();
        }
        let now = now_ms();
        {
            let mut state = queue_arc.state.write().unwrap();
            if state.is_full() {
                return Err(QueueError::QueueFull(target.to_string()));
            }
            state.enqueue(message, now);
        }
        queue_arc.notify.notify_one();
        Ok(())
    }

    pub fn raise_alert(&self, alert_type: AlertType, queue: &str, message: String, value: f64) {
        let alert = self
            .alerts
            .raise(self.next_alert_id(), alert_type, queue, message, value, now_ms());
        if let Some(alert) = alert {
            let handler = self.handlers.alert.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler(&alert);
            }
        }
    }
}
