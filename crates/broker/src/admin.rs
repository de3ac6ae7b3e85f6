use std::sync::Arc;

use cluster::{ClusterConfig, ReplicaInfo, ShardInfo};
use message::{
    now_ms, ConsumerConfig, DeadLetterQueueStats, Message, MessageId, ProducerConfig, QueueConfig,
    QueueError, QueueStats, ShardId, TopicConfig,
};

use crate::alerts::{Alert, AlertConfig, AlertStats, AlertType};
use crate::broker::Broker;
use crate::handlers::{
    AlertHandler, DeadLetterAlertHandler, DeadLetterStatsHandler, ErrorHandler, MessageHandler,
    QueueEventHandler, TransactionCommitHandler, TransactionRollbackHandler,
    TransactionTimeoutHandler,
};
use crate::monitor::{DeadLetterAlert, DeadLetterAlertConfig, DeadLetterAlertType};
use crate::queue::Queue;
use crate::topic::Topic;

impl Broker {
    // ---- queue management ----------------------------------------------

    pub fn create_queue(&self, config: QueueConfig) -> Result<(), QueueError> {
        self.core.ensure_accepting()?;
        if config.name.is_empty() {
            return Err(QueueError::InvalidParameter(
                "queue name must not be empty".to_string(),
            ));
        }
        let latency_ring = self.core.config.read().unwrap().latency_ring;
        let mut queues = self.core.queues.write().unwrap();
        if queues.contains_key(&config.name) {
            return Err(QueueError::InvalidState(format!(
                "queue '{}' already exists",
                config.name
            )));
        }
        let name = config.name.clone();
        queues.insert(name.clone(), Arc::new(Queue::new(config, latency_ring)));
        drop(queues);
        tracing::info!(queue = %name, "queue created");
        self.core.handlers.emit_queue_event(&name, "queue_created", "");
        Ok(())
    }

    /// Remove a queue. Pending-ack and dead-letter contents become
    /// unreachable; blocked receivers wake and observe the deletion.
    pub fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.core.ensure_accepting()?;
        let removed = self.core.queues.write().unwrap().remove(name);
        let Some(queue) = removed else {
            return Err(QueueError::QueueNotFound(name.to_string()));
        };
        {
            let mut state = queue.state.write().unwrap();
            state.purge();
        }
        queue.notify.notify_waiters();

        let workers: Vec<_> = {
            let mut workers = self.core.consumer_workers.lock().unwrap();
            let keys: Vec<_> = workers
                .keys()
                .filter(|(queue_name, _)| queue_name == name)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|key| workers.remove(&key)).collect()
        };
        for worker in workers {
            worker.abort();
        }
        tracing::info!(queue = %name, "queue deleted");
        self.core.handlers.emit_queue_event(name, "queue_deleted", "");
        Ok(())
    }

    /// Drop every ready and pending-ack message, keeping configuration and
    /// counters.
    pub fn purge_queue(&self, name: &str) -> Result<(), QueueError> {
        let queue = self.core.queue(name)?;
        queue.state.write().unwrap().purge();
        self.core.handlers.emit_queue_event(name, "queue_purged", "");
        Ok(())
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.core.queues.read().unwrap().contains_key(name)
    }

    pub fn list_queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.core.queues.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn queue_info(&self, name: &str) -> Result<QueueConfig, QueueError> {
        let queue = self.core.queue(name)?;
        let state = queue.state.read().unwrap();
        Ok(state.config.clone())
    }

    pub fn update_queue_config(&self, name: &str, config: QueueConfig) -> Result<(), QueueError> {
        if config.name != name {
            return Err(QueueError::InvalidParameter(format!(
                "config renames queue '{name}' to '{}'",
                config.name
            )));
        }
        let queue = self.core.queue(name)?;
        queue.state.write().unwrap().set_config(config);
        self.core
            .handlers
            .emit_queue_event(name, "queue_config_updated", "");
        Ok(())
    }

    // ---- topic management ----------------------------------------------

    pub fn create_topic(&self, config: TopicConfig) -> Result<(), QueueError> {
        self.core.ensure_accepting()?;
        if config.name.is_empty() {
            return Err(QueueError::InvalidParameter(
                "topic name must not be empty".to_string(),
            ));
        }
        let mut topics = self.core.topics.write().unwrap();
        if topics.contains_key(&config.name) {
            return Err(QueueError::InvalidState(format!(
                "topic '{}' already exists",
                config.name
            )));
        }
        let name = config.name.clone();
        topics.insert(name.clone(), Arc::new(Topic::new(config)));
        tracing::info!(topic = %name, "topic created");
        Ok(())
    }

    pub fn delete_topic(&self, name: &str) -> Result<(), QueueError> {
        let removed = self.core.topics.write().unwrap().remove(name);
        match removed {
            Some(topic) => {
                topic.shutdown();
                tracing::info!(topic = %name, "topic deleted");
                Ok(())
            }
            None => Err(QueueError::QueueNotFound(name.to_string())),
        }
    }

    pub fn topic_exists(&self, name: &str) -> bool {
        self.core.topics.read().unwrap().contains_key(name)
    }

    pub fn list_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.core.topics.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn topic_info(&self, name: &str) -> Result<TopicConfig, QueueError> {
        let topic = self.core.topic(name)?;
        let state = topic.state.read().unwrap();
        Ok(state.config.clone())
    }

    // ---- publish / subscribe -------------------------------------------

    /// Fan a message out to every subscriber of `topic`. Subscribers see
    /// publishes in this publisher's order; a slow subscriber drops rather
    /// than blocking its peers.
    pub fn publish(&self, topic: &str, mut message: Message) -> Result<usize, QueueError> {
        self.core.ensure_accepting()?;
        let topic_arc = self.core.topic(topic)?;
        if !topic_arc.allows(message.header.message_type.as_str()) {
            return Err(QueueError::InvalidParameter(format!(
                "message type {} is not allowed on topic '{topic}'",
                message.header.message_type.as_str()
            )));
        }
        if message.header.id == 0 {
            message.header.id = self.core.next_message_id();
        }
        let now = now_ms();
        {
            let state = topic_arc.state.read().unwrap();
            if message.header.expire_time == 0 && state.config.message_ttl_ms > 0 {
                message.header.expire_time = now + state.config.message_ttl_ms;
            }
        }
        Ok(topic_arc.publish(message, now))
    }

    pub fn publish_batch(
        &self,
        topic: &str,
        messages: Vec<Message>,
    ) -> Result<usize, QueueError> {
        if messages.is_empty() {
            return Err(QueueError::InvalidParameter(
                "batch publish requires at least one message".to_string(),
            ));
        }
        let mut delivered = 0;
        for message in messages {
            delivered += self.publish(topic, message)?;
        }
        Ok(delivered)
    }

    pub fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        handler: MessageHandler,
    ) -> Result<(), QueueError> {
        self.core.ensure_accepting()?;
        let topic_arc = self.core.topic(topic)?;
        topic_arc.subscribe(subscriber_id, handler, self.core.shutdown_token.clone())
    }

    pub fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), QueueError> {
        let topic_arc = self.core.topic(topic)?;
        if topic_arc.unsubscribe(subscriber_id) {
            Ok(())
        } else {
            Err(QueueError::SubscriptionNotFound(subscriber_id.to_string()))
        }
    }

    pub fn active_subscribers(&self, topic: &str) -> Result<Vec<String>, QueueError> {
        Ok(self.core.topic(topic)?.subscriber_ids())
    }

    // ---- consumers / producers -----------------------------------------

    /// Register a push consumer: a worker task pulls from the queue and
    /// invokes `handler` per message, acknowledging automatically when the
    /// consumer config says so. A panicking handler rejects the message
    /// back into the retry path.
    pub fn register_consumer(
        &self,
        queue: &str,
        config: ConsumerConfig,
        handler: MessageHandler,
    ) -> Result<(), QueueError> {
        self.core.ensure_accepting()?;
        let queue_arc = self.core.queue(queue)?;
        let consumer_id = config.consumer_id.clone();
        {
            let mut state = queue_arc.state.write().unwrap();
            if state.consumers.len() as u32 >= state.config.max_consumers {
                return Err(QueueError::ConsumerLimitExceeded(queue.to_string()));
            }
            state.consumers.insert(consumer_id.clone(), config.clone());
        }

        let broker = self.clone();
        let queue_name = queue.to_string();
        let auto_ack = config.auto_acknowledge;
        let worker_id = consumer_id.clone();
        let token = self.core.shutdown_token.clone();
        let worker = tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }
                let received = broker
                    .receive(&queue_name, std::time::Duration::from_millis(250))
                    .await;
                let message = match received {
                    Ok(message) => message,
                    Err(QueueError::Timeout) => continue,
                    Err(_) => break,
                };
                let id = message.header.id;
                let needs_ack = message.header.delivery.requires_ack();
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(message)
                }));
                match outcome {
                    Ok(()) if needs_ack && auto_ack => {
                        if let Err(err) = broker.ack(&queue_name, id) {
                            tracing::debug!(queue = %queue_name, %err, "auto-ack skipped");
                        }
                    }
                    Ok(()) => {}
                    Err(_) => {
                        tracing::warn!(
                            queue = %queue_name,
                            consumer = %worker_id,
                            message = id,
                            "consumer handler panicked; rejecting message"
                        );
                        if needs_ack {
                            let _ = broker.reject(&queue_name, id, true);
                        }
                    }
                }
            }
        });
        self.core
            .consumer_workers
            .lock()
            .unwrap()
            .insert((queue.to_string(), consumer_id), worker);
        Ok(())
    }

    /// Register a batch consumer: the worker drains up to `batch_size`
    /// messages per wake-up and hands them to the handler together.
    pub fn register_batch_consumer(
        &self,
        queue: &str,
        config: ConsumerConfig,
        handler: crate::handlers::BatchMessageHandler,
    ) -> Result<(), QueueError> {
        self.core.ensure_accepting()?;
        let queue_arc = self.core.queue(queue)?;
        let consumer_id = config.consumer_id.clone();
        {
            let mut state = queue_arc.state.write().unwrap();
            if state.consumers.len() as u32 >= state.config.max_consumers {
                return Err(QueueError::ConsumerLimitExceeded(queue.to_string()));
            }
            state.consumers.insert(consumer_id.clone(), config.clone());
        }

        let broker = self.clone();
        let queue_name = queue.to_string();
        let auto_ack = config.auto_acknowledge;
        let batch_size = config.batch_size.max(1) as usize;
        let batch_timeout = std::time::Duration::from_millis(config.batch_timeout_ms.max(1));
        let token = self.core.shutdown_token.clone();
        let worker = tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }
                let batch = match broker
                    .receive_batch(&queue_name, batch_size, batch_timeout)
                    .await
                {
                    Ok(batch) if batch.is_empty() => continue,
                    Ok(batch) => batch,
                    Err(_) => break,
                };
                let ids: Vec<_> = batch
                    .iter()
                    .filter(|m| m.header.delivery.requires_ack())
                    .map(|m| m.header.id)
                    .collect();
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(batch)
                }));
                match outcome {
                    Ok(()) if auto_ack => {
                        for id in ids {
                            if let Err(err) = broker.ack(&queue_name, id) {
                                tracing::debug!(queue = %queue_name, %err, "batch auto-ack skipped");
                            }
                        }
                    }
                    Ok(()) => {}
                    Err(_) => {
                        tracing::warn!(queue = %queue_name, "batch handler panicked; rejecting batch");
                        for id in ids {
                            let _ = broker.reject(&queue_name, id, true);
                        }
                    }
                }
            }
        });
        self.core
            .consumer_workers
            .lock()
            .unwrap()
            .insert((queue.to_string(), consumer_id), worker);
        Ok(())
    }

    pub fn unregister_consumer(&self, queue: &str, consumer_id: &str) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let removed = queue_arc
            .state
            .write()
            .unwrap()
            .consumers
            .remove(consumer_id)
            .is_some();
        if !removed {
            return Err(QueueError::ConsumerNotFound(consumer_id.to_string()));
        }
        if let Some(worker) = self
            .core
            .consumer_workers
            .lock()
            .unwrap()
            .remove(&(queue.to_string(), consumer_id.to_string()))
        {
            worker.abort();
        }
        Ok(())
    }

    pub fn active_consumers(&self, queue: &str) -> Result<Vec<String>, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.consumers.keys().cloned().collect())
    }

    pub fn register_producer(
        &self,
        queue: &str,
        config: ProducerConfig,
    ) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let mut state = queue_arc.state.write().unwrap();
        if state.producers.len() as u32 >= state.config.max_producers {
            return Err(QueueError::ConsumerLimitExceeded(queue.to_string()));
        }
        state.producers.insert(config.producer_id.clone(), config);
        Ok(())
    }

    pub fn unregister_producer(&self, queue: &str, producer_id: &str) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let removed = queue_arc
            .state
            .write()
            .unwrap()
            .producers
            .remove(producer_id)
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(QueueError::ProducerNotFound(producer_id.to_string()))
        }
    }

    pub fn active_producers(&self, queue: &str) -> Result<Vec<String>, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.producers.keys().cloned().collect())
    }

    // ---- filters and routing -------------------------------------------

    pub fn set_message_filter(&self, queue: &str, expression: &str) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        queue_arc.state.write().unwrap().filter = Some(expression.to_string());
        Ok(())
    }

    pub fn remove_message_filter(&self, queue: &str) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        queue_arc.state.write().unwrap().filter = None;
        Ok(())
    }

    /// Forward sends on `source` to `target` when the message's
    /// `routing_key` property equals `routing_key` (empty matches all).
    pub fn set_message_router(
        &self,
        source: &str,
        target: &str,
        routing_key: &str,
    ) -> Result<(), QueueError> {
        let _ = self.core.queue(target)?;
        let queue_arc = self.core.queue(source)?;
        queue_arc
            .state
            .write()
            .unwrap()
            .routes
            .insert(target.to_string(), routing_key.to_string());
        Ok(())
    }

    pub fn remove_message_router(&self, source: &str, target: &str) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(source)?;
        let removed = queue_arc
            .state
            .write()
            .unwrap()
            .routes
            .remove(target)
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(QueueError::QueueNotFound(target.to_string()))
        }
    }

    // ---- dead-letter management ----------------------------------------

    pub fn dead_letter_messages(
        &self,
        queue: &str,
        max_count: usize,
    ) -> Result<Vec<Message>, QueueError> {
        let dlq_name = self.dead_letter_queue_name(queue)?;
        match self.core.queue(&dlq_name) {
            Ok(dlq) => {
                let state = dlq.state.read().unwrap();
                Ok(state.pending_snapshot(max_count))
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Move a dead-lettered message back to its original queue with a fresh
    /// retry budget.
    pub fn requeue_dead_letter(&self, queue: &str, message_id: MessageId) -> Result<(), QueueError> {
        let dlq_name = self.dead_letter_queue_name(queue)?;
        let dlq = self.core.queue(&dlq_name)?;
        let mut message = dlq
            .state
            .write()
            .unwrap()
            .remove_ready(message_id)
            .ok_or(QueueError::MessageNotFound(message_id))?;

        message.header.retry_count = 0;
        message.header.dead_letter_reason = message::DeadLetterReason::Unknown;
        message.header.original_queue.clear();
        message.header.expire_time = 0;
        message.status = message::MessageStatus::Pending;
        self.core.forward_routed(queue, message)?;
        self.core
            .handlers
            .emit_queue_event(queue, "dead_letter_requeued", &format!("id={message_id}"));
        Ok(())
    }

    pub fn purge_dead_letter_queue(&self, queue: &str) -> Result<usize, QueueError> {
        let dlq_name = self.dead_letter_queue_name(queue)?;
        let dlq = self.core.queue(&dlq_name)?;
        let mut state = dlq.state.write().unwrap();
        let purged = state.ready_len();
        state.purge();
        Ok(purged)
    }

    fn dead_letter_queue_name(&self, queue: &str) -> Result<String, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.config.dead_letter_queue_name())
    }

    pub fn set_dead_letter_alert_config(
        &self,
        queue: &str,
        config: DeadLetterAlertConfig,
    ) -> Result<(), QueueError> {
        let _ = self.core.queue(queue)?;
        self.core.monitor.set_config(queue, config);
        Ok(())
    }

    pub fn dead_letter_alert_config(
        &self,
        queue: &str,
    ) -> Result<DeadLetterAlertConfig, QueueError> {
        let _ = self.core.queue(queue)?;
        Ok(self.core.monitor.config_for(queue))
    }

    pub fn active_dead_letter_alerts(
        &self,
        queue: &str,
    ) -> Result<Vec<DeadLetterAlert>, QueueError> {
        let _ = self.core.queue(queue)?;
        Ok(self.core.monitor.active_for(queue))
    }

    pub fn all_active_dead_letter_alerts(&self) -> Vec<DeadLetterAlert> {
        self.core.monitor.all_active()
    }

    pub fn clear_dead_letter_alert(
        &self,
        queue: &str,
        alert_type: DeadLetterAlertType,
    ) -> Result<(), QueueError> {
        let _ = self.core.queue(queue)?;
        self.core.monitor.clear(queue, alert_type);
        Ok(())
    }

    pub fn clear_all_dead_letter_alerts(&self, queue: &str) -> Result<(), QueueError> {
        self.core.monitor.clear_all(queue);
        Ok(())
    }

    pub fn dead_letter_queue_stats(
        &self,
        queue: &str,
    ) -> Result<DeadLetterQueueStats, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let mut stats = {
            let state = queue_arc.state.read().unwrap();
            state.dlq_stats.clone()
        };
        stats.current_dead_letter_messages = self
            .core
            .queue(&stats.dead_letter_queue_name)
            .map(|dlq| dlq.state.read().unwrap().ready_len() as u64)
            .unwrap_or(0);
        Ok(stats)
    }

    pub fn all_dead_letter_queue_stats(&self) -> Vec<DeadLetterQueueStats> {
        let names = self.list_queues();
        names
            .into_iter()
            .filter_map(|name| self.dead_letter_queue_stats(&name).ok())
            .collect()
    }

    // ---- stats and diagnostics -----------------------------------------

    pub fn queue_stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.stats_snapshot())
    }

    pub fn topic_stats(&self, topic: &str) -> Result<QueueStats, QueueError> {
        let topic_arc = self.core.topic(topic)?;
        let state = topic_arc.state.read().unwrap();
        Ok(state.stats.clone())
    }

    pub fn global_stats(&self) -> QueueStats {
        let queues: Vec<_> = self.core.queues.read().unwrap().values().cloned().collect();
        let mut total = QueueStats::default();
        for queue in queues {
            let stats = queue.state.read().unwrap().stats_snapshot();
            total.total_messages += stats.total_messages;
            total.pending_messages += stats.pending_messages;
            total.processed_messages += stats.processed_messages;
            total.failed_messages += stats.failed_messages;
            total.dead_letter_messages += stats.dead_letter_messages;
            total.retried_messages += stats.retried_messages;
            total.expired_messages += stats.expired_messages;
            total.rejected_messages += stats.rejected_messages;
            total.total_bytes += stats.total_bytes;
            total.active_consumers += stats.active_consumers;
            total.active_producers += stats.active_producers;
            total.last_message_time = total.last_message_time.max(stats.last_message_time);
        }
        total
    }

    pub fn queue_metrics(&self, queue: &str) -> Result<message::QueueMetrics, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        let mut metrics = state.metrics.clone();
        metrics.pending_messages = state.ready_len() as u64;
        Ok(metrics)
    }

    pub fn all_queue_metrics(&self) -> Vec<message::QueueMetrics> {
        self.list_queues()
            .into_iter()
            .filter_map(|name| self.queue_metrics(&name).ok())
            .collect()
    }

    pub fn pending_messages(
        &self,
        queue: &str,
        max_count: usize,
    ) -> Result<Vec<Message>, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(state.pending_snapshot(max_count))
    }

    pub fn queue_diagnostics(&self, queue: &str) -> Result<Vec<String>, QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        Ok(vec![
            format!("queue={}", queue_arc.name),
            format!("type={:?}", state.config.queue_type),
            format!("ready={}", state.ready_len()),
            format!("pending_acks={}", state.pending_acks.len()),
            format!("bytes={}", state.bytes_in_queue),
            format!("consumers={}", state.consumers.len()),
            format!("producers={}", state.producers.len()),
            format!("total={}", state.stats.total_messages),
            format!("processed={}", state.stats.processed_messages),
            format!("dead_letter={}", state.stats.dead_letter_messages),
            format!("retried={}", state.stats.retried_messages),
        ])
    }

    /// Internal consistency check; counting invariants that do not hold
    /// indicate corruption and surface as `InternalError`.
    pub fn validate_queue(&self, queue: &str) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        let state = queue_arc.state.read().unwrap();
        let stats = &state.stats;
        let accounted = stats.processed_messages
            + stats.dead_letter_messages
            + state.ready_len() as u64
            + state.pending_acks.len() as u64;
        if accounted > stats.total_messages + stats.retried_messages {
            let err = QueueError::InternalError(format!(
                "queue '{queue}' accounts for {accounted} messages but only {} entered",
                stats.total_messages
            ));
            drop(state);
            self.core.handlers.emit_error(&err, "validating queue");
            return Err(err);
        }
        Ok(())
    }

    // ---- cluster -------------------------------------------------------

    pub fn set_cluster_config(&self, config: ClusterConfig) -> Result<(), QueueError> {
        let shard_count = config.shards.len();
        self.core
            .router
            .set_config(config)
            .map_err(|err| QueueError::InvalidConfig(err.to_string()))?;
        self.core.wal.resize(shard_count);
        Ok(())
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        self.core.router.config()
    }

    pub fn shard_for_key(&self, key: &str) -> Result<(ShardId, String), QueueError> {
        self.core
            .router
            .shard_for_key(key)
            .map_err(|err| QueueError::InternalError(err.to_string()))
    }

    pub fn shard_replicas(&self, shard: ShardId) -> Result<Vec<ReplicaInfo>, QueueError> {
        self.core
            .router
            .replicas(shard)
            .map_err(|err| QueueError::InvalidParameter(err.to_string()))
    }

    pub fn set_node_health(&self, node_id: &str, healthy: bool) -> Result<(), QueueError> {
        self.core
            .router
            .set_node_health(node_id, healthy)
            .map_err(|err| QueueError::InvalidParameter(err.to_string()))
    }

    pub fn cluster_shard_statuses(&self) -> Vec<ShardInfo> {
        self.core.router.shard_statuses()
    }

    pub fn promote_to_leader(&self, shard: ShardId, node_id: &str) -> Result<(), QueueError> {
        self.core
            .router
            .promote_to_leader(shard, node_id)
            .map_err(|err| QueueError::InvalidParameter(err.to_string()))
    }

    pub fn demote_to_follower(&self, shard: ShardId, node_id: &str) -> Result<(), QueueError> {
        self.core
            .router
            .demote_to_follower(shard, node_id)
            .map_err(|err| QueueError::InvalidParameter(err.to_string()))
    }

    pub fn current_leader(&self, shard: ShardId) -> Result<String, QueueError> {
        self.core
            .router
            .current_leader(shard)
            .map_err(|err| QueueError::InvalidParameter(err.to_string()))
    }

    /// `(replication_events, replication_acks_total)`.
    pub fn replication_counters(&self) -> (u64, u64) {
        self.core.wal.counters()
    }

    pub fn wal_last_index(&self, shard: ShardId) -> u64 {
        self.core.wal.last_index(shard)
    }

    pub fn wal_follower_cursor(&self, shard: ShardId, node_id: &str) -> Option<u64> {
        self.core.wal.follower_cursor(shard, node_id)
    }

    // ---- global config -------------------------------------------------

    /// Store a global config entry. Recognized keys (see `BrokerConfig`)
    /// take effect immediately; unknown keys are stored but ignored.
    pub fn set_global_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let recognized = {
            let mut config = self.core.config.write().unwrap();
            config.apply_config_key(key, value)?
        };
        if !recognized {
            tracing::debug!(key, "storing unrecognized global config key");
        }
        self.core
            .raw_config
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn global_config(&self, key: &str) -> Option<String> {
        self.core.raw_config.read().unwrap().get(key).cloned()
    }

    // ---- alert manager -------------------------------------------------

    pub fn set_alert_config(&self, config: AlertConfig) {
        self.core.alerts.set_config(config);
    }

    pub fn alert_config(&self, alert_type: AlertType, queue: &str) -> Option<AlertConfig> {
        self.core.alerts.config(alert_type, queue)
    }

    pub fn all_alert_configs(&self) -> Vec<AlertConfig> {
        self.core.alerts.all_configs()
    }

    pub fn delete_alert_config(&self, alert_type: AlertType, queue: &str) -> Result<(), QueueError> {
        if self.core.alerts.delete_config(alert_type, queue) {
            Ok(())
        } else {
            Err(QueueError::InvalidParameter(format!(
                "no alert config for {alert_type:?} on '{queue}'"
            )))
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.core.alerts.active()
    }

    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.core.alerts.history(limit)
    }

    pub fn alert_stats(&self) -> AlertStats {
        self.core.alerts.stats()
    }

    pub fn acknowledge_alert(&self, alert_id: u64) -> Result<(), QueueError> {
        if self.core.alerts.acknowledge(alert_id) {
            Ok(())
        } else {
            Err(QueueError::InvalidParameter(format!(
                "no active alert {alert_id}"
            )))
        }
    }

    pub fn resolve_alert(&self, alert_id: u64) -> Result<(), QueueError> {
        if self.core.alerts.resolve(alert_id, now_ms()) {
            Ok(())
        } else {
            Err(QueueError::InvalidParameter(format!(
                "no active alert {alert_id}"
            )))
        }
    }

    pub fn clear_all_alerts(&self) {
        self.core.alerts.clear_all();
    }

    // ---- handler registration ------------------------------------------

    pub fn set_queue_event_handler(&self, handler: QueueEventHandler) {
        *self.core.handlers.queue_event.lock().unwrap() = Some(handler);
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.core.handlers.error.lock().unwrap() = Some(handler);
    }

    pub fn set_leader_change_handler(&self, handler: cluster::LeaderChangeHandler) {
        self.core.router.set_leader_change_handler(handler);
    }

    pub fn set_failover_handler(&self, handler: cluster::FailoverHandler) {
        self.core.router.set_failover_handler(handler);
    }

    pub fn set_transaction_commit_handler(&self, handler: TransactionCommitHandler) {
        *self.core.handlers.txn_commit.lock().unwrap() = Some(handler);
    }

    pub fn set_transaction_rollback_handler(&self, handler: TransactionRollbackHandler) {
        *self.core.handlers.txn_rollback.lock().unwrap() = Some(handler);
    }

    pub fn set_transaction_timeout_handler(&self, handler: TransactionTimeoutHandler) {
        *self.core.handlers.txn_timeout.lock().unwrap() = Some(handler);
    }

    pub fn set_dead_letter_alert_handler(&self, handler: DeadLetterAlertHandler) {
        *self.core.handlers.dead_letter_alert.lock().unwrap() = Some(handler);
    }

    pub fn set_dead_letter_stats_handler(&self, handler: DeadLetterStatsHandler) {
        *self.core.handlers.dead_letter_stats.lock().unwrap() = Some(handler);
    }

    pub fn set_alert_handler(&self, handler: AlertHandler) {
        *self.core.handlers.alert.lock().unwrap() = Some(handler);
    }

    pub fn remove_all_handlers(&self) {
        self.core.handlers.clear();
    }
}
