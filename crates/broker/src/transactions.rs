use std::collections::HashMap;
use std::sync::Arc;

use message::{
    now_ms, Message, MessageId, QueueConfig, QueueError, TransactionId,
};

use crate::broker::Broker;
use crate::queue::{Queue, QueueState};
use crate::txn::{TransactionInfo, TransactionStatus, TxOperation};

/// Undo journal entries recorded while a commit replays staged operations.
enum Undo {
    RemoveSend { queue: String, id: MessageId },
    RestoreAck { queue: String, id: MessageId, message: Message },
    RestoreReject { queue: String, id: MessageId, message: Message },
    DeleteCreatedQueue { name: String },
}

impl Broker {
    // ---- lifecycle -----------------------------------------------------

    pub fn begin_transaction(&self, description: &str, timeout_ms: u64) -> TransactionId {
        let timeout_ms = if timeout_ms == 0 {
            self.core.config.read().unwrap().txn_default_timeout_ms
        } else {
            timeout_ms
        };
        let id = self.core.next_txn_id();
        self.core.txns.begin(id, description, timeout_ms, None)
    }

    pub fn begin_distributed_transaction(
        &self,
        coordinator_id: &str,
        description: &str,
        timeout_ms: u64,
    ) -> TransactionId {
        let timeout_ms = if timeout_ms == 0 {
            self.core.config.read().unwrap().txn_default_timeout_ms
        } else {
            timeout_ms
        };
        let id = self.core.next_txn_id();
        self.core
            .txns
            .begin(id, description, timeout_ms, Some(coordinator_id))
    }

    /// Replay the staged operations against the live queues, atomically.
    /// Holds the manager-wide gate; queue guards are taken in lexicographic
    /// name order and failures undo already-applied operations in reverse.
    pub async fn commit_transaction(&self, id: TransactionId) -> Result<(), QueueError> {
        self.commit_inner(id, false).await
    }

    pub async fn rollback_transaction(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.core.ensure_initialized()?;
        let _gate = self.core.txns.gate.lock().await;
        let started = std::time::Instant::now();
        self.core
            .txns
            .rollback(id, started.elapsed().as_secs_f64() * 1e3)?;
        self.core
            .perf
            .record_txn_rollback(started.elapsed().as_secs_f64() * 1e3);

        let handler = self.core.handlers.txn_rollback.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(id, reason);
        }
        tracing::debug!(transaction = id, reason, "transaction rolled back");
        Ok(())
    }

    /// Alias surface for explicit aborts; same semantics as rollback.
    pub async fn abort_transaction(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.rollback_transaction(id, reason).await
    }

    // ---- staged operations ---------------------------------------------

    /// Stage a send. Validates that the target queue would accept the
    /// message in principle; no capacity is reserved.
    pub fn send_in_transaction(
        &self,
        id: TransactionId,
        queue: &str,
        message: Message,
    ) -> Result<(), QueueError> {
        let queue_arc = self.core.queue(queue)?;
        {
            let state = queue_arc.state.read().unwrap();
            if message.payload.len() as u64 > state.config.max_size_bytes {
                return Err(QueueError::MessageTooLarge {
                    size: message.payload.len(),
                    limit: state.config.max_size_bytes as usize,
                });
            }
        }
        self.core.txns.stage(
            id,
            TxOperation::Send {
                queue: queue.to_string(),
                message,
            },
        )
    }

    pub fn ack_in_transaction(
        &self,
        id: TransactionId,
        queue: &str,
        message_id: MessageId,
    ) -> Result<(), QueueError> {
        let _ = self.core.queue(queue)?;
        self.core.txns.stage(
            id,
            TxOperation::Acknowledge {
                queue: queue.to_string(),
                message_id,
            },
        )
    }

    pub fn reject_in_transaction(
        &self,
        id: TransactionId,
        queue: &str,
        message_id: MessageId,
        reason: &str,
    ) -> Result<(), QueueError> {
        let _ = self.core.queue(queue)?;
        self.core.txns.stage(
            id,
            TxOperation::Reject {
                queue: queue.to_string(),
                message_id,
                reason: reason.to_string(),
            },
        )
    }

    pub fn create_queue_in_transaction(
        &self,
        id: TransactionId,
        config: QueueConfig,
    ) -> Result<(), QueueError> {
        if config.name.is_empty() {
            return Err(QueueError::InvalidParameter(
                "queue name must not be empty".to_string(),
            ));
        }
        self.core.txns.stage(id, TxOperation::CreateQueue { config })
    }

    pub fn delete_queue_in_transaction(
        &self,
        id: TransactionId,
        queue: &str,
    ) -> Result<(), QueueError> {
        self.core.txns.stage(
            id,
            TxOperation::DeleteQueue {
                queue: queue.to_string(),
            },
        )
    }

    // ---- queries -------------------------------------------------------

    pub fn transaction_status(&self, id: TransactionId) -> Result<TransactionStatus, QueueError> {
        self.core.txns.status(id)
    }

    pub fn transaction_info(&self, id: TransactionId) -> Result<TransactionInfo, QueueError> {
        self.core.txns.info(id)
    }

    pub fn transaction_stats(&self) -> message::TransactionStats {
        self.core.txns.stats_snapshot()
    }

    // ---- 2PC surface ---------------------------------------------------

    /// Validate the staged operations and mark the transaction prepared.
    /// Idempotent on an already-prepared transaction.
    pub fn prepare_transaction(&self, id: TransactionId) -> Result<(), QueueError> {
        let ops = self.core.txns.prepare(id)?;
        for op in &ops {
            if let Some(queue) = op.queue_name() {
                if !self.core.queues.read().unwrap().contains_key(queue) {
                    self.core.txns.unprepare(id);
                    return Err(QueueError::QueueNotFound(queue.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Commit a prepared distributed transaction.
    pub async fn commit_distributed_transaction(
        &self,
        id: TransactionId,
    ) -> Result<(), QueueError> {
        self.commit_inner(id, true).await
    }

    /// Roll back a distributed transaction from pending or prepared state.
    pub async fn rollback_distributed_transaction(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.rollback_transaction(id, reason).await
    }

    // ---- commit internals ----------------------------------------------

    async fn commit_inner(
        &self,
        id: TransactionId,
        require_prepared: bool,
    ) -> Result<(), QueueError> {
        self.core.ensure_initialized()?;
        let _gate = self.core.txns.gate.lock().await;
        let started = std::time::Instant::now();

        let ops = self.core.txns.begin_commit(id, require_prepared, now_ms())?;
        let result = self.apply_operations(&ops);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;

        match result {
            Ok(()) => {
                self.core.txns.finish_commit(id, elapsed_ms);
                self.core.perf.record_txn_commit(elapsed_ms);
                let handler = self.core.handlers.txn_commit.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(id, true, "");
                }
                tracing::debug!(transaction = id, ops = ops.len(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.core.txns.fail_commit(id);
                let handler = self.core.handlers.txn_commit.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(id, false, &err.to_string());
                }
                tracing::warn!(transaction = id, %err, "transaction commit failed");
                Err(err)
            }
        }
    }

    /// Apply staged operations in three phases: queue creations first (in
    /// staged order), then message operations under sorted per-queue write
    /// guards, then queue deletions. Message-level failures undo applied
    /// work in reverse before returning.
    fn apply_operations(&self, ops: &[TxOperation]) -> Result<(), QueueError> {
        let mut undo: Vec<Undo> = Vec::new();

        // Deletions can no longer fail once existence is validated here.
        for op in ops {
            if let TxOperation::DeleteQueue { queue } = op {
                if !self.core.queues.read().unwrap().contains_key(queue) {
                    return Err(QueueError::QueueNotFound(queue.clone()));
                }
            }
        }

        for op in ops {
            if let TxOperation::CreateQueue { config } = op {
                if let Err(err) = self.create_queue(config.clone()) {
                    self.unwind(undo);
                    return Err(err);
                }
                undo.push(Undo::DeleteCreatedQueue {
                    name: config.name.clone(),
                });
            }
        }

        // Collect the queues message operations touch, in canonical order.
        let mut names: Vec<String> = ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    TxOperation::Send { .. }
                        | TxOperation::Acknowledge { .. }
                        | TxOperation::Reject { .. }
                )
            })
            .filter_map(|op| op.queue_name().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();

        let mut arcs: Vec<Arc<Queue>> = Vec::with_capacity(names.len());
        for name in &names {
            match self.core.queue(name) {
                Ok(queue) => arcs.push(queue),
                Err(err) => {
                    self.unwind(undo);
                    return Err(err);
                }
            }
        }

        let mut dead_letter_moves: Vec<(String, Message)> = Vec::new();
        let mut wal_appends: Vec<(String, MessageId)> = Vec::new();
        {
            let mut guards: Vec<std::sync::RwLockWriteGuard<'_, QueueState>> =
                arcs.iter().map(|queue| queue.state.write().unwrap()).collect();
            let index: HashMap<&str, usize> = names
                .iter()
                .enumerate()
                .map(|(position, name)| (name.as_str(), position))
                .collect();
            let now = now_ms();

            for op in ops {
                let failed = match op {
                    TxOperation::Send { queue, message } => {
                        let state = &mut guards[index[queue.as_str()]];
                        if state.is_full() {
                            Some(QueueError::QueueFull(queue.clone()))
                        } else {
                            let mut message = message.clone();
                            message.header.id = self.core.next_message_id();
                            message.header.timestamp = now;
                            message.header.max_retries = state.config.max_retries;
                            if message.header.expire_time == 0 && state.config.message_ttl_ms > 0 {
                                message.header.expire_time = now + state.config.message_ttl_ms;
                            }
                            let id = message.header.id;
                            state.enqueue(message, now);
                            undo.push(Undo::RemoveSend {
                                queue: queue.clone(),
                                id,
                            });
                            wal_appends.push((queue.clone(), id));
                            None
                        }
                    }
                    TxOperation::Acknowledge { queue, message_id } => {
                        let state = &mut guards[index[queue.as_str()]];
                        match state.pending_acks.remove(message_id) {
                            Some(message) => {
                                state.acked.insert(*message_id);
                                state.stats.processed_messages += 1;
                                undo.push(Undo::RestoreAck {
                                    queue: queue.clone(),
                                    id: *message_id,
                                    message,
                                });
                                None
                            }
                            None if state.acked.contains(message_id) => {
                                Some(QueueError::InvalidState(format!(
                                    "message {message_id} was already acknowledged"
                                )))
                            }
                            None => Some(QueueError::MessageNotFound(*message_id)),
                        }
                    }
                    TxOperation::Reject {
                        queue, message_id, ..
                    } => {
                        let state = &mut guards[index[queue.as_str()]];
                        match state.pending_acks.remove(message_id) {
                            Some(mut message) => {
                                undo.push(Undo::RestoreReject {
                                    queue: queue.clone(),
                                    id: *message_id,
                                    message: message.clone(),
                                });
                                state.mark_dead_letter(
                                    &mut message,
                                    message::DeadLetterReason::Rejected,
                                    now,
                                );
                                dead_letter_moves.push((queue.clone(), message));
                                None
                            }
                            None => Some(QueueError::MessageNotFound(*message_id)),
                        }
                    }
                    TxOperation::CreateQueue { .. } | TxOperation::DeleteQueue { .. } => None,
                };
                if let Some(err) = failed {
                    // Undo inside the guards we still hold.
                    self.unwind_guarded(&mut guards, &index, std::mem::take(&mut undo));
                    return Err(err);
                }
            }
        }

        // DLQ insertion happens outside the guard set; owners are already
        // updated and the commit can no longer fail.
        for (queue, message) in dead_letter_moves {
            self.finish_dead_letter(&queue, message);
        }
        for (queue, message_id) in &wal_appends {
            let routing = queue.clone();
            if let Ok((shard, _)) = self.core.router.shard_for_key(&routing) {
                let followers = self.core.router.healthy_followers(shard);
                self.core.wal.append(shard, *message_id, queue, &followers);
            }
        }
        for name in &names {
            if let Ok(queue) = self.core.queue(name) {
                queue.notify.notify_one();
            }
        }

        for op in ops {
            if let TxOperation::DeleteQueue { queue } = op {
                if let Err(err) = self.delete_queue(queue) {
                    // Existence was validated above; deletion only races
                    // another deletion, which is equivalent.
                    tracing::debug!(%queue, %err, "transactional delete raced");
                }
            }
        }
        Ok(())
    }

    /// Reverse-order undo while the sorted guard set is still held.
    fn unwind_guarded(
        &self,
        guards: &mut [std::sync::RwLockWriteGuard<'_, QueueState>],
        index: &HashMap<&str, usize>,
        undo: Vec<Undo>,
    ) {
        for action in undo.into_iter().rev() {
            match action {
                Undo::RemoveSend { queue, id } => {
                    if let Some(position) = index.get(queue.as_str()) {
                        guards[*position].remove_ready(id);
                    }
                }
                Undo::RestoreAck { queue, id, message } => {
                    if let Some(position) = index.get(queue.as_str()) {
                        let state = &mut guards[*position];
                        state.acked.remove(&id);
                        state.stats.processed_messages =
                            state.stats.processed_messages.saturating_sub(1);
                        state.pending_acks.insert(id, message);
                    }
                }
                Undo::RestoreReject { queue, id, message } => {
                    if let Some(position) = index.get(queue.as_str()) {
                        let state = &mut guards[*position];
                        state.stats.dead_letter_messages =
                            state.stats.dead_letter_messages.saturating_sub(1);
                        state.stats.rejected_messages =
                            state.stats.rejected_messages.saturating_sub(1);
                        state.dlq_stats.total_dead_letter_messages =
                            state.dlq_stats.total_dead_letter_messages.saturating_sub(1);
                        state.dlq_stats.rejected_messages =
                            state.dlq_stats.rejected_messages.saturating_sub(1);
                        state.window.dead_letter_ts.pop_back();
                        state.pending_acks.insert(id, message);
                    }
                }
                Undo::DeleteCreatedQueue { name } => {
                    let _ = self.core.queues.write().unwrap().remove(&name);
                }
            }
        }
    }

    /// Undo used before the guard set exists (queue-creation phase).
    fn unwind(&self, undo: Vec<Undo>) {
        for action in undo.into_iter().rev() {
            if let Undo::DeleteCreatedQueue { name } = action {
                let _ = self.core.queues.write().unwrap().remove(&name);
            }
        }
    }

    /// Enqueue an already-marked message into its owner's DLQ.
    fn finish_dead_letter(&self, queue: &str, message: Message) {
        let dlq_name = match self.core.queue(queue) {
            Ok(owner) => owner.state.read().unwrap().config.dead_letter_queue_name(),
            Err(_) => return,
        };
        if self.core.queue(&dlq_name).is_err() {
            let mut config = QueueConfig::new(&dlq_name);
            config.queue_type = message::QueueType::DeadLetter;
            config.enable_dead_letter = false;
            config.message_ttl_ms = 0;
            if let Err(err) = self.create_queue(config) {
                tracing::warn!(%dlq_name, %err, "dead-letter queue creation raced");
            }
        }
        if let Err(err) = self.core.forward_routed(&dlq_name, message) {
            self.core
                .handlers
                .emit_error(&err, "moving rejected message to the dead-letter queue");
        }
    }
}
