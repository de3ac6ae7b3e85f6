use std::collections::HashMap;
use std::sync::Mutex;

use message::{
    now_ms, Message, MessageId, QueueConfig, QueueError, TransactionId, TransactionStats,
};
use serde::{Deserialize, Serialize};

/// Externally visible transaction states. The internal "prepared" 2PC
/// marker reports as `Pending` here, matching the single-node surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Committed,
    RolledBack,
    Timeout,
    Failed,
}

/// Internal phase machine. `Prepared` is a distinct variant so 2PC
/// transitions are enforced by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxPhase {
    Open,
    Prepared,
    Committed,
    RolledBack,
    TimedOut,
    Failed,
}

impl TxPhase {
    fn status(self) -> TransactionStatus {
        match self {
            TxPhase::Open | TxPhase::Prepared => TransactionStatus::Pending,
            TxPhase::Committed => TransactionStatus::Committed,
            TxPhase::RolledBack => TransactionStatus::RolledBack,
            TxPhase::TimedOut => TransactionStatus::Timeout,
            TxPhase::Failed => TransactionStatus::Failed,
        }
    }

    fn is_final(self) -> bool {
        !matches!(self, TxPhase::Open | TxPhase::Prepared)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum TxOperation {
    Send {
        queue: String,
        message: Message,
    },
    Acknowledge {
        queue: String,
        message_id: MessageId,
    },
    Reject {
        queue: String,
        message_id: MessageId,
        reason: String,
    },
    CreateQueue {
        config: QueueConfig,
    },
    DeleteQueue {
        queue: String,
    },
}

impl TxOperation {
    /// Queue whose write guard the commit path must hold, if any.
    pub fn queue_name(&self) -> Option<&str> {
        match self {
            TxOperation::Send { queue, .. }
            | TxOperation::Acknowledge { queue, .. }
            | TxOperation::Reject { queue, .. }
            | TxOperation::DeleteQueue { queue } => Some(queue),
            TxOperation::CreateQueue { .. } => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Txn {
    pub id: TransactionId,
    pub phase: TxPhase,
    pub ops: Vec<TxOperation>,
    pub start_time: u64,
    pub end_time: u64,
    pub description: String,
    pub timeout_ms: u64,
    pub is_distributed: bool,
    pub coordinator_id: String,
}

impl Txn {
    pub fn deadline(&self) -> u64 {
        self.start_time.saturating_add(self.timeout_ms)
    }
}

/// Public snapshot of one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub operation_count: usize,
    pub start_time: u64,
    pub end_time: u64,
    pub description: String,
    pub timeout_ms: u64,
    pub is_distributed: bool,
    pub coordinator_id: String,
}

/// Owns every live and finished transaction of one broker instance. Queue
/// application happens in the facade; this manager enforces the state
/// machine and keeps the statistics.
pub(crate) struct TransactionManager {
    txns: Mutex<HashMap<TransactionId, Txn>>,
    stats: Mutex<TransactionStats>,
    /// Manager-wide exclusive gate serializing commit and rollback.
    pub gate: tokio::sync::Mutex<()>,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            txns: Mutex::new(HashMap::new()),
            stats: Mutex::new(TransactionStats::default()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn begin(
        &self,
        id: TransactionId,
        description: &str,
        timeout_ms: u64,
        coordinator_id: Option<&str>,
    ) -> TransactionId {
        let txn = Txn {
            id,
            phase: TxPhase::Open,
            ops: Vec::new(),
            start_time: now_ms(),
            end_time: 0,
            description: description.to_string(),
            timeout_ms,
            is_distributed: coordinator_id.is_some(),
            coordinator_id: coordinator_id.unwrap_or_default().to_string(),
        };
        self.txns.lock().unwrap().insert(id, txn);
        let mut stats = self.stats.lock().unwrap();
        stats.total_transactions += 1;
        stats.refresh_rates();
        stats.last_update_time = now_ms();
        id
    }

    /// Append a staged operation. Staging never touches live queues.
    pub fn stage(&self, id: TransactionId, op: TxOperation) -> Result<(), QueueError> {
        let mut txns = self.txns.lock().unwrap();
        let txn = txns
            .get_mut(&id)
            .ok_or(QueueError::TransactionNotFound(id))?;
        if txn.phase.is_final() {
            return Err(QueueError::InvalidState(format!(
                "transaction {id} is already finalized"
            )));
        }
        txn.ops.push(op);
        Ok(())
    }

    /// Snapshot the operations for commit. The transaction stays in its
    /// current phase until `finish_commit`; the caller holds the gate.
    pub fn begin_commit(
        &self,
        id: TransactionId,
        require_prepared: bool,
        now: u64,
    ) -> Result<Vec<TxOperation>, QueueError> {
        let mut txns = self.txns.lock().unwrap();
        let txn = txns
            .get_mut(&id)
            .ok_or(QueueError::TransactionNotFound(id))?;
        if txn.phase.is_final() {
            return Err(QueueError::InvalidState(format!(
                "transaction {id} is already {:?}",
                txn.phase.status()
            )));
        }
        if require_prepared && txn.phase != TxPhase::Prepared {
            return Err(QueueError::InvalidState(format!(
                "transaction {id} has not been prepared"
            )));
        }
        if now >= txn.deadline() {
            txn.phase = TxPhase::TimedOut;
            txn.end_time = now;
            drop(txns);
            self.record_timeout();
            return Err(QueueError::InvalidState(format!(
                "transaction {id} timed out before commit"
            )));
        }
        Ok(txn.ops.clone())
    }

    pub fn finish_commit(&self, id: TransactionId, duration_ms: f64) {
        let mut txns = self.txns.lock().unwrap();
        if let Some(txn) = txns.get_mut(&id) {
            txn.phase = TxPhase::Committed;
            txn.end_time = now_ms();
        }
        drop(txns);
        let mut stats = self.stats.lock().unwrap();
        stats.committed_transactions += 1;
        let count = stats.committed_transactions;
        stats.average_commit_time_ms +=
            (duration_ms - stats.average_commit_time_ms) / count as f64;
        stats.refresh_rates();
        stats.last_update_time = now_ms();
    }

    pub fn fail_commit(&self, id: TransactionId) {
        let mut txns = self.txns.lock().unwrap();
        if let Some(txn) = txns.get_mut(&id) {
            txn.phase = TxPhase::Failed;
            txn.end_time = now_ms();
        }
        drop(txns);
        let mut stats = self.stats.lock().unwrap();
        stats.failed_transactions += 1;
        stats.refresh_rates();
        stats.last_update_time = now_ms();
    }

    /// Discard staged operations and finalize as rolled back. Valid from
    /// both open and prepared states.
    pub fn rollback(
        &self,
        id: TransactionId,
        duration_ms: f64,
    ) -> Result<(), QueueError> {
        let mut txns = self.txns.lock().unwrap();
        let txn = txns
            .get_mut(&id)
            .ok_or(QueueError::TransactionNotFound(id))?;
        if txn.phase.is_final() {
            return Err(QueueError::InvalidState(format!(
                "transaction {id} is already {:?}",
                txn.phase.status()
            )));
        }
        txn.phase = TxPhase::RolledBack;
        txn.end_time = now_ms();
        txn.ops.clear();
        drop(txns);

        let mut stats = self.stats.lock().unwrap();
        stats.rolled_back_transactions += 1;
        let count = stats.rolled_back_transactions;
        stats.average_rollback_time_ms +=
            (duration_ms - stats.average_rollback_time_ms) / count as f64;
        stats.refresh_rates();
        stats.last_update_time = now_ms();
        Ok(())
    }

    /// Validate and mark prepared. Idempotent: preparing a prepared
    /// transaction succeeds without effect.
    pub fn prepare(&self, id: TransactionId) -> Result<Vec<TxOperation>, QueueError> {
        let mut txns = self.txns.lock().unwrap();
        let txn = txns
            .get_mut(&id)
            .ok_or(QueueError::TransactionNotFound(id))?;
        match txn.phase {
            TxPhase::Prepared => Ok(Vec::new()),
            TxPhase::Open => {
                let ops = txn.ops.clone();
                txn.phase = TxPhase::Prepared;
                Ok(ops)
            }
            _ => Err(QueueError::InvalidState(format!(
                "transaction {id} is already {:?}",
                txn.phase.status()
            ))),
        }
    }

    /// Undo a failed prepare validation: drop back to open.
    pub fn unprepare(&self, id: TransactionId) {
        let mut txns = self.txns.lock().unwrap();
        if let Some(txn) = txns.get_mut(&id) {
            if txn.phase == TxPhase::Prepared {
                txn.phase = TxPhase::Open;
            }
        }
    }

    pub fn is_prepared(&self, id: TransactionId) -> bool {
        self.txns
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|txn| txn.phase == TxPhase::Prepared)
    }

    /// Expire every open transaction past its deadline. Returns the ids
    /// transitioned, for timeout callbacks.
    pub fn sweep_timeouts(&self, now: u64) -> Vec<TransactionId> {
        let mut timed_out = Vec::new();
        let mut txns = self.txns.lock().unwrap();
        for txn in txns.values_mut() {
            if !txn.phase.is_final() && now >= txn.deadline() {
                txn.phase = TxPhase::TimedOut;
                txn.end_time = now;
                txn.ops.clear();
                timed_out.push(txn.id);
            }
        }
        drop(txns);
        for _ in &timed_out {
            self.record_timeout();
        }
        timed_out
    }

    fn record_timeout(&self) {
        let mut stats = self.stats.lock().unwrap();
        stats.timeout_transactions += 1;
        stats.refresh_rates();
        stats.last_update_time = now_ms();
    }

    pub fn status(&self, id: TransactionId) -> Result<TransactionStatus, QueueError> {
        self.txns
            .lock()
            .unwrap()
            .get(&id)
            .map(|txn| txn.phase.status())
            .ok_or(QueueError::TransactionNotFound(id))
    }

    pub fn info(&self, id: TransactionId) -> Result<TransactionInfo, QueueError> {
        self.txns
            .lock()
            .unwrap()
            .get(&id)
            .map(|txn| TransactionInfo {
                id: txn.id,
                status: txn.phase.status(),
                operation_count: txn.ops.len(),
                start_time: txn.start_time,
                end_time: txn.end_time,
                description: txn.description.clone(),
                timeout_ms: txn.timeout_ms,
                is_distributed: txn.is_distributed,
                coordinator_id: txn.coordinator_id.clone(),
            })
            .ok_or(QueueError::TransactionNotFound(id))
    }

    pub fn stats_snapshot(&self) -> TransactionStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(id: TransactionId, timeout_ms: u64) -> TransactionManager {
        let manager = TransactionManager::new();
        manager.begin(id, "test", timeout_ms, None);
        manager
    }

    #[test]
    fn lifecycle_commit() {
        let manager = manager_with(1, 30_000);
        manager
            .stage(
                1,
                TxOperation::Send {
                    queue: "q".to_string(),
                    message: Message::text("x"),
                },
            )
            .unwrap();
        let ops = manager.begin_commit(1, false, now_ms()).unwrap();
        assert_eq!(ops.len(), 1);
        manager.finish_commit(1, 1.5);
        assert_eq!(manager.status(1).unwrap(), TransactionStatus::Committed);

        // Final states refuse further transitions.
        assert!(matches!(
            manager.begin_commit(1, false, now_ms()),
            Err(QueueError::InvalidState(_)),
        ));
        assert!(matches!(
            manager.rollback(1, 0.0),
            Err(QueueError::InvalidState(_)),
        ));
    }

    #[test]
    fn rollback_discards_and_counts() {
        let manager = manager_with(2, 30_000);
        manager.rollback(2, 0.5).unwrap();
        let stats = manager.stats_snapshot();
        assert_eq!(stats.rolled_back_transactions, 1);
        assert_eq!(manager.status(2).unwrap(), TransactionStatus::RolledBack);
    }

    #[test]
    fn sweep_expires_old_transactions() {
        let manager = manager_with(3, 10);
        let later = now_ms() + 50;
        let expired = manager.sweep_timeouts(later);
        assert_eq!(expired, vec![3]);
        assert_eq!(manager.status(3).unwrap(), TransactionStatus::Timeout);
        assert_eq!(manager.stats_snapshot().timeout_transactions, 1);
    }

    #[test]
    fn prepare_is_idempotent_and_gates_distributed_commit() {
        let manager = manager_with(4, 30_000);
        assert!(manager.begin_commit(4, true, now_ms()).is_err());
        manager.prepare(4).unwrap();
        manager.prepare(4).unwrap();
        assert!(manager.is_prepared(4));
        assert!(manager.begin_commit(4, true, now_ms()).is_ok());
    }

    #[test]
    fn unknown_transaction() {
        let manager = TransactionManager::new();
        assert_eq!(
            manager.status(99),
            Err(QueueError::TransactionNotFound(99)),
        );
    }
}
