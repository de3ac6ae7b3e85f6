use std::sync::{Arc, Mutex};

use message::{DeadLetterQueueStats, Message, QueueError, TransactionId};

use crate::alerts::Alert;
use crate::monitor::DeadLetterAlert;

pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
pub type BatchMessageHandler = Arc<dyn Fn(Vec<Message>) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&QueueError, &str) + Send + Sync>;
/// `(queue, event, details)`.
pub type QueueEventHandler = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;
/// `(transaction, success, error detail)`.
pub type TransactionCommitHandler = Arc<dyn Fn(TransactionId, bool, &str) + Send + Sync>;
/// `(transaction, reason)`.
pub type TransactionRollbackHandler = Arc<dyn Fn(TransactionId, &str) + Send + Sync>;
pub type TransactionTimeoutHandler = Arc<dyn Fn(TransactionId) + Send + Sync>;
pub type DeadLetterAlertHandler = Arc<dyn Fn(&DeadLetterAlert) + Send + Sync>;
pub type DeadLetterStatsHandler = Arc<dyn Fn(&DeadLetterQueueStats) + Send + Sync>;
pub type AlertHandler = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Registered callback slots. Slots are read by cloning the `Arc` so no lock
/// is ever held across an invocation.
#[derive(Default)]
pub(crate) struct Handlers {
    pub queue_event: Mutex<Option<QueueEventHandler>>,
    pub error: Mutex<Option<ErrorHandler>>,
    pub txn_commit: Mutex<Option<TransactionCommitHandler>>,
    pub txn_rollback: Mutex<Option<TransactionRollbackHandler>>,
    pub txn_timeout: Mutex<Option<TransactionTimeoutHandler>>,
    pub dead_letter_alert: Mutex<Option<DeadLetterAlertHandler>>,
    pub dead_letter_stats: Mutex<Option<DeadLetterStatsHandler>>,
    pub alert: Mutex<Option<AlertHandler>>,
}

impl Handlers {
    pub fn clear(&self) {
        *self.queue_event.lock().unwrap() = None;
        *self.error.lock().unwrap() = None;
        *self.txn_commit.lock().unwrap() = None;
        *self.txn_rollback.lock().unwrap() = None;
        *self.txn_timeout.lock().unwrap() = None;
        *self.dead_letter_alert.lock().unwrap() = None;
        *self.dead_letter_stats.lock().unwrap() = None;
        *self.alert.lock().unwrap() = None;
    }

    pub fn emit_queue_event(&self, queue: &str, event: &str, details: &str) {
        let handler = self.queue_event.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(queue, event, details);
        }
    }

    pub fn emit_error(&self, error: &QueueError, context: &str) {
        tracing::warn!(%error, context, "broker error");
        let handler = self.error.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(error, context);
        }
    }
}
