use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use message::{Message, MessageId};
use tokio::sync::Notify;

/// Work items owned by the scheduler. A `Retry` preserves the message id and
/// retry count; a `Recurring` stamps a fresh id onto each occurrence while
/// the template keeps its own id for cancellation.
pub(crate) enum ScheduledEntry {
    Delayed {
        queue: String,
        message: Message,
    },
    Recurring {
        queue: String,
        template: Message,
        interval_ms: u64,
        /// `None` means unbounded.
        remaining: Option<u32>,
    },
    Retry {
        queue: String,
        message: Message,
    },
}

impl ScheduledEntry {
    pub fn message_id(&self) -> MessageId {
        match self {
            ScheduledEntry::Delayed { message, .. } | ScheduledEntry::Retry { message, .. } => {
                message.header.id
            }
            ScheduledEntry::Recurring { template, .. } => template.header.id,
        }
    }
}

struct SchedulerState {
    entries: BTreeMap<(u64, u64), ScheduledEntry>,
    /// Message id -> entry key, for cancellation.
    index: HashMap<MessageId, (u64, u64)>,
    seq: u64,
}

/// Ordered set of due-time keyed entries, drained by the scheduler task.
/// Inserts with earlier due-times wake the task through `notify`.
pub(crate) struct Scheduler {
    state: Mutex<SchedulerState>,
    pub notify: Notify,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            state: Mutex::new(SchedulerState {
                entries: BTreeMap::new(),
                index: HashMap::new(),
                seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn insert(&self, due_ms: u64, entry: ScheduledEntry) {
        let message_id = entry.message_id();
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        let key = (due_ms, state.seq);
        state.entries.insert(key, entry);
        state.index.insert(message_id, key);
        let is_next = state.entries.keys().next() == Some(&key);
        drop(state);
        if is_next {
            self.notify.notify_one();
        }
    }

    /// Remove the entry scheduled under `message_id`, if any.
    pub fn cancel(&self, message_id: MessageId) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.index.remove(&message_id) {
            Some(key) => {
                state.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Entries whose due time has passed, in due order.
    pub fn take_due(&self, now: u64) -> Vec<ScheduledEntry> {
        let mut state = self.state.lock().unwrap();
        let mut due = Vec::new();
        while let Some((&key, _)) = state.entries.iter().next() {
            if key.0 > now {
                break;
            }
            if let Some(entry) = state.entries.remove(&key) {
                state.index.remove(&entry.message_id());
                due.push(entry);
            }
        }
        due
    }

    /// The earliest due time currently scheduled.
    pub fn next_due(&self) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.entries.keys().next().map(|(due, _)| *due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delayed(id: MessageId) -> ScheduledEntry {
        let mut message = Message::text("x");
        message.header.id = id;
        ScheduledEntry::Delayed {
            queue: "q".to_string(),
            message,
        }
    }

    #[test]
    fn due_entries_drain_in_order() {
        let scheduler = Scheduler::new();
        scheduler.insert(300, delayed(3));
        scheduler.insert(100, delayed(1));
        scheduler.insert(200, delayed(2));

        let due = scheduler.take_due(250);
        let ids: Vec<MessageId> = due.iter().map(|e| e.message_id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(scheduler.next_due(), Some(300));
    }

    #[test]
    fn cancel_removes_by_message_id() {
        let scheduler = Scheduler::new();
        scheduler.insert(100, delayed(7));
        assert!(scheduler.cancel(7));
        assert!(!scheduler.cancel(7));
        assert!(scheduler.take_due(u64::MAX).is_empty());
    }

    #[test]
    fn identical_due_times_preserve_insertion_order() {
        let scheduler = Scheduler::new();
        scheduler.insert(100, delayed(1));
        scheduler.insert(100, delayed(2));
        let ids: Vec<MessageId> = scheduler
            .take_due(100)
            .iter()
            .map(|e| e.message_id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
