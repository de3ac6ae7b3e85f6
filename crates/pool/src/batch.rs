use message::{now_ms, BatchId, Message};

/// An open batch: messages staged against one queue until committed or
/// aborted by the broker fast path.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub batch_id: BatchId,
    pub queue_name: String,
    pub messages: Vec<Message>,
    pub created_time: u64,
    /// Absolute expiry for the open batch; 0 means it never expires.
    pub expire_time: u64,
}

impl MessageBatch {
    pub fn new(batch_id: BatchId, queue_name: impl Into<String>) -> Self {
        MessageBatch {
            batch_id,
            queue_name: queue_name.into(),
            messages: Vec::new(),
            created_time: now_ms(),
            expire_time: 0,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.payload.len()).sum()
    }
}
