use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use codec::{CompressionConfig, CompressionTracker, EncryptionConfig, EncryptionTracker};
use message::{
    now_ms, ConsumerConfig, DeadLetterQueueStats, DeadLetterReason, Message, MessageId,
    MessageStatus, ProducerConfig, QueueConfig, QueueMetrics, QueueStats,
};
use tokio::sync::Notify;

/// A queue and its synchronization handles. State sits behind a plain
/// `RwLock` (never held across an await); `notify` wakes blocked receivers
/// on enqueue, delete, and shutdown.
pub(crate) struct Queue {
    pub name: String,
    pub notify: Notify,
    pub state: RwLock<QueueState>,
}

impl Queue {
    pub fn new(config: QueueConfig, latency_ring: usize) -> Self {
        let name = config.name.clone();
        Queue {
            name,
            notify: Notify::new(),
            state: RwLock::new(QueueState::new(config, latency_ring)),
        }
    }
}

/// Timestamp deques and the latency ring behind per-queue rate and
/// percentile computation.
#[derive(Debug)]
pub(crate) struct MetricsWindow {
    pub enqueue_ts: VecDeque<u64>,
    pub dequeue_ts: VecDeque<u64>,
    pub dead_letter_ts: VecDeque<u64>,
    pub latency_ms: VecDeque<f64>,
    pub latency_capacity: usize,
}

impl MetricsWindow {
    fn new(latency_capacity: usize) -> Self {
        MetricsWindow {
            enqueue_ts: VecDeque::new(),
            dequeue_ts: VecDeque::new(),
            dead_letter_ts: VecDeque::new(),
            latency_ms: VecDeque::new(),
            latency_capacity: latency_capacity.max(1),
        }
    }

    pub fn record_enqueue(&mut self, now: u64) {
        self.enqueue_ts.push_back(now);
    }

    pub fn record_dequeue(&mut self, now: u64) {
        self.dequeue_ts.push_back(now);
    }

    pub fn record_dead_letter(&mut self, now: u64) {
        self.dead_letter_ts.push_back(now);
    }

    pub fn record_latency(&mut self, sample_ms: f64) {
        if self.latency_ms.len() == self.latency_capacity {
            self.latency_ms.pop_front();
        }
        self.latency_ms.push_back(sample_ms);
    }

    pub fn trim(&mut self, now: u64, window_ms: u64) {
        let cutoff = now.saturating_sub(window_ms);
        for deque in [
            &mut self.enqueue_ts,
            &mut self.dequeue_ts,
            &mut self.dead_letter_ts,
        ] {
            while deque.front().is_some_and(|ts| *ts < cutoff) {
                deque.pop_front();
            }
        }
    }

    pub fn rate_per_second(count: usize, window_ms: u64) -> f64 {
        if window_ms == 0 {
            return 0.0;
        }
        count as f64 / (window_ms as f64 / 1000.0)
    }

    /// Nearest-rank percentile of the latency ring; `p` in [0, 1].
    pub fn latency_percentile(&self, p: f64) -> f64 {
        if self.latency_ms.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latency_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    }
}

struct PrioEntry {
    message: Message,
    /// Insertion sequence, the final tiebreaker.
    seq: u64,
}

impl PrioEntry {
    fn key(&self) -> (message::MessagePriority, u64, MessageId, u64) {
        (
            self.message.header.priority,
            self.message.header.timestamp,
            self.message.header.id,
            self.seq,
        )
    }
}

impl PartialEq for PrioEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for PrioEntry {}

impl Ord for PrioEntry {
    // Max-heap: highest priority first, then earliest timestamp, then
    // lowest id, then insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .header
            .priority
            .cmp(&other.message.header.priority)
            .then_with(|| other.message.header.timestamp.cmp(&self.message.header.timestamp))
            .then_with(|| other.message.header.id.cmp(&self.message.header.id))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PrioEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum ReadyQueue {
    Fifo(VecDeque<Message>),
    Priority(BinaryHeap<PrioEntry>),
}

impl ReadyQueue {
    fn len(&self) -> usize {
        match self {
            ReadyQueue::Fifo(queue) => queue.len(),
            ReadyQueue::Priority(heap) => heap.len(),
        }
    }
}

pub(crate) struct QueueState {
    pub config: QueueConfig,
    ready: ReadyQueue,
    seq: u64,
    /// Dispatched but unacknowledged messages, keyed by id.
    pub pending_acks: HashMap<MessageId, Message>,
    /// Ids already acknowledged; a repeat ack is an invalid state, not a
    /// missing message.
    pub acked: HashSet<MessageId>,
    pub consumers: HashMap<String, ConsumerConfig>,
    pub producers: HashMap<String, ProducerConfig>,
    pub filter: Option<String>,
    /// Target queue name -> routing key.
    pub routes: HashMap<String, String>,
    pub stats: QueueStats,
    pub dlq_stats: DeadLetterQueueStats,
    /// Last snapshot published by the metrics sampler.
    pub metrics: QueueMetrics,
    pub window: MetricsWindow,
    pub compression: CompressionConfig,
    pub encryption: EncryptionConfig,
    pub compression_tracker: CompressionTracker,
    pub encryption_tracker: EncryptionTracker,
    pub batch_commits: u64,
    pub batch_messages: u64,
    pub bytes_in_queue: u64,
}

impl QueueState {
    pub fn new(config: QueueConfig, latency_ring: usize) -> Self {
        let now = now_ms();
        let ready = if config.enable_priority {
            ReadyQueue::Priority(BinaryHeap::new())
        } else {
            ReadyQueue::Fifo(VecDeque::new())
        };
        let dlq_stats = DeadLetterQueueStats {
            queue_name: config.name.clone(),
            dead_letter_queue_name: config.dead_letter_queue_name(),
            created_time: now,
            ..Default::default()
        };
        QueueState {
            ready,
            seq: 0,
            pending_acks: HashMap::new(),
            acked: HashSet::new(),
            consumers: HashMap::new(),
            producers: HashMap::new(),
            filter: None,
            routes: HashMap::new(),
            stats: QueueStats {
                created_time: now,
                ..Default::default()
            },
            dlq_stats,
            metrics: QueueMetrics {
                queue_name: config.name.clone(),
                ..Default::default()
            },
            window: MetricsWindow::new(latency_ring),
            compression: CompressionConfig::default(),
            encryption: EncryptionConfig::default(),
            compression_tracker: CompressionTracker::default(),
            encryption_tracker: EncryptionTracker::default(),
            batch_commits: 0,
            batch_messages: 0,
            bytes_in_queue: 0,
            config,
        }
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_full(&self) -> bool {
        self.ready.len() as u64 >= self.config.max_size as u64
    }

    /// Push a validated message. Caller has already run capacity checks,
    /// codec stages, and id assignment.
    pub fn enqueue(&mut self, mut message: Message, now: u64) {
        message.status = MessageStatus::Sent;
        self.bytes_in_queue += message.payload.len() as u64;
        self.stats.total_messages += 1;
        self.stats.total_bytes += message.payload.len() as u64;
        self.stats.last_message_time = now;
        self.window.record_enqueue(now);
        match &mut self.ready {
            ReadyQueue::Fifo(queue) => queue.push_back(message),
            ReadyQueue::Priority(heap) => {
                self.seq += 1;
                heap.push(PrioEntry {
                    message,
                    seq: self.seq,
                });
            }
        }
    }

    /// Pop the next live message, collecting expired ones for the caller to
    /// dead-letter. Expiry only inspects successive heads, per the sweep
    /// contract.
    pub fn dequeue(&mut self, now: u64, expired: &mut Vec<Message>) -> Option<Message> {
        loop {
            let message = match &mut self.ready {
                ReadyQueue::Fifo(queue) => queue.pop_front(),
                ReadyQueue::Priority(heap) => heap.pop().map(|entry| entry.message),
            }?;
            self.bytes_in_queue = self
                .bytes_in_queue
                .saturating_sub(message.payload.len() as u64);
            if message.is_expired(now) {
                expired.push(message);
                continue;
            }
            self.window.record_dequeue(now);
            return Some(message);
        }
    }

    pub fn peek(&self) -> Option<Message> {
        match &self.ready {
            ReadyQueue::Fifo(queue) => queue.front().cloned(),
            ReadyQueue::Priority(heap) => heap.peek().map(|entry| entry.message.clone()),
        }
    }

    /// First `max` ready messages in dequeue order, without removal.
    pub fn pending_snapshot(&self, max: usize) -> Vec<Message> {
        match &self.ready {
            ReadyQueue::Fifo(queue) => queue.iter().take(max).cloned().collect(),
            ReadyQueue::Priority(heap) => {
                let mut entries: Vec<&PrioEntry> = heap.iter().collect();
                entries.sort_by(|a, b| b.cmp(a));
                entries
                    .into_iter()
                    .take(max)
                    .map(|entry| entry.message.clone())
                    .collect()
            }
        }
    }

    /// Remove a specific ready message; transaction undo path.
    pub fn remove_ready(&mut self, id: MessageId) -> Option<Message> {
        let removed = match &mut self.ready {
            ReadyQueue::Fifo(queue) => {
                let index = queue.iter().position(|m| m.header.id == id)?;
                queue.remove(index)
            }
            ReadyQueue::Priority(heap) => {
                let mut entries: Vec<PrioEntry> = std::mem::take(heap).into_vec();
                let index = entries.iter().position(|e| e.message.header.id == id)?;
                let entry = entries.swap_remove(index);
                *heap = entries.into_iter().collect();
                Some(entry.message)
            }
        }?;
        self.bytes_in_queue = self
            .bytes_in_queue
            .saturating_sub(removed.payload.len() as u64);
        self.stats.total_messages = self.stats.total_messages.saturating_sub(1);
        self.stats.total_bytes = self
            .stats
            .total_bytes
            .saturating_sub(removed.payload.len() as u64);
        Some(removed)
    }

    /// Expired messages at the ready head and anywhere in the pending-ack
    /// map, removed and handed back for dead-lettering.
    pub fn take_expired(&mut self, now: u64) -> Vec<Message> {
        let mut expired = Vec::new();
        loop {
            let head_expired = match &self.ready {
                ReadyQueue::Fifo(queue) => queue.front().is_some_and(|m| m.is_expired(now)),
                ReadyQueue::Priority(heap) => {
                    heap.peek().is_some_and(|e| e.message.is_expired(now))
                }
            };
            if !head_expired {
                break;
            }
            let message = match &mut self.ready {
                ReadyQueue::Fifo(queue) => queue.pop_front(),
                ReadyQueue::Priority(heap) => heap.pop().map(|entry| entry.message),
            };
            if let Some(message) = message {
                self.bytes_in_queue = self
                    .bytes_in_queue
                    .saturating_sub(message.payload.len() as u64);
                expired.push(message);
            }
        }

        let expired_acks: Vec<MessageId> = self
            .pending_acks
            .iter()
            .filter(|(_, m)| m.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired_acks {
            if let Some(message) = self.pending_acks.remove(&id) {
                expired.push(message);
            }
        }
        expired
    }

    /// Rebuild the ready container after a priority-flag config change,
    /// preserving current contents.
    pub fn set_config(&mut self, config: QueueConfig) {
        if config.enable_priority != self.config.enable_priority {
            let drained: Vec<Message> = match &mut self.ready {
                ReadyQueue::Fifo(queue) => queue.drain(..).collect(),
                ReadyQueue::Priority(heap) => {
                    let mut entries: Vec<PrioEntry> = std::mem::take(heap).into_vec();
                    entries.sort_by(|a, b| b.cmp(a));
                    entries.into_iter().map(|entry| entry.message).collect()
                }
            };
            if config.enable_priority {
                let mut heap = BinaryHeap::new();
                for message in drained {
                    self.seq += 1;
                    heap.push(PrioEntry {
                        message,
                        seq: self.seq,
                    });
                }
                self.ready = ReadyQueue::Priority(heap);
            } else {
                self.ready = ReadyQueue::Fifo(drained.into());
            }
        }
        self.config = config;
    }

    pub fn purge(&mut self) {
        match &mut self.ready {
            ReadyQueue::Fifo(queue) => queue.clear(),
            ReadyQueue::Priority(heap) => heap.clear(),
        }
        self.pending_acks.clear();
        self.bytes_in_queue = 0;
    }

    pub fn stats_snapshot(&self) -> QueueStats {
        let mut stats = self.stats.clone();
        stats.pending_messages = self.ready.len() as u64;
        stats.active_consumers = self.consumers.len() as u32;
        stats.active_producers = self.producers.len() as u32;
        stats.average_latency_ms = if self.window.latency_ms.is_empty() {
            0.0
        } else {
            self.window.latency_ms.iter().sum::<f64>() / self.window.latency_ms.len() as f64
        };
        stats.throughput_per_second = self.metrics.dequeue_rate;
        stats
    }

    pub fn mark_dead_letter(
        &mut self,
        message: &mut Message,
        reason: DeadLetterReason,
        now: u64,
    ) {
        message.status = MessageStatus::DeadLetter;
        message.header.dead_letter_reason = reason;
        message.header.original_queue = self.config.name.clone();
        message.header.expire_time = if self.config.dead_letter_ttl_ms > 0 {
            now + self.config.dead_letter_ttl_ms
        } else {
            0
        };
        self.stats.dead_letter_messages += 1;
        if reason == DeadLetterReason::Expired {
            self.stats.expired_messages += 1;
        }
        if reason == DeadLetterReason::Rejected {
            self.stats.rejected_messages += 1;
        }
        self.dlq_stats.record(reason, now);
        self.window.record_dead_letter(now);
        self.refresh_dead_letter_rate();
    }

    fn refresh_dead_letter_rate(&mut self) {
        self.dlq_stats.dead_letter_rate = if self.stats.total_messages == 0 {
            0.0
        } else {
            self.dlq_stats.total_dead_letter_messages as f64 / self.stats.total_messages as f64
        };
    }
}

/// Evaluate a filter expression against a message. Terms are `key=value`
/// pairs joined by `&`; `type` matches the message type name, any other key
/// matches a header property. A bare key checks for property presence. The
/// empty expression matches everything.
pub(crate) fn matches_filter(filter: &str, message: &Message) -> bool {
    filter.split('&').all(|term| {
        let term = term.trim();
        if term.is_empty() {
            return true;
        }
        match term.split_once('=') {
            Some(("type", expected)) => message.header.message_type.as_str() == expected,
            Some((key, expected)) => message
                .header
                .properties
                .get(key)
                .is_some_and(|value| value == expected),
            None => message.header.properties.contains_key(term),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use message::MessagePriority;

    fn state(priority: bool) -> QueueState {
        let mut config = QueueConfig::new("q");
        config.enable_priority = priority;
        QueueState::new(config, 512)
    }

    fn message_with(id: MessageId, priority: MessagePriority, timestamp: u64) -> Message {
        let mut message = Message::text(format!("m{id}"));
        message.header.id = id;
        message.header.priority = priority;
        message.header.timestamp = timestamp;
        message
    }

    #[test]
    fn fifo_order() {
        let mut state = state(false);
        let now = now_ms();
        for id in 1..=3 {
            state.enqueue(message_with(id, MessagePriority::Normal, now), now);
        }
        let mut expired = Vec::new();
        let ids: Vec<MessageId> = (0..3)
            .filter_map(|_| state.dequeue(now, &mut expired).map(|m| m.header.id))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(expired.is_empty());
    }

    #[test]
    fn priority_order_with_timestamp_tiebreak() {
        let mut state = state(true);
        let now = now_ms();
        state.enqueue(message_with(1, MessagePriority::Low, now), now);
        state.enqueue(message_with(2, MessagePriority::High, now + 5), now);
        state.enqueue(message_with(3, MessagePriority::High, now + 1), now);
        state.enqueue(message_with(4, MessagePriority::Critical, now + 9), now);

        let mut expired = Vec::new();
        let ids: Vec<MessageId> = (0..4)
            .filter_map(|_| state.dequeue(now, &mut expired).map(|m| m.header.id))
            .collect();
        // Critical first, then the earlier of the two High messages.
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[test]
    fn expired_head_is_separated() {
        let mut state = state(false);
        let now = now_ms();
        let mut stale = message_with(1, MessagePriority::Normal, now);
        stale.header.expire_time = now.saturating_sub(1);
        state.enqueue(stale, now);
        state.enqueue(message_with(2, MessagePriority::Normal, now), now);

        let mut expired = Vec::new();
        let live = state.dequeue(now, &mut expired).unwrap();
        assert_eq!(live.header.id, 2);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].header.id, 1);
    }

    #[test]
    fn take_expired_covers_pending_acks() {
        let mut state = state(false);
        let now = now_ms();
        let mut stuck = message_with(9, MessagePriority::Normal, now);
        stuck.header.expire_time = now.saturating_sub(5);
        state.pending_acks.insert(9, stuck);
        let expired = state.take_expired(now);
        assert_eq!(expired.len(), 1);
        assert!(state.pending_acks.is_empty());
    }

    #[test]
    fn remove_ready_by_id() {
        let mut state = state(true);
        let now = now_ms();
        for id in 1..=3 {
            state.enqueue(message_with(id, MessagePriority::Normal, now + id), now);
        }
        assert!(state.remove_ready(2).is_some());
        assert!(state.remove_ready(2).is_none());
        assert_eq!(state.ready_len(), 2);
    }

    #[test]
    fn filter_terms() {
        let message = Message::text("x").with_property("region", "eu");
        assert!(matches_filter("", &message));
        assert!(matches_filter("region=eu", &message));
        assert!(matches_filter("type=TEXT&region=eu", &message));
        assert!(!matches_filter("region=us", &message));
        assert!(matches_filter("region", &message));
        assert!(!matches_filter("missing", &message));
    }

    #[test]
    fn config_flip_preserves_messages() {
        let mut state = state(false);
        let now = now_ms();
        for id in 1..=3 {
            state.enqueue(message_with(id, MessagePriority::Normal, now + id), now);
        }
        let mut config = state.config.clone();
        config.enable_priority = true;
        state.set_config(config);
        assert_eq!(state.ready_len(), 3);
        let mut expired = Vec::new();
        assert_eq!(state.dequeue(now, &mut expired).unwrap().header.id, 1);
    }
}
