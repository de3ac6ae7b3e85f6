use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use message::{now_ms, Message, QueueStats, TopicConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handlers::MessageHandler;

/// Per-subscriber dispatch depth. Overflow drops the delivery for that
/// subscriber only and bumps the topic's drop counter.
const SUBSCRIBER_CHANNEL_DEPTH: usize = 1024;

struct Subscriber {
    sender: mpsc::Sender<Message>,
    worker: tokio::task::JoinHandle<()>,
}

pub(crate) struct Topic {
    pub name: String,
    pub state: RwLock<TopicState>,
}

pub(crate) struct TopicState {
    pub config: TopicConfig,
    subscribers: HashMap<String, Subscriber>,
    /// Retained recent messages: `(message, payload bytes, publish time)`.
    retained: VecDeque<(Message, usize, u64)>,
    retained_bytes: u64,
    pub stats: QueueStats,
    pub dropped_deliveries: u64,
}

impl Topic {
    pub fn new(config: TopicConfig) -> Self {
        let name = config.name.clone();
        Topic {
            name,
            state: RwLock::new(TopicState {
                subscribers: HashMap::new(),
                retained: VecDeque::new(),
                retained_bytes: 0,
                stats: QueueStats {
                    created_time: now_ms(),
                    ..Default::default()
                },
                dropped_deliveries: 0,
                config,
            }),
        }
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .subscribers
            .keys()
            .cloned()
            .collect()
    }

    /// Register a subscriber and spawn its dispatch worker. Delivery is
    /// FIFO per subscriber; the worker drains a bounded channel so one slow
    /// handler never blocks the publisher or its peers. Re-subscribing an
    /// existing id replaces its handler.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        handler: MessageHandler,
        shutdown: CancellationToken,
    ) -> Result<(), message::QueueError> {
        {
            let state = self.state.read().unwrap();
            if state.subscribers.len() as u32 >= state.config.max_subscribers
                && !state.subscribers.contains_key(subscriber_id)
            {
                return Err(message::QueueError::ConsumerLimitExceeded(
                    self.name.clone(),
                ));
            }
        }
        let (sender, mut receiver) = mpsc::channel::<Message>(SUBSCRIBER_CHANNEL_DEPTH);
        let topic_name = self.name.clone();
        let worker_id = subscriber_id.to_string();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = receiver.recv() => {
                        let Some(message) = next else { break };
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            handler(message)
                        }));
                        if outcome.is_err() {
                            tracing::warn!(
                                topic = %topic_name,
                                subscriber = %worker_id,
                                "subscriber handler panicked; delivery dropped"
                            );
                        }
                    }
                }
            }
        });

        let mut state = self.state.write().unwrap();
        if let Some(previous) = state.subscribers.insert(
            subscriber_id.to_string(),
            Subscriber { sender, worker },
        ) {
            previous.worker.abort();
        }
        state.stats.active_subscribers = state.subscribers.len() as u32;
        Ok(())
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let removed = state.subscribers.remove(subscriber_id);
        state.stats.active_subscribers = state.subscribers.len() as u32;
        match removed {
            Some(subscriber) => {
                subscriber.worker.abort();
                true
            }
            None => false,
        }
    }

    /// Fan a message out to every current subscriber and retain it within
    /// the topic's retention bounds. Returns the number of deliveries that
    /// were accepted into subscriber channels.
    pub fn publish(&self, message: Message, now: u64) -> usize {
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        state.stats.total_messages += 1;
        state.stats.total_bytes += message.payload.len() as u64;
        state.stats.last_message_time = now;

        state.retain(message.clone(), now);

        let mut delivered = 0usize;
        let mut dropped = 0u64;
        for subscriber in state.subscribers.values() {
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dropped += 1,
            }
        }
        state.dropped_deliveries += dropped;
        state.stats.processed_messages += delivered as u64;
        tracing::trace!(
            topic = %self.name,
            delivered,
            dropped,
            retained = state.retained_len(),
            "published"
        );
        delivered
    }

    /// Whether the topic's allow-list admits this message type.
    pub fn allows(&self, type_name: &str) -> bool {
        let state = self.state.read().unwrap();
        state.config.allowed_message_types.is_empty()
            || state
                .config
                .allowed_message_types
                .iter()
                .any(|allowed| allowed == type_name)
    }

    pub fn shutdown(&self) {
        let mut state = self.state.write().unwrap();
        for (_, subscriber) in state.subscribers.drain() {
            subscriber.worker.abort();
        }
        state.stats.active_subscribers = 0;
    }
}

impl TopicState {
    fn retain(&mut self, message: Message, now: u64) {
        let bytes = message.payload.len();
        self.retained.push_back((message, bytes, now));
        self.retained_bytes += bytes as u64;

        let cutoff = now.saturating_sub(self.config.retention_ms);
        while let Some((_, front_bytes, ts)) = self.retained.front() {
            if *ts < cutoff || self.retained_bytes > self.config.retention_bytes {
                self.retained_bytes -= *front_bytes as u64;
                self.retained.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let topic = Topic::new(TopicConfig::new("events"));
        let token = CancellationToken::new();
        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(AtomicUsize::new(0));
        for (id, seen) in [("a", &seen_a), ("b", &seen_b)] {
            let seen = Arc::clone(seen);
            topic
                .subscribe(
                    id,
                    Arc::new(move |_| {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }),
                    token.clone(),
                )
                .unwrap();
        }

        assert_eq!(topic.publish(Message::text("hi"), now_ms()), 2);
        // Let the dispatch workers drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen_a.load(Ordering::SeqCst), 1);
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
        topic.shutdown();
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let topic = Topic::new(TopicConfig::new("events"));
        let token = CancellationToken::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        topic
            .subscribe(
                "a",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                token.clone(),
            )
            .unwrap();
        assert!(topic.unsubscribe("a"));
        assert!(!topic.unsubscribe("a"));
        assert_eq!(topic.publish(Message::text("hi"), now_ms()), 0);
    }

    #[tokio::test]
    async fn retention_is_byte_bounded() {
        let mut config = TopicConfig::new("events");
        config.retention_bytes = 10;
        let topic = Topic::new(config);
        let now = now_ms();
        for _ in 0..5 {
            topic.publish(Message::binary(vec![0u8; 4]), now);
        }
        let state = topic.state.read().unwrap();
        assert!(state.retained_len() <= 3);
    }

    #[tokio::test]
    async fn subscriber_limit_is_enforced() {
        let mut config = TopicConfig::new("small");
        config.max_subscribers = 1;
        let topic = Topic::new(config);
        let token = CancellationToken::new();
        topic
            .subscribe("a", Arc::new(|_| {}), token.clone())
            .unwrap();
        // Replacing an existing subscriber is allowed at the limit.
        topic
            .subscribe("a", Arc::new(|_| {}), token.clone())
            .unwrap();
        let err = topic.subscribe("b", Arc::new(|_| {}), token).unwrap_err();
        assert!(matches!(
            err,
            message::QueueError::ConsumerLimitExceeded(_)
        ));
        topic.shutdown();
    }

    #[test]
    fn type_allow_list() {
        let mut config = TopicConfig::new("combat");
        config.allowed_message_types = vec!["COMBAT_EVENT".to_string()];
        let topic = Topic::new(config);
        assert!(topic.allows("COMBAT_EVENT"));
        assert!(!topic.allows("TEXT"));
    }
}
