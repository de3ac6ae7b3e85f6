use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use message::{now_ms, MessageId, ShardId};

/// One ordered record of an applied send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub index: u64,
    pub message_id: MessageId,
    pub queue: String,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
struct ShardWal {
    entries: Vec<WalEntry>,
    next_index: u64,
    follower_applied: HashMap<String, u64>,
}

/// Per-shard in-memory write-ahead log with follower apply cursors.
///
/// Indices are strictly monotonic per shard, starting at 1. Replication is
/// simulated: an append immediately advances the cursor of every currently
/// healthy follower and reports that count as acknowledgements.
#[derive(Debug, Default)]
pub struct ReplicationLog {
    shards: RwLock<Vec<ShardWal>>,
    events: AtomicU64,
    acks_total: AtomicU64,
}

impl ReplicationLog {
    pub fn new(shard_count: usize) -> Self {
        let log = ReplicationLog::default();
        log.resize(shard_count);
        log
    }

    /// Grow (never shrink) to cover `shard_count` shards; existing entries
    /// and cursors are preserved across cluster reconfiguration.
    pub fn resize(&self, shard_count: usize) {
        let mut shards = self.shards.write().unwrap();
        while shards.len() < shard_count.max(1) {
            shards.push(ShardWal::default());
        }
    }

    /// Append one entry and propagate to `healthy_followers`. Returns the
    /// assigned index and the acknowledgement count.
    pub fn append(
        &self,
        shard: ShardId,
        message_id: MessageId,
        queue: &str,
        healthy_followers: &[String],
    ) -> (u64, u32) {
        let mut shards = self.shards.write().unwrap();
        let slot = shard as usize;
        if slot >= shards.len() {
            shards.resize_with(slot + 1, ShardWal::default);
        }
        let wal = &mut shards[slot];
        wal.next_index += 1;
        let index = wal.next_index;
        wal.entries.push(WalEntry {
            index,
            message_id,
            queue: queue.to_string(),
            timestamp: now_ms(),
        });
        let mut acks = 0u32;
        for follower in healthy_followers {
            wal.follower_applied.insert(follower.clone(), index);
            acks += 1;
        }
        drop(shards);

        self.events.fetch_add(1, Ordering::Relaxed);
        self.acks_total.fetch_add(acks as u64, Ordering::Relaxed);
        (index, acks)
    }

    pub fn last_index(&self, shard: ShardId) -> u64 {
        let shards = self.shards.read().unwrap();
        shards
            .get(shard as usize)
            .map(|w| w.next_index)
            .unwrap_or(0)
    }

    pub fn follower_cursor(&self, shard: ShardId, node_id: &str) -> Option<u64> {
        let shards = self.shards.read().unwrap();
        shards
            .get(shard as usize)
            .and_then(|w| w.follower_applied.get(node_id).copied())
    }

    pub fn entries(&self, shard: ShardId) -> Vec<WalEntry> {
        let shards = self.shards.read().unwrap();
        shards
            .get(shard as usize)
            .map(|w| w.entries.clone())
            .unwrap_or_default()
    }

    /// (replication_events, replication_acks_total).
    pub fn counters(&self) -> (u64, u64) {
        (
            self.events.load(Ordering::Relaxed),
            self.acks_total.load(Ordering::Relaxed),
        )
    }
}
