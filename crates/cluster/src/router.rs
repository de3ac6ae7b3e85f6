use std::sync::{Arc, Mutex, RwLock};

use message::ShardId;
use tokio::sync::Notify;

use crate::ring::HashRing;
use crate::topology::{ClusterConfig, ReplicaRole, ShardInfo};
use crate::ClusterError;

/// A leader transition observed on a shard.
#[derive(Debug, Clone)]
pub struct LeaderChangeEvent {
    pub shard: ShardId,
    pub old_leader: String,
    pub new_leader: String,
}

/// A forced takeover after a leader went unhealthy.
#[derive(Debug, Clone)]
pub struct FailoverEvent {
    pub shard: ShardId,
    pub failed_leader: String,
    pub takeover_node: String,
}

pub type LeaderChangeHandler = Arc<dyn Fn(LeaderChangeEvent) + Send + Sync>;
pub type FailoverHandler = Arc<dyn Fn(FailoverEvent) + Send + Sync>;

struct RouterState {
    config: ClusterConfig,
    ring: HashRing,
}

/// Routes queue keys to shards and nodes, and tracks replica health and
/// leadership. Health transitions that orphan a leader promote the first
/// healthy follower and fire the registered callbacks.
pub struct ClusterRouter {
    state: RwLock<RouterState>,
    virtual_nodes: u32,
    /// Woken on any topology or health change; the send path waits on this
    /// while gating on replication acks.
    change: Notify,
    leader_change_handler: Mutex<Option<LeaderChangeHandler>>,
    failover_handler: Mutex<Option<FailoverHandler>>,
}

impl ClusterRouter {
    pub fn new(config: ClusterConfig, virtual_nodes: u32) -> Self {
        let mut ring = HashRing::new(virtual_nodes);
        ring.rebuild(config.nodes.iter().map(|n| n.node_id.as_str()));
        ClusterRouter {
            state: RwLock::new(RouterState { config, ring }),
            virtual_nodes,
            change: Notify::new(),
            leader_change_handler: Mutex::new(None),
            failover_handler: Mutex::new(None),
        }
    }

    pub fn set_config(&self, config: ClusterConfig) -> Result<(), ClusterError> {
        if config.nodes.is_empty() {
            return Err(ClusterError::EmptyTopology);
        }
        for shard in &config.shards {
            let leaders = shard
                .replicas
                .iter()
                .filter(|r| r.role == ReplicaRole::Leader)
                .count();
            if leaders > 1 {
                return Err(ClusterError::InvalidConfig(format!(
                    "shard {} has {leaders} leaders",
                    shard.id
                )));
            }
        }
        let mut state = self.state.write().unwrap();
        let mut ring = HashRing::new(self.virtual_nodes);
        ring.rebuild(config.nodes.iter().map(|n| n.node_id.as_str()));
        tracing::info!(
            nodes = config.nodes.len(),
            shards = config.shards.len(),
            "cluster config updated, ring rebuilt"
        );
        state.config = config;
        state.ring = ring;
        drop(state);
        self.change.notify_waiters();
        Ok(())
    }

    pub fn config(&self) -> ClusterConfig {
        self.state.read().unwrap().config.clone()
    }

    /// Resolve a routing key to `(shard, node)`. Explicit queue assignments
    /// win; unmapped keys derive the shard from the ring position.
    pub fn shard_for_key(&self, key: &str) -> Result<(ShardId, String), ClusterError> {
        let state = self.state.read().unwrap();
        let shard_count = state.config.shards.len().max(1) as u64;

        if let Some(&shard) = state.config.assignment.queue_to_shard.get(key) {
            let node = state
                .config
                .shard(shard)
                .and_then(|s| s.leader())
                .map(|r| r.node_id.clone())
                .ok_or(ClusterError::ShardNotFound(shard))?;
            return Ok((shard, node));
        }

        let (node, hash) = state.ring.node_for_key(key).ok_or(ClusterError::EmptyTopology)?;
        let shard = (hash % shard_count) as ShardId;
        // Prefer the shard leader when it is healthy; otherwise fall back to
        // the ring-selected node.
        let node = state
            .config
            .shard(shard)
            .and_then(|s| s.leader())
            .filter(|r| r.healthy)
            .map(|r| r.node_id.clone())
            .unwrap_or_else(|| node.to_string());
        Ok((shard, node))
    }

    pub fn replicas(&self, shard: ShardId) -> Result<Vec<crate::ReplicaInfo>, ClusterError> {
        let state = self.state.read().unwrap();
        state
            .config
            .shard(shard)
            .map(|s| s.replicas.clone())
            .ok_or(ClusterError::ShardNotFound(shard))
    }

    pub fn shard_statuses(&self) -> Vec<ShardInfo> {
        self.state.read().unwrap().config.shards.clone()
    }

    pub fn current_leader(&self, shard: ShardId) -> Result<String, ClusterError> {
        let state = self.state.read().unwrap();
        state
            .config
            .shard(shard)
            .ok_or(ClusterError::ShardNotFound(shard))?
            .leader()
            .map(|r| r.node_id.clone())
            .ok_or_else(|| ClusterError::NodeNotFound("no leader".to_string()))
    }

    /// Healthy followers of a shard; the simulated replication ack set.
    pub fn healthy_followers(&self, shard: ShardId) -> Vec<String> {
        let state = self.state.read().unwrap();
        state
            .config
            .shard(shard)
            .map(|s| {
                s.healthy_followers()
                    .map(|r| r.node_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark every replica hosted on `node_id`. A leader going unhealthy
    /// promotes the first healthy follower on each affected shard and fires
    /// the leader-change and failover callbacks.
    pub fn set_node_health(&self, node_id: &str, healthy: bool) -> Result<(), ClusterError> {
        let mut leader_changes = Vec::new();
        let mut failovers = Vec::new();
        {
            let mut state = self.state.write().unwrap();
            if !state.config.nodes.iter().any(|n| n.node_id == node_id) {
                return Err(ClusterError::NodeNotFound(node_id.to_string()));
            }
            for shard in &mut state.config.shards {
                let mut demoted_leader: Option<String> = None;
                for replica in &mut shard.replicas {
                    if replica.node_id != node_id {
                        continue;
                    }
                    replica.healthy = healthy;
                    if !healthy && replica.role == ReplicaRole::Leader {
                        replica.role = ReplicaRole::Follower;
                        demoted_leader = Some(replica.node_id.clone());
                    }
                }
                if let Some(old_leader) = demoted_leader {
                    if let Some(successor) = shard
                        .replicas
                        .iter_mut()
                        .find(|r| r.healthy && r.role == ReplicaRole::Follower && r.node_id != old_leader)
                    {
                        successor.role = ReplicaRole::Leader;
                        let new_leader = successor.node_id.clone();
                        tracing::info!(
                            shard = shard.id,
                            %old_leader,
                            %new_leader,
                            "leader failover"
                        );
                        leader_changes.push(LeaderChangeEvent {
                            shard: shard.id,
                            old_leader: old_leader.clone(),
                            new_leader: new_leader.clone(),
                        });
                        failovers.push(FailoverEvent {
                            shard: shard.id,
                            failed_leader: old_leader,
                            takeover_node: new_leader,
                        });
                    } else {
                        tracing::warn!(shard = shard.id, %old_leader, "leader lost with no healthy follower");
                    }
                }
            }
        }
        self.change.notify_waiters();
        self.dispatch(leader_changes, failovers);
        Ok(())
    }

    pub fn promote_to_leader(&self, shard: ShardId, node_id: &str) -> Result<(), ClusterError> {
        let mut leader_changes = Vec::new();
        {
            let mut state = self.state.write().unwrap();
            let shard_info = state
                .config
                .shards
                .iter_mut()
                .find(|s| s.id == shard)
                .ok_or(ClusterError::ShardNotFound(shard))?;
            if !shard_info.replicas.iter().any(|r| r.node_id == node_id) {
                return Err(ClusterError::NodeNotFound(node_id.to_string()));
            }
            let old_leader = shard_info
                .leader()
                .map(|r| r.node_id.clone())
                .unwrap_or_default();
            if old_leader == node_id {
                return Ok(());
            }
            for replica in &mut shard_info.replicas {
                replica.role = if replica.node_id == node_id {
                    ReplicaRole::Leader
                } else if replica.role == ReplicaRole::Leader {
                    ReplicaRole::Follower
                } else {
                    replica.role
                };
            }
            leader_changes.push(LeaderChangeEvent {
                shard,
                old_leader,
                new_leader: node_id.to_string(),
            });
        }
        self.change.notify_waiters();
        self.dispatch(leader_changes, Vec::new());
        Ok(())
    }

    pub fn demote_to_follower(&self, shard: ShardId, node_id: &str) -> Result<(), ClusterError> {
        let mut state = self.state.write().unwrap();
        let shard_info = state
            .config
            .shards
            .iter_mut()
            .find(|s| s.id == shard)
            .ok_or(ClusterError::ShardNotFound(shard))?;
        let replica = shard_info
            .replicas
            .iter_mut()
            .find(|r| r.node_id == node_id)
            .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))?;
        replica.role = ReplicaRole::Follower;
        drop(state);
        self.change.notify_waiters();
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state.config.nodes.iter().map(|n| n.node_id.clone()).collect()
    }

    pub fn node_health(&self, node_id: &str) -> Option<bool> {
        let state = self.state.read().unwrap();
        // A node is healthy when every replica it hosts is healthy.
        let mut seen = false;
        for shard in &state.config.shards {
            for replica in &shard.replicas {
                if replica.node_id == node_id {
                    seen = true;
                    if !replica.healthy {
                        return Some(false);
                    }
                }
            }
        }
        seen.then_some(true)
    }

    pub fn set_leader_change_handler(&self, handler: LeaderChangeHandler) {
        *self.leader_change_handler.lock().unwrap() = Some(handler);
    }

    pub fn set_failover_handler(&self, handler: FailoverHandler) {
        *self.failover_handler.lock().unwrap() = Some(handler);
    }

    /// Wait for the next topology or health change.
    pub async fn changed(&self) {
        self.change.notified().await;
    }

    fn dispatch(&self, leader_changes: Vec<LeaderChangeEvent>, failovers: Vec<FailoverEvent>) {
        // Callbacks run without any router lock held.
        let leader_handler = self.leader_change_handler.lock().unwrap().clone();
        if let Some(handler) = leader_handler {
            for event in leader_changes {
                handler(event);
            }
        }
        let failover_handler = self.failover_handler.lock().unwrap().clone();
        if let Some(handler) = failover_handler {
            for event in failovers {
                handler(event);
            }
        }
    }
}
