use std::collections::HashMap;

use message::ShardId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    Leader,
    Follower,
    Candidate,
    Unknown,
}

impl Default for ReplicaRole {
    fn default() -> Self {
        ReplicaRole::Follower
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    /// True for the single-process simulation's local node.
    #[serde(default)]
    pub is_local: bool,
}

impl ClusterNode {
    pub fn new(node_id: impl Into<String>) -> Self {
        ClusterNode {
            node_id: node_id.into(),
            host: String::new(),
            port: 0,
            is_local: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub node_id: String,
    #[serde(default)]
    pub role: ReplicaRole,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

impl ReplicaInfo {
    pub fn leader(node_id: impl Into<String>) -> Self {
        ReplicaInfo {
            node_id: node_id.into(),
            role: ReplicaRole::Leader,
            healthy: true,
        }
    }

    pub fn follower(node_id: impl Into<String>) -> Self {
        ReplicaInfo {
            node_id: node_id.into(),
            role: ReplicaRole::Follower,
            healthy: true,
        }
    }
}

/// One shard and its ordered replica set. At most one replica is leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: ShardId,
    pub replicas: Vec<ReplicaInfo>,
}

impl ShardInfo {
    pub fn leader(&self) -> Option<&ReplicaInfo> {
        self.replicas
            .iter()
            .find(|r| r.role == ReplicaRole::Leader)
    }

    pub fn healthy_followers(&self) -> impl Iterator<Item = &ReplicaInfo> {
        self.replicas
            .iter()
            .filter(|r| r.role == ReplicaRole::Follower && r.healthy)
    }
}

/// Queue-to-shard pinning; queues absent from the map route via the ring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardAssignment {
    #[serde(default)]
    pub queue_to_shard: HashMap<String, ShardId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
    #[serde(default)]
    pub shards: Vec<ShardInfo>,
    #[serde(default)]
    pub assignment: ShardAssignment,
    /// Replica count including the leader.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
}

fn default_replication_factor() -> u32 {
    1
}

impl ClusterConfig {
    /// A single-node, single-shard layout; the broker's default before any
    /// explicit configuration.
    pub fn single_node(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        ClusterConfig {
            nodes: vec![ClusterNode::new(node_id.clone())],
            shards: vec![ShardInfo {
                id: 0,
                replicas: vec![ReplicaInfo::leader(node_id)],
            }],
            assignment: ShardAssignment::default(),
            replication_factor: 1,
        }
    }

    pub fn shard(&self, id: ShardId) -> Option<&ShardInfo> {
        self.shards.iter().find(|s| s.id == id)
    }
}
