//! Cluster layer: shard topology, consistent-hash routing, leader/follower
//! health tracking, and the per-shard replication log.
//!
//! Replication is simulated in-process: an append counts currently healthy
//! followers as acknowledgements and advances their apply cursors. The
//! broker's send path gates on those ack counts.

mod ring;
mod router;
mod topology;
mod wal;

pub use ring::HashRing;
pub use router::{
    ClusterRouter, FailoverEvent, FailoverHandler, LeaderChangeEvent, LeaderChangeHandler,
};
pub use topology::{
    ClusterConfig, ClusterNode, ReplicaInfo, ReplicaRole, ShardAssignment, ShardInfo,
};
pub use wal::{ReplicationLog, WalEntry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("shard {0} not found")]
    ShardNotFound(u32),
    #[error("node '{0}' not found")]
    NodeNotFound(String),
    #[error("cluster has no nodes configured")]
    EmptyTopology,
    #[error("invalid cluster config: {0}")]
    InvalidConfig(String),
}
