mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker::cluster::{
    ClusterConfig, ClusterNode, ReplicaInfo, ShardAssignment, ShardInfo,
};
use broker::message::{properties, Message, QueueConfig, QueueError};
use common::{start_broker, start_default_broker, test_config};

fn two_node_cluster() -> ClusterConfig {
    ClusterConfig {
        nodes: vec![ClusterNode::new("node-a"), ClusterNode::new("node-b")],
        shards: vec![
            ShardInfo {
                id: 0,
                replicas: vec![
                    ReplicaInfo::leader("node-a"),
                    ReplicaInfo::follower("node-b"),
                ],
            },
            ShardInfo {
                id: 1,
                replicas: vec![
                    ReplicaInfo::leader("node-b"),
                    ReplicaInfo::follower("node-a"),
                ],
            },
        ],
        assignment: ShardAssignment::default(),
        replication_factor: 2,
    }
}

#[tokio::test]
async fn failover_reroutes_partition_keys() {
    let broker = start_default_broker();
    broker.set_cluster_config(two_node_cluster()).unwrap();
    broker.create_queue(QueueConfig::new("events")).unwrap();

    let failovers = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&failovers);
    broker.set_failover_handler(Arc::new(move |event| {
        seen.lock().unwrap().push(event.failed_leader.clone());
    }));
    let leader_changes = Arc::new(AtomicUsize::new(0));
    let change_count = Arc::clone(&leader_changes);
    broker.set_leader_change_handler(Arc::new(move |_| {
        change_count.fetch_add(1, Ordering::SeqCst);
    }));

    // Alternate partition keys across the shards.
    for index in 0..6 {
        let key = format!("user_{}", index % 2);
        broker
            .send(
                "events",
                Message::text(format!("m{index}")).with_property(properties::PARTITION_KEY, key),
            )
            .await
            .unwrap();
    }

    broker.set_node_health("node-b", false).unwrap();
    assert_eq!(failovers.lock().unwrap().as_slice(), &["node-b".to_string()]);
    assert!(leader_changes.load(Ordering::SeqCst) >= 1);

    // Every partition key now routes to a healthy node.
    for key in ["user_0", "user_1"] {
        let (_, node) = broker.shard_for_key(key).unwrap();
        assert_eq!(node, "node-a");
        broker
            .send(
                "events",
                Message::text("post-failover").with_property(properties::PARTITION_KEY, key),
            )
            .await
            .unwrap();
    }
    broker.shutdown().await;
}

#[tokio::test]
async fn wal_appends_per_send_and_tracks_followers() {
    let broker = start_default_broker();
    broker.set_cluster_config(two_node_cluster()).unwrap();
    broker.create_queue(QueueConfig::new("events")).unwrap();

    for index in 0..4 {
        broker
            .send(
                "events",
                Message::text(format!("m{index}"))
                    .with_property(properties::PARTITION_KEY, "user_0"),
            )
            .await
            .unwrap();
    }

    let (shard, _) = broker.shard_for_key("user_0").unwrap();
    assert_eq!(broker.wal_last_index(shard), 4);
    let follower = if broker.current_leader(shard).unwrap() == "node-a" {
        "node-b"
    } else {
        "node-a"
    };
    assert_eq!(broker.wal_follower_cursor(shard, follower), Some(4));

    let (events, acks) = broker.replication_counters();
    assert_eq!(events, 4);
    assert_eq!(acks, 4);
    broker.shutdown().await;
}

#[tokio::test]
async fn send_blocks_on_missing_replication_acks() {
    let broker = start_broker(test_config());
    broker.set_cluster_config(two_node_cluster()).unwrap();
    broker.create_queue(QueueConfig::new("events")).unwrap();
    broker
        .set_global_config("cluster.min_replication_acks", "1")
        .unwrap();

    // Healthy follower: the ack requirement is satisfiable.
    broker
        .send(
            "events",
            Message::text("ok").with_property(properties::PARTITION_KEY, "user_0"),
        )
        .await
        .unwrap();

    // Knock out every follower for this key's shard.
    let (shard, _) = broker.shard_for_key("user_0").unwrap();
    let leader = broker.current_leader(shard).unwrap();
    let follower = if leader == "node-a" { "node-b" } else { "node-a" };
    broker.set_node_health(follower, false).unwrap();

    let err = broker
        .send(
            "events",
            Message::text("stuck").with_property(properties::PARTITION_KEY, "user_0"),
        )
        .await
        .unwrap_err();
    assert_eq!(err, QueueError::Timeout);

    // Recovery unblocks the path again.
    broker.set_node_health(follower, true).unwrap();
    broker
        .send(
            "events",
            Message::text("resumed").with_property(properties::PARTITION_KEY, "user_0"),
        )
        .await
        .unwrap();
    broker.shutdown().await;
}

#[tokio::test]
async fn explicit_queue_assignment_pins_the_shard() {
    let broker = start_default_broker();
    let mut config = two_node_cluster();
    config
        .assignment
        .queue_to_shard
        .insert("pinned".to_string(), 1);
    broker.set_cluster_config(config).unwrap();

    let (shard, node) = broker.shard_for_key("pinned").unwrap();
    assert_eq!(shard, 1);
    assert_eq!(node, "node-b");
    broker.shutdown().await;
}

#[tokio::test]
async fn promote_and_demote_change_leadership() {
    let broker = start_default_broker();
    broker.set_cluster_config(two_node_cluster()).unwrap();

    broker.promote_to_leader(0, "node-b").unwrap();
    assert_eq!(broker.current_leader(0).unwrap(), "node-b");

    let statuses = broker.cluster_shard_statuses();
    let shard0 = statuses.iter().find(|s| s.id == 0).unwrap();
    assert_eq!(shard0.leader().unwrap().node_id, "node-b");

    broker.demote_to_follower(0, "node-b").unwrap();
    assert!(broker.current_leader(0).is_err());
    broker.shutdown().await;
}

#[tokio::test]
async fn replica_listing_and_bad_nodes() {
    let broker = start_default_broker();
    broker.set_cluster_config(two_node_cluster()).unwrap();

    let replicas = broker.shard_replicas(0).unwrap();
    assert_eq!(replicas.len(), 2);
    assert!(broker.shard_replicas(9).is_err());
    assert!(broker.set_node_health("node-z", false).is_err());
    broker.shutdown().await;
}
