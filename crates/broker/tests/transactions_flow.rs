mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker::message::{Message, QueueConfig, QueueError};
use broker::TransactionStatus;
use common::start_default_broker;

#[tokio::test]
async fn commit_makes_staged_sends_visible() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();

    let tx = broker.begin_transaction("commit_flow", 5_000);
    assert!(tx > 0);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("HelloTx"))
        .unwrap();

    // Nothing visible before commit.
    assert_eq!(
        broker
            .receive("tx_demo", Duration::from_millis(100))
            .await
            .unwrap_err(),
        QueueError::Timeout
    );

    broker.commit_transaction(tx).await.unwrap();
    let message = broker
        .receive("tx_demo", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(message.payload_string(), "HelloTx");

    let stats = broker.transaction_stats();
    assert!(stats.total_transactions >= 1);
    assert!(stats.committed_transactions >= 1);
    assert_eq!(
        broker.transaction_status(tx).unwrap(),
        TransactionStatus::Committed
    );
    broker.shutdown().await;
}

#[tokio::test]
async fn rollback_discards_staged_sends() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();

    let rolled_back = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&rolled_back);
    broker.set_transaction_rollback_handler(Arc::new(move |_, reason| {
        assert_eq!(reason, "test");
        seen.store(true, Ordering::SeqCst);
    }));

    let tx = broker.begin_transaction("rollback_flow", 5_000);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("m1"))
        .unwrap();
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("m2"))
        .unwrap();
    broker.rollback_transaction(tx, "test").await.unwrap();

    assert_eq!(
        broker
            .receive("tx_demo", Duration::from_millis(100))
            .await
            .unwrap_err(),
        QueueError::Timeout
    );
    let stats = broker.transaction_stats();
    assert!(stats.rolled_back_transactions >= 1);
    assert!(stats.total_transactions >= 1);
    assert!(rolled_back.load(Ordering::SeqCst));
    broker.shutdown().await;
}

#[tokio::test]
async fn double_commit_is_invalid_state() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();
    let tx = broker.begin_transaction("", 5_000);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("once"))
        .unwrap();
    broker.commit_transaction(tx).await.unwrap();
    assert!(matches!(
        broker.commit_transaction(tx).await.unwrap_err(),
        QueueError::InvalidState(_)
    ));

    // Same for rollback after commit.
    assert!(matches!(
        broker.rollback_transaction(tx, "late").await.unwrap_err(),
        QueueError::InvalidState(_)
    ));
    broker.shutdown().await;
}

#[tokio::test]
async fn transactional_ack_applies_on_commit() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();
    broker.send("tx_demo", Message::text("AckMe")).await.unwrap();
    let message = broker
        .receive("tx_demo", Duration::from_millis(500))
        .await
        .unwrap();

    let tx = broker.begin_transaction("ack_flow", 5_000);
    broker
        .ack_in_transaction(tx, "tx_demo", message.header.id)
        .unwrap();
    broker.commit_transaction(tx).await.unwrap();

    // Already acknowledged through the transaction.
    assert!(matches!(
        broker.ack("tx_demo", message.header.id).unwrap_err(),
        QueueError::InvalidState(_)
    ));
    assert_eq!(broker.queue_stats("tx_demo").unwrap().processed_messages, 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn failed_commit_undoes_partial_application() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("roomy")).unwrap();
    let mut tight = QueueConfig::new("tight");
    tight.max_size = 0;
    broker.create_queue(tight).unwrap();

    let tx = broker.begin_transaction("atomic", 5_000);
    broker
        .send_in_transaction(tx, "roomy", Message::text("first"))
        .unwrap();
    broker
        .send_in_transaction(tx, "tight", Message::text("second"))
        .unwrap();

    let err = broker.commit_transaction(tx).await.unwrap_err();
    assert_eq!(err, QueueError::QueueFull("tight".to_string()));
    assert_eq!(
        broker.transaction_status(tx).unwrap(),
        TransactionStatus::Failed
    );

    // The send to `roomy` was undone.
    assert_eq!(
        broker
            .receive("roomy", Duration::from_millis(100))
            .await
            .unwrap_err(),
        QueueError::Timeout
    );
    assert!(broker.transaction_stats().failed_transactions >= 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn transaction_times_out_via_sweeper() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();

    let timeouts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&timeouts);
    broker.set_transaction_timeout_handler(Arc::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let tx = broker.begin_transaction("slow", 100);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("late"))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        broker.transaction_status(tx).unwrap(),
        TransactionStatus::Timeout
    );
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert!(matches!(
        broker.commit_transaction(tx).await.unwrap_err(),
        QueueError::InvalidState(_)
    ));
    assert_eq!(
        broker
            .receive("tx_demo", Duration::from_millis(100))
            .await
            .unwrap_err(),
        QueueError::Timeout
    );
    broker.shutdown().await;
}

#[tokio::test]
async fn transactional_queue_creation_and_deletion() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("old")).unwrap();

    let tx = broker.begin_transaction("ddl", 5_000);
    broker
        .create_queue_in_transaction(tx, QueueConfig::new("fresh"))
        .unwrap();
    broker.delete_queue_in_transaction(tx, "old").unwrap();
    assert!(!broker.queue_exists("fresh"));
    assert!(broker.queue_exists("old"));

    broker.commit_transaction(tx).await.unwrap();
    assert!(broker.queue_exists("fresh"));
    assert!(!broker.queue_exists("old"));
    broker.shutdown().await;
}

#[tokio::test]
async fn two_phase_commit_requires_prepare() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();

    let tx = broker.begin_distributed_transaction("coordinator-1", "2pc", 5_000);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("vote"))
        .unwrap();

    // Commit before prepare is an invalid transition.
    assert!(matches!(
        broker.commit_distributed_transaction(tx).await.unwrap_err(),
        QueueError::InvalidState(_)
    ));

    broker.prepare_transaction(tx).unwrap();
    // Prepare is idempotent.
    broker.prepare_transaction(tx).unwrap();
    broker.commit_distributed_transaction(tx).await.unwrap();

    let message = broker
        .receive("tx_demo", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(message.payload_string(), "vote");

    let info = broker.transaction_info(tx).unwrap();
    assert!(info.is_distributed);
    assert_eq!(info.coordinator_id, "coordinator-1");
    broker.shutdown().await;
}

#[tokio::test]
async fn distributed_rollback_is_valid_from_prepared() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();
    let tx = broker.begin_distributed_transaction("coordinator-1", "2pc", 5_000);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("x"))
        .unwrap();
    broker.prepare_transaction(tx).unwrap();
    broker
        .rollback_distributed_transaction(tx, "coordinator abort")
        .await
        .unwrap();
    assert_eq!(
        broker.transaction_status(tx).unwrap(),
        TransactionStatus::RolledBack
    );
    broker.shutdown().await;
}

#[tokio::test]
async fn commit_callback_reports_success() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("tx_demo")).unwrap();

    let committed = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&committed);
    broker.set_transaction_commit_handler(Arc::new(move |_, success, _| {
        assert!(success);
        seen.store(true, Ordering::SeqCst);
    }));

    let tx = broker.begin_transaction("cb", 5_000);
    broker
        .send_in_transaction(tx, "tx_demo", Message::text("x"))
        .unwrap();
    broker.commit_transaction(tx).await.unwrap();
    assert!(committed.load(Ordering::SeqCst));
    broker.shutdown().await;
}
