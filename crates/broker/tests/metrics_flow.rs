mod common;

use std::time::Duration;

use broker::message::{Message, QueueConfig};
use broker::pool::ZeroCopyBuffer;
use common::start_default_broker;

#[tokio::test]
async fn prometheus_body_covers_queue_and_tx_surface() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("dump_metrics")).unwrap();
    broker
        .send("dump_metrics", Message::text("hello"))
        .await
        .unwrap();

    let tx = broker.begin_transaction("metric", 5_000);
    broker
        .send_in_transaction(tx, "dump_metrics", Message::text("tx"))
        .unwrap();
    broker.commit_transaction(tx).await.unwrap();

    let body = broker.export_prometheus().unwrap();
    assert!(body.contains(r#"helianthus_queue_pending{queue="dump_metrics"}"#));
    assert!(body.contains(r#"helianthus_queue_total{queue="dump_metrics"} 2"#));
    assert!(body.contains("# TYPE helianthus_queue_total counter"));
    assert!(body.contains("# HELP helianthus_tx_total "));
    assert!(body.contains("helianthus_tx_total 1"));
    assert!(body.contains("helianthus_tx_committed 1"));
    assert!(body.contains("helianthus_zero_copy_duration_ms"));
    assert!(body.contains("helianthus_batch_duration_ms"));
    broker.shutdown().await;
}

#[tokio::test]
async fn batch_commit_enqueues_in_order_and_counts() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("bulk")).unwrap();

    let batch = broker.create_batch("bulk").unwrap();
    for index in 0..5 {
        broker
            .add_to_batch(batch, Message::text(format!("b{index}")))
            .unwrap();
    }
    let (queue, staged) = broker.batch_info(batch).unwrap();
    assert_eq!((queue.as_str(), staged), ("bulk", 5));

    broker.commit_batch(batch).await.unwrap();
    for index in 0..5 {
        let message = broker
            .receive("bulk", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(message.payload_string(), format!("b{index}"));
        broker.ack("bulk", message.header.id).unwrap();
    }

    let stats = broker.performance_stats();
    assert_eq!(stats.batch_operations, 1);
    let body = broker.export_prometheus().unwrap();
    assert!(body.contains(r#"helianthus_batch_commits_total{queue="bulk"} 1"#));
    assert!(body.contains(r#"helianthus_batch_messages_total{queue="bulk"} 5"#));
    broker.shutdown().await;
}

#[tokio::test]
async fn empty_batch_commit_still_records_a_sample() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("bulk")).unwrap();

    let batch = broker.create_batch("bulk").unwrap();
    broker.commit_batch(batch).await.unwrap();

    assert_eq!(broker.queue_stats("bulk").unwrap().total_messages, 0);
    assert_eq!(broker.performance_stats().batch_operations, 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn aborted_batches_vanish() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("bulk")).unwrap();
    let batch = broker.create_batch("bulk").unwrap();
    broker.add_to_batch(batch, Message::text("x")).unwrap();
    broker.abort_batch(batch).unwrap();

    assert!(broker.batch_info(batch).is_err());
    assert!(broker.commit_batch(batch).await.is_err());
    assert_eq!(broker.queue_stats("bulk").unwrap().total_messages, 0);
    broker.shutdown().await;
}

#[tokio::test]
async fn zero_copy_send_preserves_bytes() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("fast")).unwrap();

    let buffer = broker.create_zero_copy_buffer(b"wire-bytes".to_vec());
    broker.send_zero_copy("fast", buffer).await.unwrap();

    let message = broker
        .receive("fast", Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(message.payload.as_slice(), b"wire-bytes");

    let stats = broker.performance_stats();
    assert_eq!(stats.zero_copy_operations, 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn external_buffer_deallocator_runs_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static FREED: AtomicUsize = AtomicUsize::new(0);

    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("fast")).unwrap();

    let data = vec![7u8; 32].into_boxed_slice();
    let len = data.len();
    let addr = Box::into_raw(data) as *mut u8 as usize;
    let dealloc: Box<dyn FnOnce(*const u8, usize) + Send> = Box::new(move |_, _| {
        FREED.fetch_add(1, Ordering::SeqCst);
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                addr as *mut u8,
                len,
            )));
        }
    });
    let buffer = unsafe { ZeroCopyBuffer::from_raw(addr as *const u8, len, Some(dealloc)) };

    broker.send_zero_copy("fast", buffer).await.unwrap();
    let message = broker
        .receive("fast", Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(message.payload.len(), 32);
    assert_eq!(FREED.load(Ordering::SeqCst), 0);
    drop(message);
    broker.purge_queue("fast").unwrap();
    // The pending-ack copy was purged with the queue; the last reference is
    // gone and the deallocator has run exactly once.
    assert_eq!(FREED.load(Ordering::SeqCst), 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn sampler_publishes_rates_and_percentiles() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("sampled")).unwrap();

    for index in 0..10 {
        broker
            .send("sampled", Message::text(format!("m{index}")))
            .await
            .unwrap();
    }
    for _ in 0..10 {
        let message = broker
            .receive("sampled", Duration::from_millis(200))
            .await
            .unwrap();
        broker.ack("sampled", message.header.id).unwrap();
    }

    // Let the sampler tick at least once.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let metrics = broker.queue_metrics("sampled").unwrap();
    assert!(metrics.enqueue_rate > 0.0);
    assert!(metrics.dequeue_rate > 0.0);
    assert_eq!(metrics.total_messages, 10);
    assert_eq!(metrics.processed_messages, 10);
    assert!(metrics.timestamp > 0);
    broker.shutdown().await;
}

#[tokio::test]
async fn memory_pool_counters_flow_into_performance_stats() {
    let broker = start_default_broker();
    let pool = broker.memory_pool();
    {
        let _small = pool.allocate(64);
        let _large = pool.allocate(1 << 20);
    }
    let stats = broker.performance_stats();
    assert_eq!(stats.memory_pool_hits, 1);
    assert_eq!(stats.memory_pool_misses, 1);
    assert_eq!(stats.total_allocations, 2);
    assert_eq!(stats.total_deallocations, 2);
    assert!(stats.memory_pool_hit_rate > 0.4 && stats.memory_pool_hit_rate < 0.6);
    broker.shutdown().await;
}

#[tokio::test]
async fn global_stats_aggregate_queues() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("a")).unwrap();
    broker.create_queue(QueueConfig::new("b")).unwrap();
    broker.send("a", Message::text("1")).await.unwrap();
    broker.send("b", Message::text("2")).await.unwrap();
    broker.send("b", Message::text("3")).await.unwrap();

    let stats = broker.global_stats();
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.pending_messages, 3);
    broker.shutdown().await;
}

#[tokio::test]
async fn pubsub_topic_stats_and_retention() {
    let broker = start_default_broker();
    broker
        .create_topic(broker::message::TopicConfig::new("news"))
        .unwrap();

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    broker
        .subscribe(
            "news",
            "reader-1",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    for index in 0..3 {
        broker
            .publish("news", Message::text(format!("headline {index}")))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    let stats = broker.topic_stats("news").unwrap();
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.active_subscribers, 1);

    broker.unsubscribe("news", "reader-1").unwrap();
    assert!(broker
        .unsubscribe("news", "reader-1")
        .is_err());
    broker.shutdown().await;
}
