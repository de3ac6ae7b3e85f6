use message::{QueueError, QueueMetrics, QueueStats, TransactionStats};
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Per-queue values gathered for one scrape.
pub(crate) struct QueueExport {
    pub name: String,
    pub stats: QueueStats,
    pub metrics: QueueMetrics,
    pub batch_commits: u64,
    pub batch_messages: u64,
}

/// Everything one scrape needs, gathered from broker state up front so no
/// queue lock is held while encoding.
pub(crate) struct ExportSnapshot {
    pub queues: Vec<QueueExport>,
    pub zero_copy_duration_ms: f64,
    pub batch_duration_ms: f64,
    pub tx: TransactionStats,
}

fn internal(err: prometheus::Error) -> QueueError {
    QueueError::InternalError(format!("metrics encoding failed: {err}"))
}

/// Render the Prometheus text body. A fresh registry is populated per
/// scrape from the snapshot, which keeps counter values in lock-step with
/// broker state and emits the full `# HELP` / `# TYPE` header set.
pub(crate) fn render(snapshot: &ExportSnapshot) -> Result<String, QueueError> {
    let registry = Registry::new();
    let queue_label = &["queue"];

    macro_rules! gauge_vec {
        ($name:literal, $help:literal) => {{
            let vec = GaugeVec::new(Opts::new($name, $help), queue_label).map_err(internal)?;
            registry.register(Box::new(vec.clone())).map_err(internal)?;
            vec
        }};
    }
    macro_rules! counter_vec {
        ($name:literal, $help:literal) => {{
            let vec =
                IntCounterVec::new(Opts::new($name, $help), queue_label).map_err(internal)?;
            registry.register(Box::new(vec.clone())).map_err(internal)?;
            vec
        }};
    }
    macro_rules! scalar_gauge {
        ($name:literal, $help:literal) => {{
            let gauge =
                prometheus::Gauge::new($name, $help).map_err(internal)?;
            registry.register(Box::new(gauge.clone())).map_err(internal)?;
            gauge
        }};
    }
    macro_rules! scalar_counter {
        ($name:literal, $help:literal) => {{
            let counter =
                prometheus::IntCounter::new($name, $help).map_err(internal)?;
            registry.register(Box::new(counter.clone())).map_err(internal)?;
            counter
        }};
    }

    let pending = IntGaugeVec::new(
        Opts::new("helianthus_queue_pending", "Current pending messages per queue"),
        queue_label,
    )
    .map_err(internal)?;
    registry.register(Box::new(pending.clone())).map_err(internal)?;

    let total = counter_vec!("helianthus_queue_total", "Total messages enqueued per queue");
    let processed = counter_vec!(
        "helianthus_queue_processed",
        "Messages processed (dequeued and acknowledged) per queue"
    );
    let deadletter = counter_vec!(
        "helianthus_queue_deadletter",
        "Messages dead-lettered per queue"
    );
    let throughput = gauge_vec!(
        "helianthus_queue_throughput",
        "Messages per second through the queue"
    );
    let p50 = gauge_vec!(
        "helianthus_queue_latency_p50_ms",
        "P50 delivery latency per queue in milliseconds"
    );
    let p95 = gauge_vec!(
        "helianthus_queue_latency_p95_ms",
        "P95 delivery latency per queue in milliseconds"
    );
    let enqueue_rate = gauge_vec!(
        "helianthus_queue_enqueue_rate",
        "Enqueue rate per queue over the sliding window"
    );
    let dequeue_rate = gauge_vec!(
        "helianthus_queue_dequeue_rate",
        "Dequeue rate per queue over the sliding window"
    );
    let batch_commits = counter_vec!(
        "helianthus_batch_commits_total",
        "Total number of batch commits per queue"
    );
    let batch_messages = counter_vec!(
        "helianthus_batch_messages_total",
        "Total number of messages committed via batches per queue"
    );

    let zero_copy_duration = scalar_gauge!(
        "helianthus_zero_copy_duration_ms",
        "Average zero-copy duration in ms"
    );
    let batch_duration = scalar_gauge!(
        "helianthus_batch_duration_ms",
        "Average batch duration in ms"
    );

    let tx_total = scalar_counter!("helianthus_tx_total", "Total number of transactions");
    let tx_committed = scalar_counter!(
        "helianthus_tx_committed",
        "Total number of committed transactions"
    );
    let tx_rolled_back = scalar_counter!(
        "helianthus_tx_rolled_back",
        "Total number of rolled back transactions"
    );
    let tx_timeout = scalar_counter!(
        "helianthus_tx_timeout",
        "Total number of timed out transactions"
    );
    let tx_failed = scalar_counter!(
        "helianthus_tx_failed",
        "Total number of failed transactions"
    );
    let tx_success_rate = scalar_gauge!(
        "helianthus_tx_success_rate",
        "Committed transactions over total transactions"
    );
    let tx_avg_commit = scalar_gauge!(
        "helianthus_tx_avg_commit_ms",
        "Average transaction commit time in ms"
    );
    let tx_avg_rollback = scalar_gauge!(
        "helianthus_tx_avg_rollback_ms",
        "Average transaction rollback time in ms"
    );

    for queue in &snapshot.queues {
        let labels = &[queue.name.as_str()];
        pending
            .with_label_values(labels)
            .set(queue.stats.pending_messages as i64);
        total.with_label_values(labels).inc_by(queue.stats.total_messages);
        processed
            .with_label_values(labels)
            .inc_by(queue.stats.processed_messages);
        deadletter
            .with_label_values(labels)
            .inc_by(queue.stats.dead_letter_messages);
        throughput
            .with_label_values(labels)
            .set(queue.stats.throughput_per_second);
        p50.with_label_values(labels).set(queue.metrics.p50_latency_ms);
        p95.with_label_values(labels).set(queue.metrics.p95_latency_ms);
        enqueue_rate
            .with_label_values(labels)
            .set(queue.metrics.enqueue_rate);
        dequeue_rate
            .with_label_values(labels)
            .set(queue.metrics.dequeue_rate);
        batch_commits
            .with_label_values(labels)
            .inc_by(queue.batch_commits);
        batch_messages
            .with_label_values(labels)
            .inc_by(queue.batch_messages);
    }

    zero_copy_duration.set(snapshot.zero_copy_duration_ms);
    batch_duration.set(snapshot.batch_duration_ms);

    tx_total.inc_by(snapshot.tx.total_transactions);
    tx_committed.inc_by(snapshot.tx.committed_transactions);
    tx_rolled_back.inc_by(snapshot.tx.rolled_back_transactions);
    tx_timeout.inc_by(snapshot.tx.timeout_transactions);
    tx_failed.inc_by(snapshot.tx.failed_transactions);
    tx_success_rate.set(snapshot.tx.success_rate);
    tx_avg_commit.set(snapshot.tx.average_commit_time_ms);
    tx_avg_rollback.set(snapshot.tx.average_rollback_time_ms);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(internal)?;
    String::from_utf8(buffer)
        .map_err(|err| QueueError::InternalError(format!("metrics body not UTF-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ExportSnapshot {
        ExportSnapshot {
            queues: vec![QueueExport {
                name: "orders".to_string(),
                stats: QueueStats {
                    pending_messages: 3,
                    total_messages: 10,
                    processed_messages: 6,
                    dead_letter_messages: 1,
                    throughput_per_second: 2.5,
                    ..Default::default()
                },
                metrics: QueueMetrics {
                    queue_name: "orders".to_string(),
                    p50_latency_ms: 1.5,
                    p95_latency_ms: 9.0,
                    enqueue_rate: 0.5,
                    dequeue_rate: 0.4,
                    ..Default::default()
                },
                batch_commits: 2,
                batch_messages: 40,
            }],
            zero_copy_duration_ms: 0.25,
            batch_duration_ms: 1.75,
            tx: TransactionStats {
                total_transactions: 4,
                committed_transactions: 3,
                rolled_back_transactions: 1,
                success_rate: 0.75,
                average_commit_time_ms: 1.2,
                ..Default::default()
            },
        }
    }

    #[test]
    fn body_carries_the_full_name_surface() {
        let body = render(&snapshot()).unwrap();
        for name in [
            "helianthus_queue_pending",
            "helianthus_queue_total",
            "helianthus_queue_processed",
            "helianthus_queue_deadletter",
            "helianthus_queue_throughput",
            "helianthus_queue_latency_p50_ms",
            "helianthus_queue_latency_p95_ms",
            "helianthus_queue_enqueue_rate",
            "helianthus_queue_dequeue_rate",
            "helianthus_batch_commits_total",
            "helianthus_batch_messages_total",
            "helianthus_zero_copy_duration_ms",
            "helianthus_batch_duration_ms",
            "helianthus_tx_total",
            "helianthus_tx_committed",
            "helianthus_tx_rolled_back",
            "helianthus_tx_timeout",
            "helianthus_tx_failed",
            "helianthus_tx_success_rate",
            "helianthus_tx_avg_commit_ms",
            "helianthus_tx_avg_rollback_ms",
        ] {
            assert!(body.contains(&format!("# HELP {name} ")), "missing HELP for {name}");
            assert!(body.contains(&format!("# TYPE {name} ")), "missing TYPE for {name}");
        }
    }

    #[test]
    fn queue_label_and_values_render() {
        let body = render(&snapshot()).unwrap();
        assert!(body.contains(r#"helianthus_queue_pending{queue="orders"} 3"#));
        assert!(body.contains(r#"helianthus_queue_total{queue="orders"} 10"#));
        assert!(body.contains(r#"helianthus_batch_messages_total{queue="orders"} 40"#));
        assert!(body.contains("helianthus_tx_total 4"));
        assert!(body.contains("helianthus_tx_success_rate 0.75"));
    }

    #[test]
    fn counter_types_are_declared() {
        let body = render(&snapshot()).unwrap();
        assert!(body.contains("# TYPE helianthus_queue_total counter"));
        assert!(body.contains("# TYPE helianthus_tx_committed counter"));
        assert!(body.contains("# TYPE helianthus_queue_pending gauge"));
        assert!(body.contains("# TYPE helianthus_zero_copy_duration_ms gauge"));
    }
}
