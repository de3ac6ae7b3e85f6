use std::sync::Arc;
use std::time::Duration;

use message::now_ms;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::alerts::AlertType;
use crate::broker::{Broker, BrokerCore, EnqueueOptions};
use crate::monitor::DeadLetterObservation;
use crate::queue::MetricsWindow;
use crate::scheduler::ScheduledEntry;

fn broker_from(core: &Arc<BrokerCore>) -> Broker {
    Broker {
        core: Arc::clone(core),
    }
}

/// Scheduler task: drain due entries, dispatch through the send path, and
/// sleep until the next due time bounded by `scheduler.tick_ms`.
pub(crate) async fn run_scheduler(core: Arc<BrokerCore>) {
    let broker = broker_from(&core);
    loop {
        let now = now_ms();
        for entry in core.scheduler.take_due(now) {
            dispatch_entry(&broker, &core, entry).await;
        }

        let tick_ms = core.config.read().unwrap().scheduler_tick_ms.max(1);
        let sleep_ms = core
            .scheduler
            .next_due()
            .map(|due| due.saturating_sub(now_ms()).min(tick_ms))
            .unwrap_or(tick_ms)
            .max(1);
        tokio::select! {
            _ = core.shutdown_token.cancelled() => break,
            _ = core.scheduler.notify.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
        }
    }
    tracing::debug!("scheduler task stopped");
}

async fn dispatch_entry(broker: &Broker, core: &Arc<BrokerCore>, entry: ScheduledEntry) {
    match entry {
        ScheduledEntry::Delayed { queue, message } => {
            if let Err(err) = broker
                .enqueue_message(&queue, message, EnqueueOptions::scheduled())
                .await
            {
                core.handlers.emit_error(&err, "dispatching delayed message");
            }
        }
        ScheduledEntry::Retry { queue, message } => {
            if let Err(err) = broker
                .enqueue_message(&queue, message, EnqueueOptions::retry())
                .await
            {
                core.handlers.emit_error(&err, "re-enqueueing rejected message");
            }
        }
        ScheduledEntry::Recurring {
            queue,
            template,
            interval_ms,
            remaining,
        } => {
            let mut occurrence = template.clone();
            occurrence.header.id = 0;
            if let Err(err) = broker
                .enqueue_message(&queue, occurrence, EnqueueOptions::send())
                .await
            {
                core.handlers.emit_error(&err, "dispatching recurring message");
            }
            let remaining = match remaining {
                Some(1) => return,
                Some(count) => Some(count - 1),
                None => None,
            };
            core.scheduler.insert(
                now_ms() + interval_ms,
                ScheduledEntry::Recurring {
                    queue,
                    template,
                    interval_ms,
                    remaining,
                },
            );
        }
    }
}

/// Dead-letter monitor task: evaluate per-queue alert configs at the
/// configured interval and publish stats snapshots.
pub(crate) async fn run_dead_letter_monitor(core: Arc<BrokerCore>) {
    loop {
        let interval_ms = core.config.read().unwrap().dlq_monitor_interval_ms.max(100);
        tokio::select! {
            _ = core.shutdown_token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }

        let now = now_ms();
        let window_ms = core.config.read().unwrap().metrics_window_ms;
        let queues: Vec<_> = core.queues.read().unwrap().values().cloned().collect();
        for queue in queues {
            let (observation, mut stats) = {
                let state = queue.state.read().unwrap();
                if !state.config.enable_dead_letter {
                    continue;
                }
                let dlq_name = state.config.dead_letter_queue_name();
                let cutoff = now.saturating_sub(interval_ms);
                let recent = state
                    .window
                    .dead_letter_ts
                    .iter()
                    .filter(|ts| **ts >= cutoff)
                    .count();
                let window_cutoff = now.saturating_sub(window_ms);
                let window_dead_letters = state
                    .window
                    .dead_letter_ts
                    .iter()
                    .filter(|ts| **ts >= window_cutoff)
                    .count();
                let window_total = state
                    .window
                    .enqueue_ts
                    .iter()
                    .filter(|ts| **ts >= window_cutoff)
                    .count();
                (
                    DeadLetterObservation {
                        queue_name: queue.name.clone(),
                        dead_letter_queue_name: dlq_name,
                        current_count: 0,
                        window_dead_letters,
                        recent_dead_letters: recent,
                        window_total,
                        window_ms,
                    },
                    state.dlq_stats.clone(),
                )
            };

            let mut observation = observation;
            observation.current_count = core
                .queue(&observation.dead_letter_queue_name)
                .map(|dlq| dlq.state.read().unwrap().ready_len() as u64)
                .unwrap_or(0);
            stats.current_dead_letter_messages = observation.current_count;

            for alert in core.monitor.evaluate(&observation, now) {
                if alert.alert_type == crate::monitor::DeadLetterAlertType::CountExceeded {
                    core.raise_alert(
                        AlertType::DeadLetterHigh,
                        &alert.queue_name,
                        alert.message.clone(),
                        alert.current_value as f64,
                    );
                }
                let handler = core.handlers.dead_letter_alert.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(&alert);
                }
            }

            let stats_handler = core.handlers.dead_letter_stats.lock().unwrap().clone();
            if let Some(handler) = stats_handler {
                handler(&stats);
            }
        }
    }
    tracing::debug!("dead-letter monitor stopped");
}

/// Metrics sampler task: trim windows, recompute rates and percentiles,
/// publish per-queue snapshots.
pub(crate) async fn run_metrics_sampler(core: Arc<BrokerCore>) {
    loop {
        let interval_ms = core.config.read().unwrap().metrics_interval_ms.max(100);
        tokio::select! {
            _ = core.shutdown_token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }

        let now = now_ms();
        let window_ms = core.config.read().unwrap().metrics_window_ms.max(1);
        let queues: Vec<_> = core.queues.read().unwrap().values().cloned().collect();
        for queue in queues {
            let (expired, p95, queue_name) = {
                let mut state = queue.state.write().unwrap();
                let expired = state.take_expired(now);
                state.window.trim(now, window_ms);
                let enqueue_rate =
                    MetricsWindow::rate_per_second(state.window.enqueue_ts.len(), window_ms);
                let dequeue_rate =
                    MetricsWindow::rate_per_second(state.window.dequeue_ts.len(), window_ms);
                let p50 = state.window.latency_percentile(0.50);
                let p95 = state.window.latency_percentile(0.95);
                state.metrics = message::QueueMetrics {
                    queue_name: queue.name.clone(),
                    pending_messages: state.ready_len() as u64,
                    total_messages: state.stats.total_messages,
                    processed_messages: state.stats.processed_messages,
                    dead_letter_messages: state.stats.dead_letter_messages,
                    retried_messages: state.stats.retried_messages,
                    enqueue_rate,
                    dequeue_rate,
                    p50_latency_ms: p50,
                    p95_latency_ms: p95,
                    timestamp: now,
                };
                (expired, p95, queue.name.clone())
            };
            for message in expired {
                core.dead_letter(&queue.name, message, message::DeadLetterReason::Expired);
            }
            // Latency alerting only applies where an embedder configured it.
            if let Some(config) = core.alerts.config(AlertType::HighLatency, &queue_name) {
                if config.enabled && p95 > config.threshold {
                    core.raise_alert(
                        AlertType::HighLatency,
                        &queue_name,
                        format!("p95 latency {p95:.1} ms exceeds {:.1} ms", config.threshold),
                        p95,
                    );
                }
            }
        }
    }
    tracing::debug!("metrics sampler stopped");
}

/// Heartbeat task: optionally flap node health to exercise failover paths.
pub(crate) async fn run_heartbeat(core: Arc<BrokerCore>) {
    let mut rng = SmallRng::from_entropy();
    loop {
        let (interval_ms, flap_probability) = {
            let config = core.config.read().unwrap();
            (
                config.heartbeat_interval_ms.max(100),
                config.heartbeat_flap_probability,
            )
        };
        tokio::select! {
            _ = core.shutdown_token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }

        if flap_probability <= 0.0 || rng.gen::<f64>() >= flap_probability {
            continue;
        }
        let nodes = core.router.node_ids();
        if nodes.is_empty() {
            continue;
        }
        let node = &nodes[rng.gen_range(0..nodes.len())];
        let healthy = core.router.node_health(node).unwrap_or(true);
        tracing::debug!(%node, healthy = !healthy, "heartbeat health flap");
        if let Err(err) = core.router.set_node_health(node, !healthy) {
            tracing::warn!(%node, %err, "heartbeat flap failed");
        }
    }
    tracing::debug!("heartbeat task stopped");
}

/// Transaction-timeout sweeper: expire pending transactions past their
/// deadline and invoke the timeout callbacks.
pub(crate) async fn run_txn_sweeper(core: Arc<BrokerCore>) {
    loop {
        let interval_ms = core.config.read().unwrap().txn_sweep_interval_ms.max(50);
        tokio::select! {
            _ = core.shutdown_token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }

        let timed_out = core.txns.sweep_timeouts(now_ms());
        if timed_out.is_empty() {
            continue;
        }
        let handler = core.handlers.txn_timeout.lock().unwrap().clone();
        for id in timed_out {
            tracing::warn!(transaction = id, "transaction timed out");
            if let Some(handler) = &handler {
                handler(id);
            }
        }
    }
    tracing::debug!("transaction sweeper stopped");
}
