// Shared across the integration test binaries; not every binary uses every
// helper.
#![allow(dead_code)]

use broker::{Broker, BrokerConfig};
use broker::message::QueueConfig;

/// A broker with fast background intervals suitable for tests.
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        metrics_interval_ms: 100,
        scheduler_tick_ms: 20,
        dlq_monitor_interval_ms: 200,
        txn_sweep_interval_ms: 50,
        replication_wait_ms: 300,
        ..BrokerConfig::default()
    }
}

pub fn start_broker(config: BrokerConfig) -> Broker {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let broker = Broker::new(config);
    broker.initialize().expect("broker initializes once");
    broker
}

pub fn start_default_broker() -> Broker {
    start_broker(test_config())
}

#[allow(dead_code)]
pub fn queue_named(name: &str) -> QueueConfig {
    QueueConfig::new(name)
}
