use message::QueueError;
use pool::PoolConfig;
use serde::{Deserialize, Serialize};

/// Tunables of one broker instance. Everything here has a default; the
/// recognized keys of the global string-config map (see `apply_config_key`)
/// update the matching fields at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Identity of the local node in the simulated cluster.
    pub node_id: String,
    /// Virtual points per node on the consistent-hash ring.
    pub shard_virtual_nodes: u32,
    /// Follower acknowledgements a send waits for before returning.
    pub min_replication_acks: u32,
    /// Upper bound on the replication-ack wait before a send times out.
    pub replication_wait_ms: u64,
    /// Sliding window for per-queue enqueue/dequeue rates.
    pub metrics_window_ms: u64,
    /// Latency-sample ring capacity per queue.
    pub latency_ring: usize,
    /// Metrics sampler period.
    pub metrics_interval_ms: u64,
    /// Scheduler idle sleep.
    pub scheduler_tick_ms: u64,
    /// Dead-letter monitor period.
    pub dlq_monitor_interval_ms: u64,
    /// Heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Probability of a per-tick simulated health flap, in [0, 1].
    pub heartbeat_flap_probability: f64,
    /// Transaction timeout sweeper period.
    pub txn_sweep_interval_ms: u64,
    /// Default transaction timeout when `begin` passes zero.
    pub txn_default_timeout_ms: u64,
    /// Retained alert-history entries.
    pub alert_history_limit: usize,
    /// Fast-path sample ring per performance histogram.
    pub perf_sample_ring: usize,
    pub pool: PoolConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            node_id: "local".to_string(),
            shard_virtual_nodes: 128,
            min_replication_acks: 0,
            replication_wait_ms: 5_000,
            metrics_window_ms: 60_000,
            latency_ring: 512,
            metrics_interval_ms: 5_000,
            scheduler_tick_ms: 100,
            dlq_monitor_interval_ms: 60_000,
            heartbeat_interval_ms: 3_000,
            heartbeat_flap_probability: 0.0,
            txn_sweep_interval_ms: 1_000,
            txn_default_timeout_ms: 30_000,
            alert_history_limit: 1_000,
            perf_sample_ring: 10_000,
            pool: PoolConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Apply one recognized global-config key. Returns false for unknown
    /// keys, which callers store verbatim but otherwise ignore.
    pub fn apply_config_key(&mut self, key: &str, value: &str) -> Result<bool, QueueError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, QueueError> {
            value.parse().map_err(|_| {
                QueueError::InvalidConfig(format!("bad value '{value}' for '{key}'"))
            })
        }

        match key {
            "cluster.heartbeat.flap.prob" => {
                let prob: f64 = parse(key, value)?;
                if !(0.0..=1.0).contains(&prob) {
                    return Err(QueueError::InvalidConfig(format!(
                        "'{key}' must be within [0, 1], got {prob}"
                    )));
                }
                self.heartbeat_flap_probability = prob;
            }
            "cluster.min_replication_acks" => {
                self.min_replication_acks = parse(key, value)?;
            }
            "metrics.window_ms" => self.metrics_window_ms = parse(key, value)?,
            "metrics.latency_ring" => self.latency_ring = parse(key, value)?,
            "scheduler.tick_ms" => self.scheduler_tick_ms = parse(key, value)?,
            "dlq.monitor_interval_ms" => self.dlq_monitor_interval_ms = parse(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys_update_fields() {
        let mut config = BrokerConfig::default();
        assert!(config
            .apply_config_key("cluster.min_replication_acks", "2")
            .unwrap());
        assert_eq!(config.min_replication_acks, 2);
        assert!(config.apply_config_key("metrics.window_ms", "30000").unwrap());
        assert_eq!(config.metrics_window_ms, 30_000);
    }

    #[test]
    fn unknown_keys_are_reported_not_errors() {
        let mut config = BrokerConfig::default();
        assert!(!config.apply_config_key("custom.embedder.key", "x").unwrap());
    }

    #[test]
    fn flap_probability_is_range_checked() {
        let mut config = BrokerConfig::default();
        assert!(config
            .apply_config_key("cluster.heartbeat.flap.prob", "1.5")
            .is_err());
        assert!(config
            .apply_config_key("cluster.heartbeat.flap.prob", "0.25")
            .unwrap());
        assert_eq!(config.heartbeat_flap_probability, 0.25);
    }
}
