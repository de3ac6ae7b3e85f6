use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Short-window rate must exceed the long-window rate by this factor before
/// a trend anomaly fires.
pub(crate) const TREND_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeadLetterAlertType {
    CountExceeded,
    RateExceeded,
    TrendAnomaly,
    QueueFull,
    ProcessingFailed,
}

impl DeadLetterAlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterAlertType::CountExceeded => "DEAD_LETTER_COUNT_EXCEEDED",
            DeadLetterAlertType::RateExceeded => "DEAD_LETTER_RATE_EXCEEDED",
            DeadLetterAlertType::TrendAnomaly => "DEAD_LETTER_TREND_ANOMALY",
            DeadLetterAlertType::QueueFull => "DEAD_LETTER_QUEUE_FULL",
            DeadLetterAlertType::ProcessingFailed => "DEAD_LETTER_PROCESSING_FAILED",
        }
    }
}

fn default_max_messages() -> u64 {
    1_000
}
fn default_max_rate() -> f64 {
    0.1
}
fn default_check_interval_ms() -> u64 {
    60_000
}
fn default_cooldown_ms() -> u64 {
    300_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterAlertConfig {
    #[serde(default = "default_max_messages")]
    pub max_dead_letter_messages: u64,
    #[serde(default = "default_max_rate")]
    pub max_dead_letter_rate: f64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_true")]
    pub enable_count_alert: bool,
    #[serde(default = "default_true")]
    pub enable_rate_alert: bool,
    #[serde(default = "default_true")]
    pub enable_trend_alert: bool,
}

impl Default for DeadLetterAlertConfig {
    fn default() -> Self {
        DeadLetterAlertConfig {
            max_dead_letter_messages: default_max_messages(),
            max_dead_letter_rate: default_max_rate(),
            check_interval_ms: default_check_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
            enable_count_alert: true,
            enable_rate_alert: true,
            enable_trend_alert: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterAlert {
    pub alert_type: DeadLetterAlertType,
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    pub message: String,
    pub current_value: u64,
    pub threshold_value: u64,
    pub current_rate: f64,
    pub threshold_rate: f64,
    pub alert_time: u64,
    pub is_active: bool,
}

/// Window observations for one queue, gathered under its lock by the
/// monitor task.
pub(crate) struct DeadLetterObservation {
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    /// Messages currently sitting in the DLQ.
    pub current_count: u64,
    /// Dead-letter events within the full metrics window.
    pub window_dead_letters: usize,
    /// Dead-letter events within the last check interval.
    pub recent_dead_letters: usize,
    /// Enqueues within the full metrics window.
    pub window_total: usize,
    pub window_ms: u64,
}

/// Per-queue alert configuration, active alerts, and cooldown tracking for
/// the dead-letter monitor task.
pub(crate) struct DeadLetterMonitor {
    configs: Mutex<HashMap<String, DeadLetterAlertConfig>>,
    active: Mutex<HashMap<(String, DeadLetterAlertType), DeadLetterAlert>>,
    cooldowns: Mutex<HashMap<(String, DeadLetterAlertType), u64>>,
}

impl DeadLetterMonitor {
    pub fn new() -> Self {
        DeadLetterMonitor {
            configs: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_config(&self, queue: &str, config: DeadLetterAlertConfig) {
        self.configs
            .lock()
            .unwrap()
            .insert(queue.to_string(), config);
    }

    pub fn config_for(&self, queue: &str) -> DeadLetterAlertConfig {
        self.configs
            .lock()
            .unwrap()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Evaluate one queue's observation against its config. Emitted alerts
    /// respect the per-(queue, type) cooldown and are recorded active.
    pub fn evaluate(&self, observation: &DeadLetterObservation, now: u64) -> Vec<DeadLetterAlert> {
        let config = self.config_for(&observation.queue_name);
        let mut raised = Vec::new();

        if config.enable_count_alert
            && observation.current_count > config.max_dead_letter_messages
        {
            raised.extend(self.raise(
                DeadLetterAlertType::CountExceeded,
                observation,
                format!(
                    "dead-letter queue holds {} messages (threshold {})",
                    observation.current_count, config.max_dead_letter_messages
                ),
                observation.current_count,
                config.max_dead_letter_messages,
                0.0,
                0.0,
                &config,
                now,
            ));
        }

        if config.enable_rate_alert && observation.window_total > 0 {
            let rate = observation.window_dead_letters as f64 / observation.window_total as f64;
            if rate > config.max_dead_letter_rate {
                raised.extend(self.raise(
                    DeadLetterAlertType::RateExceeded,
                    observation,
                    format!(
                        "dead-letter rate {:.3} exceeds threshold {:.3}",
                        rate, config.max_dead_letter_rate
                    ),
                    observation.window_dead_letters as u64,
                    0,
                    rate,
                    config.max_dead_letter_rate,
                    &config,
                    now,
                ));
            }
        }

        if config.enable_trend_alert && observation.window_ms > 0 {
            // Long-window events scaled down to one check interval.
            let scale = config.check_interval_ms as f64 / observation.window_ms as f64;
            let baseline = observation.window_dead_letters as f64 * scale;
            let recent = observation.recent_dead_letters as f64;
            if baseline > 0.0 && recent > baseline * TREND_MULTIPLIER {
                raised.extend(self.raise(
                    DeadLetterAlertType::TrendAnomaly,
                    observation,
                    format!(
                        "dead-letter burst: {recent:.0} in the last interval vs {baseline:.1} baseline"
                    ),
                    observation.recent_dead_letters as u64,
                    baseline as u64,
                    recent,
                    baseline * TREND_MULTIPLIER,
                    &config,
                    now,
                ));
            }
        }

        raised
    }

    /// Raise an inline alert (queue-full, processing-failed) from the queue
    /// path, subject to the same cooldown rules.
    pub fn raise_inline(
        &self,
        alert_type: DeadLetterAlertType,
        queue: &str,
        dlq: &str,
        message: String,
        now: u64,
    ) -> Option<DeadLetterAlert> {
        let config = self.config_for(queue);
        let observation = DeadLetterObservation {
            queue_name: queue.to_string(),
            dead_letter_queue_name: dlq.to_string(),
            current_count: 0,
            window_dead_letters: 0,
            recent_dead_letters: 0,
            window_total: 0,
            window_ms: 0,
        };
        self.raise(alert_type, &observation, message, 0, 0, 0.0, 0.0, &config, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn raise(
        &self,
        alert_type: DeadLetterAlertType,
        observation: &DeadLetterObservation,
        message: String,
        current_value: u64,
        threshold_value: u64,
        current_rate: f64,
        threshold_rate: f64,
        config: &DeadLetterAlertConfig,
        now: u64,
    ) -> Option<DeadLetterAlert> {
        let key = (observation.queue_name.clone(), alert_type);
        {
            let mut cooldowns = self.cooldowns.lock().unwrap();
            if let Some(last) = cooldowns.get(&key) {
                if now.saturating_sub(*last) < config.cooldown_ms {
                    return None;
                }
            }
            cooldowns.insert(key.clone(), now);
        }

        let alert = DeadLetterAlert {
            alert_type,
            queue_name: observation.queue_name.clone(),
            dead_letter_queue_name: observation.dead_letter_queue_name.clone(),
            message,
            current_value,
            threshold_value,
            current_rate,
            threshold_rate,
            alert_time: now,
            is_active: true,
        };
        tracing::warn!(
            queue = %alert.queue_name,
            kind = alert_type.as_str(),
            detail = %alert.message,
            "dead-letter alert"
        );
        self.active.lock().unwrap().insert(key, alert.clone());
        Some(alert)
    }

    pub fn active_for(&self, queue: &str) -> Vec<DeadLetterAlert> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .filter(|((name, _), _)| name == queue)
            .map(|(_, alert)| alert.clone())
            .collect()
    }

    pub fn all_active(&self) -> Vec<DeadLetterAlert> {
        self.active.lock().unwrap().values().cloned().collect()
    }

    pub fn clear(&self, queue: &str, alert_type: DeadLetterAlertType) -> bool {
        self.active
            .lock()
            .unwrap()
            .remove(&(queue.to_string(), alert_type))
            .is_some()
    }

    pub fn clear_all(&self, queue: &str) {
        self.active
            .lock()
            .unwrap()
            .retain(|(name, _), _| name != queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(count: u64, window_dlq: usize, recent: usize, total: usize) -> DeadLetterObservation {
        DeadLetterObservation {
            queue_name: "orders".to_string(),
            dead_letter_queue_name: "orders_DLQ".to_string(),
            current_count: count,
            window_dead_letters: window_dlq,
            recent_dead_letters: recent,
            window_total: total,
            window_ms: 60_000,
        }
    }

    #[test]
    fn count_alert_fires_past_threshold() {
        let monitor = DeadLetterMonitor::new();
        monitor.set_config(
            "orders",
            DeadLetterAlertConfig {
                max_dead_letter_messages: 10,
                ..Default::default()
            },
        );
        let raised = monitor.evaluate(&observation(11, 0, 0, 0), 1_000);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, DeadLetterAlertType::CountExceeded);
        assert_eq!(monitor.active_for("orders").len(), 1);
    }

    #[test]
    fn cooldown_suppresses_repeats() {
        let monitor = DeadLetterMonitor::new();
        monitor.set_config(
            "orders",
            DeadLetterAlertConfig {
                max_dead_letter_messages: 10,
                cooldown_ms: 1_000,
                ..Default::default()
            },
        );
        assert_eq!(monitor.evaluate(&observation(11, 0, 0, 0), 1_000).len(), 1);
        assert_eq!(monitor.evaluate(&observation(12, 0, 0, 0), 1_500).len(), 0);
        assert_eq!(monitor.evaluate(&observation(13, 0, 0, 0), 2_100).len(), 1);
    }

    #[test]
    fn rate_alert_uses_window_share() {
        let monitor = DeadLetterMonitor::new();
        monitor.set_config(
            "orders",
            DeadLetterAlertConfig {
                max_dead_letter_rate: 0.1,
                max_dead_letter_messages: u64::MAX,
                enable_trend_alert: false,
                ..Default::default()
            },
        );
        // 3 of 20 = 15% > 10%.
        let raised = monitor.evaluate(&observation(0, 3, 0, 20), 1_000);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, DeadLetterAlertType::RateExceeded);
    }

    #[test]
    fn trend_alert_compares_short_to_long() {
        let monitor = DeadLetterMonitor::new();
        monitor.set_config(
            "orders",
            DeadLetterAlertConfig {
                max_dead_letter_messages: u64::MAX,
                enable_rate_alert: false,
                ..Default::default()
            },
        );
        // Baseline: 6 over the window scales to 6 per interval (window ==
        // interval); recent 20 > 6 * 2.0 fires.
        let raised = monitor.evaluate(&observation(0, 6, 20, 100), 1_000);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, DeadLetterAlertType::TrendAnomaly);
    }

    #[test]
    fn clear_removes_active() {
        let monitor = DeadLetterMonitor::new();
        monitor.set_config(
            "orders",
            DeadLetterAlertConfig {
                max_dead_letter_messages: 1,
                ..Default::default()
            },
        );
        monitor.evaluate(&observation(5, 0, 0, 0), 1_000);
        assert!(monitor.clear("orders", DeadLetterAlertType::CountExceeded));
        assert!(monitor.all_active().is_empty());
        assert!(!monitor.clear("orders", DeadLetterAlertType::CountExceeded));
    }
}
