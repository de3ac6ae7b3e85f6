use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use message::AlertId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    QueueFull,
    QueueEmpty,
    HighLatency,
    LowThroughput,
    DeadLetterHigh,
    ConsumerOffline,
    DiskSpaceLow,
    MemoryUsageHigh,
    CpuUsageHigh,
    NetworkError,
    PersistenceError,
    CompressionError,
    EncryptionError,
    TransactionTimeout,
    ReplicationLag,
    NodeHealthDegraded,
    Custom,
}

fn default_duration_ms() -> u64 {
    60_000
}
fn default_cooldown_ms() -> u64 {
    300_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub alert_type: AlertType,
    pub level: AlertLevel,
    /// Queue scope; empty applies broker-wide.
    #[serde(default)]
    pub queue_name: String,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub queue_name: String,
    pub message: String,
    pub current_value: f64,
    pub threshold: f64,
    pub trigger_time: u64,
    pub last_update_time: u64,
    pub is_active: bool,
    pub occurrence_count: u32,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_alerts: u64,
    pub active_alerts: u64,
    pub info_alerts: u64,
    pub warning_alerts: u64,
    pub error_alerts: u64,
    pub critical_alerts: u64,
    pub average_resolution_time_ms: f64,
    pub last_update_time: u64,
}

struct AlertBook {
    configs: HashMap<(AlertType, String), AlertConfig>,
    active: HashMap<(AlertType, String), Alert>,
    history: VecDeque<Alert>,
    stats: AlertStats,
    resolved: u64,
}

/// Broker-wide alert registry: config CRUD, raise-with-cooldown, history,
/// acknowledge/resolve, and aggregate statistics.
pub(crate) struct AlertManager {
    book: Mutex<AlertBook>,
    history_limit: usize,
}

impl AlertManager {
    pub fn new(history_limit: usize) -> Self {
        AlertManager {
            book: Mutex::new(AlertBook {
                configs: HashMap::new(),
                active: HashMap::new(),
                history: VecDeque::new(),
                stats: AlertStats::default(),
                resolved: 0,
            }),
            history_limit: history_limit.max(1),
        }
    }

    pub fn set_config(&self, config: AlertConfig) {
        let key = (config.alert_type, config.queue_name.clone());
        self.book.lock().unwrap().configs.insert(key, config);
    }

    pub fn config(&self, alert_type: AlertType, queue: &str) -> Option<AlertConfig> {
        self.book
            .lock()
            .unwrap()
            .configs
            .get(&(alert_type, queue.to_string()))
            .cloned()
    }

    pub fn all_configs(&self) -> Vec<AlertConfig> {
        self.book.lock().unwrap().configs.values().cloned().collect()
    }

    pub fn delete_config(&self, alert_type: AlertType, queue: &str) -> bool {
        self.book
            .lock()
            .unwrap()
            .configs
            .remove(&(alert_type, queue.to_string()))
            .is_some()
    }

    /// Raise or refresh an alert if a matching enabled config exists and the
    /// cooldown has lapsed. Returns the alert for handler dispatch.
    pub fn raise(
        &self,
        id: AlertId,
        alert_type: AlertType,
        queue: &str,
        message: String,
        current_value: f64,
        now: u64,
    ) -> Option<Alert> {
        let mut book = self.book.lock().unwrap();
        let config = book
            .configs
            .get(&(alert_type, queue.to_string()))
            .or_else(|| book.configs.get(&(alert_type, String::new())))
            .cloned()?;
        if !config.enabled {
            return None;
        }

        let key = (alert_type, queue.to_string());
        if let Some(existing) = book.active.get_mut(&key) {
            if now.saturating_sub(existing.last_update_time) < config.cooldown_ms {
                existing.occurrence_count += 1;
                existing.current_value = current_value;
                return None;
            }
        }

        let alert = Alert {
            id,
            alert_type,
            level: config.level,
            queue_name: queue.to_string(),
            message,
            current_value,
            threshold: config.threshold,
            trigger_time: now,
            last_update_time: now,
            is_active: true,
            occurrence_count: 1,
            details: config.description.clone(),
        };
        book.active.insert(key, alert.clone());
        book.history.push_back(alert.clone());
        if book.history.len() > self.history_limit {
            book.history.pop_front();
        }

        book.stats.total_alerts += 1;
        match alert.level {
            AlertLevel::Info => book.stats.info_alerts += 1,
            AlertLevel::Warning => book.stats.warning_alerts += 1,
            AlertLevel::Error => book.stats.error_alerts += 1,
            AlertLevel::Critical => book.stats.critical_alerts += 1,
        }
        book.stats.active_alerts = book.active.len() as u64;
        book.stats.last_update_time = now;
        Some(alert)
    }

    pub fn acknowledge(&self, alert_id: AlertId) -> bool {
        let mut book = self.book.lock().unwrap();
        for alert in book.active.values_mut() {
            if alert.id == alert_id {
                alert.is_active = false;
                return true;
            }
        }
        false
    }

    pub fn resolve(&self, alert_id: AlertId, now: u64) -> bool {
        let mut book = self.book.lock().unwrap();
        let key = book
            .active
            .iter()
            .find(|(_, alert)| alert.id == alert_id)
            .map(|(key, _)| key.clone());
        let Some(key) = key else { return false };
        let alert = book.active.remove(&key).expect("key located above");

        book.resolved += 1;
        let resolution_ms = now.saturating_sub(alert.trigger_time) as f64;
        let count = book.resolved;
        book.stats.average_resolution_time_ms +=
            (resolution_ms - book.stats.average_resolution_time_ms) / count as f64;
        book.stats.active_alerts = book.active.len() as u64;
        book.stats.last_update_time = now;
        true
    }

    pub fn clear_all(&self) {
        let mut book = self.book.lock().unwrap();
        book.active.clear();
        book.stats.active_alerts = 0;
    }

    pub fn active(&self) -> Vec<Alert> {
        self.book.lock().unwrap().active.values().cloned().collect()
    }

    pub fn history(&self, limit: usize) -> Vec<Alert> {
        let book = self.book.lock().unwrap();
        book.history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AlertStats {
        self.book.lock().unwrap().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AlertManager {
        let manager = AlertManager::new(10);
        manager.set_config(AlertConfig {
            alert_type: AlertType::QueueFull,
            level: AlertLevel::Warning,
            queue_name: "orders".to_string(),
            threshold: 100.0,
            duration_ms: 1_000,
            cooldown_ms: 1_000,
            enabled: true,
            description: String::new(),
        });
        manager
    }

    #[test]
    fn raise_requires_a_config() {
        let manager = manager();
        assert!(manager
            .raise(1, AlertType::QueueEmpty, "orders", "x".into(), 0.0, 0)
            .is_none());
        assert!(manager
            .raise(2, AlertType::QueueFull, "orders", "full".into(), 120.0, 0)
            .is_some());
    }

    #[test]
    fn cooldown_counts_occurrences() {
        let manager = manager();
        assert!(manager
            .raise(1, AlertType::QueueFull, "orders", "full".into(), 120.0, 0)
            .is_some());
        assert!(manager
            .raise(2, AlertType::QueueFull, "orders", "full".into(), 130.0, 500)
            .is_none());
        let active = manager.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].occurrence_count, 2);
    }

    #[test]
    fn resolve_updates_stats() {
        let manager = manager();
        manager
            .raise(1, AlertType::QueueFull, "orders", "full".into(), 120.0, 1_000)
            .unwrap();
        assert!(manager.resolve(1, 3_000));
        assert!(!manager.resolve(1, 3_000));
        let stats = manager.stats();
        assert_eq!(stats.active_alerts, 0);
        assert_eq!(stats.total_alerts, 1);
        assert!((stats.average_resolution_time_ms - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded_and_recent_first() {
        let manager = AlertManager::new(2);
        manager.set_config(AlertConfig {
            alert_type: AlertType::QueueFull,
            level: AlertLevel::Info,
            queue_name: String::new(),
            threshold: 0.0,
            duration_ms: 0,
            cooldown_ms: 0,
            enabled: true,
            description: String::new(),
        });
        for id in 1..=3 {
            manager.raise(id, AlertType::QueueFull, "q", format!("a{id}"), 0.0, id);
        }
        let history = manager.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, 3);
    }
}
