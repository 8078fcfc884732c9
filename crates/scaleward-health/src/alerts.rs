//! AlertRegistry: alerts announced by the metrics source, waiting to be
//! seen by a rule.
//!
//! Intake is the Alertmanager webhook body. Only firing alerts are kept,
//! keyed by `labels.alertname`, with their `endsAt` as the stored value.
//! The controller removes every alert a rule consulted, so a still-firing
//! alert has to be announced again to be seen again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Status value of an alert that is currently active.
pub const FIRING: &str = "firing";

/// Alertmanager webhook payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertBatch {
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "endsAt", default)]
    pub ends_at: String,
}

impl Alert {
    pub fn firing(name: &str, ends_at: &str) -> Self {
        Self {
            labels: BTreeMap::from([("alertname".to_string(), name.to_string())]),
            status: FIRING.to_string(),
            ends_at: ends_at.to_string(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.labels.get("alertname").map(String::as_str)
    }

    pub fn is_firing(&self) -> bool {
        self.status == FIRING
    }
}

#[derive(Debug, Default)]
pub struct AlertRegistry {
    /// alertname → endsAt
    alerts: BTreeMap<String, String>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the firing alerts of `batch`; returns the names newly added.
    ///
    /// An alert that is already tracked keeps its stored expiry.
    pub fn add(&mut self, batch: &AlertBatch) -> Vec<String> {
        let mut added = Vec::new();
        for alert in &batch.alerts {
            if !alert.is_firing() {
                debug!(status = %alert.status, name = ?alert.name(), "ignoring non-firing alert");
                continue;
            }
            let Some(name) = alert.name() else {
                warn!("firing alert without an alertname label, ignoring");
                continue;
            };
            if self.alerts.contains_key(name) {
                warn!(alert = %name, "alert fired again while still tracked");
                continue;
            }
            info!(alert = %name, ends_at = %alert.ends_at, "(A) alert registered");
            self.alerts.insert(name.to_string(), alert.ends_at.clone());
            added.push(name.to_string());
        }
        added
    }

    /// Stored expiry of `name`, if tracked.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.alerts.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.alerts.contains_key(name)
    }

    /// Forget one alert. Returns whether it was tracked.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.alerts.remove(name).is_some();
        if removed {
            debug!(alert = %name, "(A) alert removed");
        }
        removed
    }

    /// Forget every alert; returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.alerts.len();
        self.alerts.clear();
        if count > 0 {
            debug!(count, "(A) all alerts removed");
        }
        count
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.alerts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_query_remove() {
        let mut registry = AlertRegistry::new();
        let batch: AlertBatch = serde_json::from_value(serde_json::json!({
            "alerts": [{"labels": {"alertname": "X"}, "status": "firing", "endsAt": "t1"}]
        }))
        .unwrap();

        assert_eq!(registry.add(&batch), vec!["X".to_string()]);
        assert_eq!(registry.query("X"), Some("t1"));
        assert!(registry.remove("X"));
        assert_eq!(registry.query("X"), None);
    }

    #[test]
    fn only_firing_alerts_are_admitted() {
        let mut registry = AlertRegistry::new();
        let mut resolved = Alert::firing("Y", "t2");
        resolved.status = "resolved".to_string();
        let batch = AlertBatch {
            alerts: vec![resolved, Alert::firing("Z", "t3")],
        };
        assert_eq!(registry.add(&batch), vec!["Z".to_string()]);
        assert!(!registry.contains("Y"));
    }

    #[test]
    fn refiring_keeps_the_stored_expiry() {
        let mut registry = AlertRegistry::new();
        registry.add(&AlertBatch {
            alerts: vec![Alert::firing("X", "t1")],
        });
        let added = registry.add(&AlertBatch {
            alerts: vec![Alert::firing("X", "t9")],
        });
        assert!(added.is_empty());
        assert_eq!(registry.query("X"), Some("t1"));
    }

    #[test]
    fn unnamed_alerts_are_ignored() {
        let mut registry = AlertRegistry::new();
        let batch = AlertBatch {
            alerts: vec![Alert {
                status: FIRING.to_string(),
                ..Alert::default()
            }],
        };
        assert!(registry.add(&batch).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut registry = AlertRegistry::new();
        registry.add(&AlertBatch {
            alerts: vec![Alert::firing("A", "t"), Alert::firing("B", "t")],
        });
        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(!registry.remove("A"));
    }
}
