//! DownNodeTracker: removes nodes that stay down past a timeout.
//!
//! Each reconcile takes the infrastructure's current down list and runs
//! three steps in order:
//!
//! 1. forget tracked nodes missing from the list (recovered or gone)
//! 2. start tracking listed nodes not yet tracked, stamped with `now`
//! 3. for every node down longer than the timeout, ask the adapter to
//!    remove it and forget it, whatever the outcome
//!
//! There is no history beyond the tracked set. A node that flaps starts
//! over, and a node whose removal failed is re-added fresh next cycle if
//! it is still down.

use std::collections::BTreeMap;
use std::time::Duration;

use scaleward_adapters::{AdapterResult, InfraAdapter, NodeFilter, NodeInfo};
use tracing::{debug, info, warn};

/// Default time a node may stay down before it is removed.
pub const DEFAULT_DOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// A tracked down node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownNode {
    pub node: NodeInfo,
    /// Unix seconds of the first reconcile that saw the node down.
    pub first_seen: i64,
}

#[derive(Debug)]
pub struct DownNodeTracker {
    timeout: Duration,
    records: BTreeMap<String, DownNode>,
}

impl Default for DownNodeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DOWN_TIMEOUT)
    }
}

impl DownNodeTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            records: BTreeMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_tracked(&self, node_id: &str) -> bool {
        self.records.contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&DownNode> {
        self.records.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn tracked(&self) -> impl Iterator<Item = &DownNode> {
        self.records.values()
    }

    /// Query the adapter for down nodes and reconcile against them.
    ///
    /// A failed listing leaves the tracked set untouched.
    pub async fn maintain(&mut self, adapter: &dyn InfraAdapter) -> AdapterResult<Vec<String>> {
        let down = adapter.list_nodes(NodeFilter::Down).await?;
        Ok(self.reconcile(&down, adapter).await)
    }

    /// Reconcile against `down` at the current wall-clock time. Returns
    /// the ids the tracker asked the adapter to remove.
    pub async fn reconcile(&mut self, down: &[NodeInfo], adapter: &dyn InfraAdapter) -> Vec<String> {
        self.reconcile_at(down, chrono::Utc::now().timestamp(), adapter)
            .await
    }

    /// Reconcile against `down` as of `now` (Unix seconds).
    pub async fn reconcile_at(
        &mut self,
        down: &[NodeInfo],
        now: i64,
        adapter: &dyn InfraAdapter,
    ) -> Vec<String> {
        self.records
            .retain(|id, _| down.iter().any(|node| &node.id == id));

        for node in down {
            if !self.records.contains_key(&node.id) {
                debug!(node = %node.id, addr = %node.addr, "(M) node reported down");
                self.records.insert(
                    node.id.clone(),
                    DownNode {
                        node: node.clone(),
                        first_seen: now,
                    },
                );
            }
        }

        let timeout = self.timeout.as_secs() as i64;
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|r| now - r.first_seen > timeout)
            .map(|r| r.node.id.clone())
            .collect();

        for id in &expired {
            info!(node = %id, timeout_secs = timeout, "(M) node is down for too long, removing");
            if let Err(e) = adapter.remove_node(id).await {
                warn!(node = %id, backend = adapter.name(), error = %e, "(M) removing node failed");
            }
            self.records.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaleward_adapters::SimulatedAdapter;

    fn node(id: &str) -> NodeInfo {
        NodeInfo::new(id, format!("10.0.0.{}", id.len()))
    }

    #[tokio::test]
    async fn node_down_past_timeout_is_removed_then_re_added_fresh() {
        let sim = SimulatedAdapter::new();
        let mut tracker = DownNodeTracker::new(Duration::from_secs(120));
        let down = vec![node("n1")];

        assert!(tracker.reconcile_at(&down, 0, &sim).await.is_empty());
        assert_eq!(tracker.get("n1").unwrap().first_seen, 0);

        let removed = tracker.reconcile_at(&down, 121, &sim).await;
        assert_eq!(removed, vec!["n1".to_string()]);
        assert!(!tracker.is_tracked("n1"));
        assert_eq!(sim.removed_nodes().await, vec!["n1".to_string()]);

        // Still reported down: tracked again with a fresh timestamp.
        assert!(tracker.reconcile_at(&down, 122, &sim).await.is_empty());
        assert_eq!(tracker.get("n1").unwrap().first_seen, 122);
    }

    #[tokio::test]
    async fn exactly_the_timeout_is_not_expired() {
        let sim = SimulatedAdapter::new();
        let mut tracker = DownNodeTracker::new(Duration::from_secs(120));
        let down = vec![node("n1")];
        tracker.reconcile_at(&down, 0, &sim).await;
        assert!(tracker.reconcile_at(&down, 120, &sim).await.is_empty());
        assert!(tracker.is_tracked("n1"));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let sim = SimulatedAdapter::new();
        let mut tracker = DownNodeTracker::new(Duration::from_secs(120));
        let down = vec![node("n1"), node("n22")];

        tracker.reconcile_at(&down, 10, &sim).await;
        let first: Vec<DownNode> = tracker.tracked().cloned().collect();
        tracker.reconcile_at(&down, 20, &sim).await;
        let second: Vec<DownNode> = tracker.tracked().cloned().collect();
        assert_eq!(first, second);
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test]
    async fn recovered_nodes_are_forgotten() {
        let sim = SimulatedAdapter::new();
        let mut tracker = DownNodeTracker::new(Duration::from_secs(120));
        tracker.reconcile_at(&[node("n1"), node("n22")], 0, &sim).await;
        tracker.reconcile_at(&[node("n22")], 50, &sim).await;
        assert!(!tracker.is_tracked("n1"));

        // n1 flaps back: its timer starts over.
        tracker.reconcile_at(&[node("n1"), node("n22")], 100, &sim).await;
        assert_eq!(tracker.get("n1").unwrap().first_seen, 100);
        let removed = tracker.reconcile_at(&[node("n1"), node("n22")], 130, &sim).await;
        assert_eq!(removed, vec!["n22".to_string()]);
        assert!(tracker.is_tracked("n1"));
    }

    #[tokio::test]
    async fn failed_removal_still_drops_the_entry() {
        let sim = SimulatedAdapter::new().fail_target("n1");
        let mut tracker = DownNodeTracker::new(Duration::from_secs(5));
        tracker.reconcile_at(&[node("n1")], 0, &sim).await;
        let removed = tracker.reconcile_at(&[node("n1")], 6, &sim).await;
        assert_eq!(removed, vec!["n1".to_string()]);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn maintain_lists_down_nodes_from_the_adapter() {
        let sim = SimulatedAdapter::new().with_down_nodes(vec![node("n1")]);
        let mut tracker = DownNodeTracker::default();
        tracker.maintain(&sim).await.unwrap();
        assert!(tracker.is_tracked("n1"));
    }
}
