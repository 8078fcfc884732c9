//! In-memory infrastructure for offline evaluation and tests.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};
use crate::infra::{BoxFuture, InfraAdapter, NodeFilter, NodeInfo, ScaleAction, ScaleRequest};

const BACKEND: &str = "simulated";

/// One call received by a [`SimulatedAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Scale { target: String, count: u32 },
    Batch(Vec<ScaleRequest>),
    QueryCount { target: String },
    Drop { target: String, instances: Vec<String> },
    RemoveNode { node_id: String },
    ListNodes(NodeFilter),
}

#[derive(Debug, Default)]
struct SimState {
    counts: HashMap<String, u32>,
    ready: Vec<NodeInfo>,
    down: Vec<NodeInfo>,
    calls: Vec<AdapterCall>,
    failing: HashSet<String>,
}

/// Keeps counts and nodes in memory and records every call in order.
///
/// Targets marked with [`SimulatedAdapter::fail_target`] fail every scale,
/// count and drop call, and node ids marked the same way fail removal.
#[derive(Debug, Default)]
pub struct SimulatedAdapter {
    state: Mutex<SimState>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, target: impl Into<String>, count: u32) -> Self {
        self.state.get_mut().counts.insert(target.into(), count);
        self
    }

    pub fn with_ready_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.state.get_mut().ready = nodes;
        self
    }

    pub fn with_down_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.state.get_mut().down = nodes;
        self
    }

    pub fn fail_target(mut self, target: impl Into<String>) -> Self {
        self.state.get_mut().failing.insert(target.into());
        self
    }

    pub async fn set_down_nodes(&self, nodes: Vec<NodeInfo>) {
        self.state.lock().await.down = nodes;
    }

    pub async fn set_ready_nodes(&self, nodes: Vec<NodeInfo>) {
        self.state.lock().await.ready = nodes;
    }

    pub async fn count(&self, target: &str) -> Option<u32> {
        self.state.lock().await.counts.get(target).copied()
    }

    /// Every call received so far.
    pub async fn calls(&self) -> Vec<AdapterCall> {
        self.state.lock().await.calls.clone()
    }

    /// Calls other than queries, i.e. the actions a cycle dispatched.
    pub async fn actions(&self) -> Vec<AdapterCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| !matches!(c, AdapterCall::QueryCount { .. } | AdapterCall::ListNodes(_)))
            .collect()
    }

    pub async fn removed_nodes(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                AdapterCall::RemoveNode { node_id } => Some(node_id),
                _ => None,
            })
            .collect()
    }
}

impl SimState {
    fn check(&self, target: &str) -> AdapterResult<()> {
        if self.failing.contains(target) {
            Err(AdapterError::backend(BACKEND, format!("{target} is failing")))
        } else {
            Ok(())
        }
    }

    fn apply(&mut self, request: &ScaleRequest) -> AdapterResult<()> {
        self.check(&request.target)?;
        match &request.action {
            ScaleAction::SetCount { count } => {
                self.counts.insert(request.target.clone(), *count);
            }
            ScaleAction::Drop { instances, count } => {
                self.ready.retain(|n| !instances.contains(&n.id));
                self.counts.insert(request.target.clone(), *count);
            }
        }
        Ok(())
    }
}

impl InfraAdapter for SimulatedAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn scale<'a>(&'a self, target: &'a str, count: u32) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.calls.push(AdapterCall::Scale {
                target: target.to_string(),
                count,
            });
            state.apply(&ScaleRequest::set_count(target, count))?;
            debug!(%target, count, "simulated scale");
            Ok(())
        })
    }

    fn scale_batch<'a>(&'a self, requests: &'a [ScaleRequest]) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.calls.push(AdapterCall::Batch(requests.to_vec()));
            for request in requests {
                state.apply(request)?;
            }
            debug!(requests = requests.len(), "simulated batch scale");
            Ok(())
        })
    }

    fn query_current_count<'a>(&'a self, target: &'a str) -> BoxFuture<'a, AdapterResult<u32>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.calls.push(AdapterCall::QueryCount {
                target: target.to_string(),
            });
            state.check(target)?;
            state
                .counts
                .get(target)
                .copied()
                .ok_or_else(|| AdapterError::NotFound(target.to_string()))
        })
    }

    fn drop_instances<'a>(
        &'a self,
        target: &'a str,
        instances: &'a [String],
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.calls.push(AdapterCall::Drop {
                target: target.to_string(),
                instances: instances.to_vec(),
            });
            state.check(target)?;
            state.ready.retain(|n| !instances.contains(&n.id));
            Ok(())
        })
    }

    fn remove_node<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.calls.push(AdapterCall::RemoveNode {
                node_id: node_id.to_string(),
            });
            state.check(node_id)?;
            state.down.retain(|n| n.id != node_id);
            Ok(())
        })
    }

    fn list_nodes(&self, filter: NodeFilter) -> BoxFuture<'_, AdapterResult<Vec<NodeInfo>>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.calls.push(AdapterCall::ListNodes(filter));
            Ok(match filter {
                NodeFilter::Ready => state.ready.clone(),
                NodeFilter::Down => state.down.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let sim = SimulatedAdapter::new().with_count("worker", 2);
        assert_eq!(sim.query_current_count("worker").await.unwrap(), 2);
        sim.scale("worker", 4).await.unwrap();
        assert_eq!(sim.count("worker").await, Some(4));
        assert_eq!(
            sim.calls().await,
            vec![
                AdapterCall::QueryCount { target: "worker".into() },
                AdapterCall::Scale { target: "worker".into(), count: 4 },
            ]
        );
        assert_eq!(sim.actions().await.len(), 1);
    }

    #[tokio::test]
    async fn drop_removes_ready_nodes() {
        let sim = SimulatedAdapter::new().with_ready_nodes(vec![
            NodeInfo::new("n1", "10.0.0.1"),
            NodeInfo::new("n2", "10.0.0.2"),
        ]);
        sim.scale_batch(&[ScaleRequest::drop("worker", vec!["n1".into()], 1)])
            .await
            .unwrap();
        let ready = sim.list_nodes(NodeFilter::Ready).await.unwrap();
        assert_eq!(ready, vec![NodeInfo::new("n2", "10.0.0.2")]);
        assert_eq!(sim.count("worker").await, Some(1));
    }

    #[tokio::test]
    async fn failing_targets_error() {
        let sim = SimulatedAdapter::new().fail_target("web");
        assert!(sim.scale("web", 1).await.is_err());
        assert!(sim.query_current_count("web").await.is_err());
        assert!(matches!(
            sim.query_current_count("db").await,
            Err(AdapterError::NotFound(_))
        ));
    }
}
