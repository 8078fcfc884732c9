//! The infrastructure capability set every backend implements.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;

/// Boxed future returned by adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A worker node as reported by the infrastructure.
///
/// Serialized as `{ID, Addr}`, the shape rules see in `m_nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Addr")]
    pub addr: String,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

/// Which nodes `list_nodes` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeFilter {
    Ready,
    Down,
}

impl fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeFilter::Ready => "ready",
            NodeFilter::Down => "down",
        })
    }
}

/// What to do with one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleAction {
    /// Converge to an absolute instance count.
    SetCount { count: u32 },
    /// Remove these specific instances; `count` is what remains afterwards.
    Drop { instances: Vec<String>, count: u32 },
}

impl ScaleAction {
    /// Instance count once the action has been applied.
    pub fn resulting_count(&self) -> u32 {
        match self {
            ScaleAction::SetCount { count } | ScaleAction::Drop { count, .. } => *count,
        }
    }
}

/// One queued action, keyed by the target it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub target: String,
    #[serde(flatten)]
    pub action: ScaleAction,
}

impl ScaleRequest {
    pub fn set_count(target: impl Into<String>, count: u32) -> Self {
        Self {
            target: target.into(),
            action: ScaleAction::SetCount { count },
        }
    }

    pub fn drop(target: impl Into<String>, instances: Vec<String>, count: u32) -> Self {
        Self {
            target: target.into(),
            action: ScaleAction::Drop { instances, count },
        }
    }
}

/// A backend that owns instance counts and nodes.
///
/// Callers invoke these from a single task; implementations need no
/// internal concurrency. In dry-run mode an implementation logs what it
/// would have done and returns a success-shaped result.
pub trait InfraAdapter: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Converge `target` to `count` instances.
    fn scale<'a>(&'a self, target: &'a str, count: u32) -> BoxFuture<'a, AdapterResult<()>>;

    /// Instances of `target` currently running.
    fn query_current_count<'a>(&'a self, target: &'a str) -> BoxFuture<'a, AdapterResult<u32>>;

    /// Remove the named instances of `target`.
    fn drop_instances<'a>(
        &'a self,
        target: &'a str,
        instances: &'a [String],
    ) -> BoxFuture<'a, AdapterResult<()>>;

    /// Remove a node from the cluster.
    fn remove_node<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, AdapterResult<()>>;

    fn list_nodes(&self, filter: NodeFilter) -> BoxFuture<'_, AdapterResult<Vec<NodeInfo>>>;

    /// Apply several queued actions at once. Backends that can update many
    /// targets in one call override this; the default applies them in order
    /// and stops at the first failure.
    fn scale_batch<'a>(&'a self, requests: &'a [ScaleRequest]) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            for request in requests {
                match &request.action {
                    ScaleAction::SetCount { count } => self.scale(&request.target, *count).await?,
                    ScaleAction::Drop { instances, .. } => {
                        self.drop_instances(&request.target, instances).await?
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_info_uses_rule_facing_keys() {
        let node = NodeInfo::new("n1", "10.0.0.1");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json, serde_json::json!({"ID": "n1", "Addr": "10.0.0.1"}));
    }

    #[test]
    fn scale_request_wire_shape() {
        let req = ScaleRequest::drop("worker", vec!["n2".into()], 2);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["target"], "worker");
        assert_eq!(json["kind"], "drop");
        assert_eq!(json["count"], 2);
        assert_eq!(req.action.resulting_count(), 2);
    }
}
