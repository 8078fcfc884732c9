//! Occopus REST backend for worker-node groups.

use scaleward_policy::config::OccopusConfig;
use tracing::{debug, info};

use crate::dryrun::DryRunLedger;
use crate::error::{AdapterError, AdapterResult};
use crate::http;
use crate::infra::{BoxFuture, InfraAdapter, NodeFilter, NodeInfo};

const BACKEND: &str = "occopus";

pub struct OccopusAdapter {
    endpoint: String,
    infra_name: String,
    dryrun: Option<DryRunLedger>,
}

impl OccopusAdapter {
    pub fn new(config: &OccopusConfig, dryrun: bool) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            infra_name: config.infra_name.clone(),
            dryrun: dryrun.then(DryRunLedger::new),
        }
    }

    fn infra_url(&self, suffix: &str) -> String {
        http::join(
            &self.endpoint,
            &format!("/infrastructures/{}{suffix}", self.infra_name),
        )
    }

    async fn scale_to(&self, node: &str, count: u32) -> AdapterResult<()> {
        info!(%node, replicas = count, "(S) scaling worker node");
        if let Some(ledger) = &self.dryrun {
            info!(%node, replicas = count, "dry-run: occopus scale skipped");
            ledger.record(node, count).await;
            return Ok(());
        }
        let url = self.infra_url(&format!("/scaleto/{node}/{count}"));
        let resp = http::post(&url, "application/json", "").await?.error_for_status(&url)?;
        debug!(%url, body = %String::from_utf8_lossy(&resp.body), "occopus scaleto response");
        Ok(())
    }

    async fn current_count(&self, node: &str) -> AdapterResult<u32> {
        if let Some(ledger) = &self.dryrun {
            return Ok(ledger.count(node).await);
        }
        let url = self.infra_url("");
        let resp = http::get(&url).await?.error_for_status(&url)?;
        let status: serde_json::Value = serde_json::from_slice(&resp.body)?;
        count_from_status(&status, node)
    }

    async fn scale_down(&self, node: &str, instances: &[String]) -> AdapterResult<()> {
        for id in instances {
            info!(%node, instance = %id, "(S) dropping worker node instance");
            if self.dryrun.is_some() {
                info!(%node, instance = %id, "dry-run: occopus scaledown skipped");
                continue;
            }
            let url = self.infra_url(&format!("/scaledown/{node}/{id}"));
            http::post(&url, "application/json", "").await?.error_for_status(&url)?;
        }
        Ok(())
    }
}

/// Instance count of `node` in an infrastructure status document:
/// `{node: {scaling: {target: n}, instances: {...}}}`.
fn count_from_status(status: &serde_json::Value, node: &str) -> AdapterResult<u32> {
    let entry = status
        .get(node)
        .ok_or_else(|| AdapterError::NotFound(format!("node group {node}")))?;
    if let Some(target) = entry
        .get("scaling")
        .and_then(|s| s.get("target"))
        .and_then(|t| t.as_u64())
    {
        return Ok(target as u32);
    }
    entry
        .get("instances")
        .and_then(|i| i.as_object())
        .map(|i| i.len() as u32)
        .ok_or_else(|| AdapterError::Parse(format!("no instance count for node group {node}")))
}

impl InfraAdapter for OccopusAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn scale<'a>(&'a self, target: &'a str, count: u32) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.scale_to(target, count))
    }

    fn query_current_count<'a>(&'a self, target: &'a str) -> BoxFuture<'a, AdapterResult<u32>> {
        Box::pin(self.current_count(target))
    }

    fn drop_instances<'a>(
        &'a self,
        target: &'a str,
        instances: &'a [String],
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.scale_down(target, instances))
    }

    fn remove_node<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            Err(AdapterError::backend(
                BACKEND,
                format!("cannot remove cluster node {node_id}; use the container orchestrator"),
            ))
        })
    }

    fn list_nodes(&self, filter: NodeFilter) -> BoxFuture<'_, AdapterResult<Vec<NodeInfo>>> {
        Box::pin(async move {
            Err(AdapterError::backend(
                BACKEND,
                format!("listing {filter} nodes is not supported"),
            ))
        })
    }
}
