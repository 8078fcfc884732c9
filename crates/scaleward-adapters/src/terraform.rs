//! Terraform backend for worker-node groups.
//!
//! Desired counts live in a JSON variables file as `<node>-count` entries.
//! A scale call rewrites the file and starts `terraform apply` in the
//! background; Terraform holds its own state lock, so the control loop
//! does not wait for the apply to finish. Current counts come from
//! `terraform state pull`.

use std::path::{Path, PathBuf};

use scaleward_policy::config::TerraformConfig;
use tracing::{debug, error, info, warn};

use crate::command;
use crate::dryrun::DryRunLedger;
use crate::error::{AdapterError, AdapterResult};
use crate::infra::{BoxFuture, InfraAdapter, NodeFilter, NodeInfo, ScaleAction, ScaleRequest};

const BACKEND: &str = "terraform";

pub struct TerraformAdapter {
    binary: String,
    workdir: PathBuf,
    vars_file: PathBuf,
    dryrun: Option<DryRunLedger>,
}

fn count_var(node: &str) -> String {
    format!("{node}-count")
}

impl TerraformAdapter {
    pub fn new(config: &TerraformConfig, dryrun: bool) -> Self {
        Self {
            binary: config.binary.clone(),
            workdir: config.workdir.clone(),
            vars_file: config.vars_file.clone(),
            dryrun: dryrun.then(DryRunLedger::new),
        }
    }

    async fn read_vars(&self) -> AdapterResult<serde_json::Map<String, serde_json::Value>> {
        match tokio::fs::read_to_string(&self.vars_file).await {
            Ok(text) if text.trim().is_empty() => Ok(serde_json::Map::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_counts(&self, requests: &[ScaleRequest]) -> AdapterResult<()> {
        if requests.is_empty() {
            return Ok(());
        }
        if let Some(ledger) = &self.dryrun {
            for request in requests {
                let count = request.action.resulting_count();
                info!(node = %request.target, m_node_count = count, "dry-run: terraform scale skipped");
                ledger.record(&request.target, count).await;
            }
            return Ok(());
        }

        let mut vars = self.read_vars().await?;
        for request in requests {
            let count = request.action.resulting_count();
            if let ScaleAction::Drop { instances, .. } = &request.action {
                warn!(
                    node = %request.target,
                    ?instances,
                    "terraform cannot drop specific instances, applying the count only"
                );
            }
            info!(node = %request.target, m_node_count = count, "(S) scaling worker node");
            vars.insert(count_var(&request.target), count.into());
        }
        let text = serde_json::to_string_pretty(&vars)?;
        tokio::fs::write(&self.vars_file, text).await?;

        spawn_apply(self.binary.clone(), self.workdir.clone());
        Ok(())
    }

    async fn current_count(&self, node: &str) -> AdapterResult<u32> {
        if let Some(ledger) = &self.dryrun {
            return Ok(ledger.count(node).await);
        }
        let state = command::run(BACKEND, &self.binary, &["state", "pull"], Some(&self.workdir)).await?;
        let count = count_from_state(&state, node)?;
        debug!(%node, instances = count, "terraform state counted");
        Ok(count)
    }
}

/// Run `terraform apply` without blocking the caller.
fn spawn_apply(binary: String, workdir: PathBuf) {
    tokio::spawn(async move {
        match run_apply(&binary, &workdir).await {
            Ok(()) => info!(workdir = %workdir.display(), "terraform apply finished"),
            Err(e) => error!(error = %e, "terraform apply failed"),
        }
    });
}

async fn run_apply(binary: &str, workdir: &Path) -> AdapterResult<()> {
    let out = command::run(
        BACKEND,
        binary,
        &["apply", "-auto-approve", "-input=false", "-no-color"],
        Some(workdir),
    )
    .await?;
    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        debug!(target: "scaleward::terraform", "{line}");
    }
    Ok(())
}

/// Number of instances of the resource named `node` in a state document.
fn count_from_state(state: &str, node: &str) -> AdapterResult<u32> {
    let state: serde_json::Value = serde_json::from_str(state)?;
    let resources = state
        .get("resources")
        .and_then(|r| r.as_array())
        .ok_or_else(|| AdapterError::Parse("terraform state has no resources".to_string()))?;
    let resource = resources
        .iter()
        .find(|r| r.get("name").and_then(|n| n.as_str()) == Some(node))
        .ok_or_else(|| AdapterError::NotFound(format!("terraform resource {node}")))?;
    Ok(resource
        .get("instances")
        .and_then(|i| i.as_array())
        .map_or(0, |i| i.len() as u32))
}

impl InfraAdapter for TerraformAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn scale<'a>(&'a self, target: &'a str, count: u32) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move { self.apply_counts(&[ScaleRequest::set_count(target, count)]).await })
    }

    /// All requests land in one variables-file update and one apply.
    fn scale_batch<'a>(&'a self, requests: &'a [ScaleRequest]) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.apply_counts(requests))
    }

    fn query_current_count<'a>(&'a self, target: &'a str) -> BoxFuture<'a, AdapterResult<u32>> {
        Box::pin(self.current_count(target))
    }

    fn drop_instances<'a>(
        &'a self,
        target: &'a str,
        instances: &'a [String],
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            warn!(node = %target, ?instances, "terraform cannot drop specific instances, ignoring");
            Ok(())
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    const STATE: &str = r#"{
        "version": 4,
        "resources": [
            {"name": "worker", "instances": [{"index_key": 0}, {"index_key": 1}]},
            {"name": "db", "instances": []}
        ]
    }"#;

    fn config(dir: &Path) -> TerraformConfig {
        TerraformConfig {
            binary: "terraform-not-installed".to_string(),
            workdir: dir.to_path_buf(),
            vars_file: dir.join("terraform.tfvars.json"),
        }
    }

    #[test]
    fn counts_instances_from_state() {
        assert_eq!(count_from_state(STATE, "worker").unwrap(), 2);
        assert_eq!(count_from_state(STATE, "db").unwrap(), 0);
        assert!(matches!(
            count_from_state(STATE, "cache"),
            Err(AdapterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_updates_every_count_variable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::write(&config.vars_file, r#"{"region": "eu", "worker-count": 1}"#).unwrap();
        let adapter = TerraformAdapter::new(&config, false);

        adapter
            .scale_batch(&[
                ScaleRequest::set_count("worker", 3),
                ScaleRequest::drop("gpu", vec!["g1".into()], 1),
            ])
            .await
            .unwrap();

        let vars: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config.vars_file).unwrap()).unwrap();
        assert_eq!(vars["worker-count"], 3);
        assert_eq!(vars["gpu-count"], 1);
        assert_eq!(vars["region"], "eu");
    }

    #[tokio::test]
    async fn dryrun_does_not_write_the_vars_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let adapter = TerraformAdapter::new(&config, true);
        adapter.scale("worker", 5).await.unwrap();
        assert!(!config.vars_file.exists());
        assert_eq!(adapter.query_current_count("worker").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn missing_binary_fails_the_count_query() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = TerraformAdapter::new(&config(dir.path()), false);
        assert!(adapter.query_current_count("worker").await.is_err());
    }
}
