//! Kubernetes backend, driven through `kubectl`.
//!
//! Services map to deployments. The control loop names services
//! `{stack}_{name}`; deployments carry only `name`, so the stack prefix is
//! stripped before every call.

use scaleward_policy::config::KubernetesConfig;
use serde::Deserialize;
use tracing::{debug, info};

use crate::command;
use crate::dryrun::DryRunLedger;
use crate::error::{AdapterError, AdapterResult};
use crate::infra::{BoxFuture, InfraAdapter, NodeFilter, NodeInfo};

const BACKEND: &str = "k8s";

pub struct KubernetesAdapter {
    kubectl: String,
    namespace: String,
    dryrun: Option<DryRunLedger>,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    metadata: NodeMetadata,
    #[serde(default)]
    spec: NodeSpec,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Deserialize)]
struct NodeMetadata {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSpec {
    #[serde(default)]
    taints: Vec<Taint>,
}

#[derive(Debug, Deserialize)]
struct Taint {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
    address: String,
}

impl Node {
    /// Ready nodes carry no taints. Down nodes are tainted, unless the
    /// first taint is the control-plane marker.
    fn matches(&self, filter: NodeFilter) -> bool {
        match filter {
            NodeFilter::Ready => self.spec.taints.is_empty(),
            NodeFilter::Down => self
                .spec
                .taints
                .first()
                .is_some_and(|t| !t.key.contains("master")),
        }
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::new(
            self.metadata.name.clone(),
            self.status
                .addresses
                .first()
                .map(|a| a.address.clone())
                .unwrap_or_default(),
        )
    }
}

/// Deployment name for a stack-qualified service name.
pub fn deployment_name(service: &str) -> &str {
    service.split_once('_').map_or(service, |(_, name)| name)
}

fn parse_nodes(json: &str, filter: NodeFilter) -> AdapterResult<Vec<NodeInfo>> {
    let list: NodeList = serde_json::from_str(json)?;
    Ok(list
        .items
        .iter()
        .filter(|n| n.matches(filter))
        .map(Node::info)
        .collect())
}

impl KubernetesAdapter {
    pub fn new(config: &KubernetesConfig, dryrun: bool) -> Self {
        Self {
            kubectl: config.kubectl.clone(),
            namespace: config.namespace.clone(),
            dryrun: dryrun.then(DryRunLedger::new),
        }
    }

    async fn kubectl(&self, args: &[&str]) -> AdapterResult<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.extend_from_slice(&["-n", self.namespace.as_str()]);
        full.extend_from_slice(args);
        command::run(BACKEND, &self.kubectl, &full, None).await
    }

    async fn scale_deployment(&self, service: &str, replicas: u32) -> AdapterResult<()> {
        let name = deployment_name(service);
        info!(service = %name, m_container_count = replicas, "(S) scaling service");
        if let Some(ledger) = &self.dryrun {
            info!(service = %name, "dry-run: k8s scale skipped");
            ledger.record(name, replicas).await;
            return Ok(());
        }
        let replicas = format!("--replicas={replicas}");
        self.kubectl(&["scale", "deployment", name, &replicas]).await?;
        Ok(())
    }

    async fn replicas(&self, service: &str) -> AdapterResult<u32> {
        let name = deployment_name(service);
        if let Some(ledger) = &self.dryrun {
            return Ok(ledger.count(name).await);
        }
        let out = self
            .kubectl(&["get", "deployment", name, "-o", "jsonpath={.spec.replicas}"])
            .await?;
        let replicas = out.trim().parse::<u32>().map_err(|_| {
            AdapterError::Parse(format!("replica count for {name}: {:?}", out.trim()))
        })?;
        debug!(service = %name, m_container_count = replicas, "(C) replicas queried");
        Ok(replicas)
    }

    async fn delete_pods(&self, service: &str, pods: &[String]) -> AdapterResult<()> {
        let name = deployment_name(service);
        for pod in pods {
            info!(service = %name, %pod, "(S) dropping instance");
            if self.dryrun.is_some() {
                info!(%pod, "dry-run: k8s pod deletion skipped");
                continue;
            }
            self.kubectl(&["delete", "pod", pod.as_str(), "--wait=false"]).await?;
        }
        Ok(())
    }

    async fn delete_node(&self, node_id: &str) -> AdapterResult<()> {
        info!(node = %node_id, "(M) removing node");
        if self.dryrun.is_some() {
            info!(node = %node_id, "dry-run: k8s node removal skipped");
            return Ok(());
        }
        // Nodes are cluster-scoped; the namespace flag is harmless.
        self.kubectl(&["delete", "node", node_id]).await?;
        Ok(())
    }

    async fn nodes(&self, filter: NodeFilter) -> AdapterResult<Vec<NodeInfo>> {
        if self.dryrun.is_some() {
            debug!(%filter, "dry-run: k8s node listing skipped");
            return Ok(Vec::new());
        }
        let out = self.kubectl(&["get", "nodes", "-o", "json"]).await?;
        let nodes = parse_nodes(&out, filter)?;
        debug!(%filter, count = nodes.len(), "(Q) nodes listed");
        Ok(nodes)
    }
}

impl InfraAdapter for KubernetesAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn scale<'a>(&'a self, target: &'a str, count: u32) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.scale_deployment(target, count))
    }

    fn query_current_count<'a>(&'a self, target: &'a str) -> BoxFuture<'a, AdapterResult<u32>> {
        Box::pin(self.replicas(target))
    }

    fn drop_instances<'a>(
        &'a self,
        target: &'a str,
        instances: &'a [String],
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.delete_pods(target, instances))
    }

    fn remove_node<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.delete_node(node_id))
    }

    fn list_nodes(&self, filter: NodeFilter) -> BoxFuture<'_, AdapterResult<Vec<NodeInfo>>> {
        Box::pin(self.nodes(filter))
    }
}
