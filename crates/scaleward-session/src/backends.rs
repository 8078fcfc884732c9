//! The collaborators a session drives, and the settings it runs with.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use scaleward_adapters::{
    InfraAdapter, KubernetesAdapter, MetricsSource, OccopusAdapter, OptimizerClient,
    PrometheusSource, SimulatedAdapter, StaticMetrics, TerraformAdapter,
};
use scaleward_policy::config::OptimizerConfig;
use scaleward_policy::{DryRunComponent, KeeperConfig, Orchestrator};
use tracing::info;

/// Timing and naming knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cycle_interval: Duration,
    pub evaluation_timeout: Duration,
    pub down_nodes_timeout: Duration,
    pub optimizer: OptimizerConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&KeeperConfig::default())
    }
}

impl From<&KeeperConfig> for SessionSettings {
    fn from(config: &KeeperConfig) -> Self {
        Self {
            cycle_interval: config.cycle_interval(),
            evaluation_timeout: config.evaluation_timeout(),
            down_nodes_timeout: config.down_nodes_timeout(),
            optimizer: config.optimizer.clone(),
        }
    }
}

/// Metrics source, infrastructure adapters and optimizer client.
///
/// Services and node maintenance always go through `containers`; node
/// groups go through the adapter registered for their orchestrator.
#[derive(Clone)]
pub struct Backends {
    pub metrics: Arc<dyn MetricsSource>,
    pub containers: Arc<dyn InfraAdapter>,
    pub node_groups: BTreeMap<Orchestrator, Arc<dyn InfraAdapter>>,
    pub optimizer: Option<OptimizerClient>,
}

impl Backends {
    /// Real backends as configured, each honouring its dry-run switch.
    pub fn live(config: &KeeperConfig) -> Self {
        let dry = |c| config.dryrun.is_enabled(c);
        let containers: Arc<dyn InfraAdapter> =
            Arc::new(KubernetesAdapter::new(&config.kubernetes, dry(DryRunComponent::K8s)));

        let mut node_groups: BTreeMap<Orchestrator, Arc<dyn InfraAdapter>> = BTreeMap::new();
        node_groups.insert(
            Orchestrator::Occopus,
            Arc::new(OccopusAdapter::new(&config.occopus, dry(DryRunComponent::Occopus))),
        );
        node_groups.insert(
            Orchestrator::Terraform,
            Arc::new(TerraformAdapter::new(&config.terraform, dry(DryRunComponent::Terraform))),
        );
        node_groups.insert(Orchestrator::Kubernetes, containers.clone());

        let optimizer = match &config.optimizer.endpoint {
            Some(_) if dry(DryRunComponent::Optimizer) => {
                info!("(O) optimizer in dry-run, advice disabled");
                None
            }
            Some(endpoint) => Some(OptimizerClient::new(endpoint.clone())),
            None => None,
        };

        Self {
            metrics: Arc::new(PrometheusSource::new(
                &config.prometheus,
                dry(DryRunComponent::Prometheus),
            )),
            containers,
            node_groups,
            optimizer,
        }
    }

    /// Fixed metrics and one in-memory adapter standing in for every backend.
    pub fn simulated(metrics: StaticMetrics, infra: Arc<SimulatedAdapter>) -> Self {
        let node_groups = [
            Orchestrator::Occopus,
            Orchestrator::Terraform,
            Orchestrator::Kubernetes,
        ]
        .into_iter()
        .map(|o| (o, infra.clone() as Arc<dyn InfraAdapter>))
        .collect();
        Self {
            metrics: Arc::new(metrics),
            containers: infra,
            node_groups,
            optimizer: None,
        }
    }

    pub fn node_adapter(&self, orchestrator: Orchestrator) -> Option<&Arc<dyn InfraAdapter>> {
        self.node_groups.get(&orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_the_config() {
        let mut config = KeeperConfig::default();
        config.cycle_interval_secs = 3;
        let settings = SessionSettings::from(&config);
        assert_eq!(settings.cycle_interval, Duration::from_secs(3));
        assert_eq!(settings.evaluation_timeout, Duration::from_secs(10));
        assert_eq!(settings.down_nodes_timeout, Duration::from_secs(120));
    }

    #[test]
    fn live_backends_cover_every_orchestrator() {
        let mut config = KeeperConfig::default();
        config.optimizer.endpoint = Some("http://optimizer:12345".to_string());
        let backends = Backends::live(&config);
        assert_eq!(backends.node_groups.len(), 3);
        assert_eq!(backends.node_adapter(Orchestrator::Terraform).unwrap().name(), "terraform");
        assert_eq!(backends.containers.name(), "k8s");
        assert!(backends.optimizer.is_some());

        config.dryrun.set(DryRunComponent::Optimizer, true);
        assert!(Backends::live(&config).optimizer.is_none());
    }
}
