//! scaleward.toml daemon configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Control surface listen address.
    pub listen: String,
    /// Seconds between evaluation cycles.
    pub cycle_interval_secs: u64,
    /// Wall-clock budget of one rule evaluation.
    pub evaluation_timeout_secs: u64,
    /// Seconds a node may stay down before it is removed.
    pub down_nodes_timeout_secs: u64,
    pub prometheus: PrometheusConfig,
    pub occopus: OccopusConfig,
    pub terraform: TerraformConfig,
    pub kubernetes: KubernetesConfig,
    pub optimizer: OptimizerConfig,
    /// Components that only log what they would do.
    pub dryrun: DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub endpoint: String,
    /// File-based service discovery target file for exporter sources.
    pub targets_file: Option<PathBuf>,
    /// Rule file the policy's alerts are written to.
    pub rules_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OccopusConfig {
    pub endpoint: String,
    pub infra_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformConfig {
    pub binary: String,
    pub workdir: PathBuf,
    /// Variables file holding `<node>-count` entries.
    pub vars_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub kubectl: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub endpoint: Option<String>,
    pub prefix_init: String,
    pub prefix_input: String,
    pub prefix_target: String,
    pub prefix_target_query: String,
    pub prefix_target_minth: String,
    pub prefix_target_maxth: String,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:12345".to_string(),
            cycle_interval_secs: 15,
            evaluation_timeout_secs: 10,
            down_nodes_timeout_secs: 120,
            prometheus: PrometheusConfig::default(),
            occopus: OccopusConfig::default(),
            terraform: TerraformConfig::default(),
            kubernetes: KubernetesConfig::default(),
            optimizer: OptimizerConfig::default(),
            dryrun: DryRun::default(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9090".to_string(),
            targets_file: None,
            rules_file: None,
        }
    }
}

impl Default for OccopusConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000".to_string(),
            infra_name: "micado_worker_infra".to_string(),
        }
    }
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            workdir: PathBuf::from("/var/lib/scaleward/terraform"),
            vars_file: PathBuf::from("/var/lib/scaleward/terraform/terraform.tfvars.json"),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            namespace: "default".to_string(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            prefix_init: "m_opt_init_".to_string(),
            prefix_input: "m_opt_input_".to_string(),
            prefix_target: "m_opt_target_".to_string(),
            prefix_target_query: "query_".to_string(),
            prefix_target_minth: "minth_".to_string(),
            prefix_target_maxth: "maxth_".to_string(),
        }
    }
}

impl KeeperConfig {
    pub fn from_file(path: &Path) -> PolicyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> PolicyResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }

    pub fn down_nodes_timeout(&self) -> Duration {
        Duration::from_secs(self.down_nodes_timeout_secs)
    }
}

/// A component that can be switched to dry-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunComponent {
    Occopus,
    Terraform,
    K8s,
    Prometheus,
    Optimizer,
}

impl DryRunComponent {
    pub const ALL: [DryRunComponent; 5] = [
        DryRunComponent::Occopus,
        DryRunComponent::Terraform,
        DryRunComponent::K8s,
        DryRunComponent::Prometheus,
        DryRunComponent::Optimizer,
    ];
}

impl FromStr for DryRunComponent {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "occopus" => Ok(Self::Occopus),
            "terraform" => Ok(Self::Terraform),
            "k8s" => Ok(Self::K8s),
            "prometheus" => Ok(Self::Prometheus),
            "optimizer" => Ok(Self::Optimizer),
            other => Err(PolicyError::UnknownComponent(other.to_string())),
        }
    }
}

/// The set of components running in dry-run mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DryRun(BTreeSet<DryRunComponent>);

impl DryRun {
    /// Every component in dry-run.
    pub fn all() -> Self {
        Self(DryRunComponent::ALL.into_iter().collect())
    }

    pub fn set(&mut self, component: DryRunComponent, enabled: bool) {
        if enabled {
            self.0.insert(component);
        } else {
            self.0.remove(&component);
        }
    }

    pub fn is_enabled(&self, component: DryRunComponent) -> bool {
        self.0.contains(&component)
    }

    /// Parse a comma-separated list such as `"k8s,optimizer"` or `"all"`.
    pub fn parse_list(list: &str) -> PolicyResult<Self> {
        if list.trim() == "all" {
            return Ok(Self::all());
        }
        let mut set = Self::default();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            set.set(item.parse()?, true);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = KeeperConfig::default();
        assert_eq!(config.cycle_interval(), Duration::from_secs(15));
        assert_eq!(config.evaluation_timeout(), Duration::from_secs(10));
        assert_eq!(config.down_nodes_timeout(), Duration::from_secs(120));
        assert_eq!(config.optimizer.prefix_input, "m_opt_input_");
        assert!(!config.dryrun.is_enabled(DryRunComponent::K8s));
    }

    #[test]
    fn parse_partial_toml() {
        let config = KeeperConfig::from_toml(
            r#"
cycle_interval_secs = 5
dryrun = ["k8s", "optimizer"]

[occopus]
infra_name = "infra"
"#,
        )
        .unwrap();
        assert_eq!(config.cycle_interval_secs, 5);
        assert_eq!(config.occopus.infra_name, "infra");
        assert_eq!(config.occopus.endpoint, "http://127.0.0.1:5000");
        assert!(config.dryrun.is_enabled(DryRunComponent::K8s));
        assert!(config.dryrun.is_enabled(DryRunComponent::Optimizer));
        assert!(!config.dryrun.is_enabled(DryRunComponent::Terraform));
    }

    #[test]
    fn unknown_dryrun_component_fails() {
        assert!(KeeperConfig::from_toml("dryrun = [\"docker\"]").is_err());
        assert!(matches!(
            DryRun::parse_list("k8s,docker"),
            Err(PolicyError::UnknownComponent(_))
        ));
    }

    #[test]
    fn dryrun_list_parsing() {
        let all = DryRun::parse_list("all").unwrap();
        for c in DryRunComponent::ALL {
            assert!(all.is_enabled(c));
        }
        let some = DryRun::parse_list("terraform, prometheus").unwrap();
        assert!(some.is_enabled(DryRunComponent::Terraform));
        assert!(some.is_enabled(DryRunComponent::Prometheus));
        assert!(!some.is_enabled(DryRunComponent::Occopus));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaleward.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:9000\"\n").unwrap();
        let config = KeeperConfig::from_file(&path).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = KeeperConfig::from_file(Path::new("/nonexistent/scaleward.toml")).unwrap_err();
        assert!(matches!(err, PolicyError::Io { .. }));
    }
}
