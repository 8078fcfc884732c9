//! Domain types for policy documents.
//!
//! Policies arrive as YAML. Optional fields are modelled as `Option` or
//! carry serde defaults; everything else is checked once by
//! [`Policy::validate`] so the session never has to re-check at access time.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PolicyError, PolicyResult};
use crate::template;

/// Root policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    /// Stack identifier; prefixes service names when set.
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub data: PolicyData,
    #[serde(default)]
    pub scaling: ScalingSection,
}

/// The `data` section: everything a rule can read besides live facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyData {
    /// Exporter endpoints (`host:port`) the metrics source should scrape.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub constants: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub queries: BTreeMap<String, QuerySpec>,
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

/// A named query: either an expression for the metrics source or a literal.
///
/// Literals appear for optimizer thresholds (`m_opt_target_minth_X: 5`)
/// and are bound without contacting the metrics source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QuerySpec {
    Expr(String),
    Literal(serde_json::Value),
}

impl QuerySpec {
    /// The query expression, if this is not a literal.
    pub fn expr(&self) -> Option<&str> {
        match self {
            QuerySpec::Expr(e) => Some(e),
            QuerySpec::Literal(_) => None,
        }
    }
}

/// An alert rule registered with the metrics source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub alert: String,
    pub expr: String,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
}

/// The `scaling` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScalingSection {
    #[serde(default, deserialize_with = "one_or_many")]
    pub nodes: Vec<NodeGroupSpec>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub services: Vec<ServiceSpec>,
    /// Free-form value carried between cycles as `m_userdata`.
    #[serde(default)]
    pub userdata: Option<serde_json::Value>,
}

/// Backend that executes node-group scaling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Orchestrator {
    #[default]
    Occopus,
    Terraform,
    #[serde(rename = "k8s", alias = "kubernetes")]
    Kubernetes,
}

impl std::fmt::Display for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Orchestrator::Occopus => "occopus",
            Orchestrator::Terraform => "terraform",
            Orchestrator::Kubernetes => "k8s",
        };
        f.write_str(s)
    }
}

/// A worker-node group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeGroupSpec {
    pub name: String,
    #[serde(default)]
    pub orchestrator: Orchestrator,
    #[serde(default = "default_min_instances")]
    pub min_instances: u32,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub scaling_rule: String,
}

/// A container service; always scaled by the container orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default = "default_min_instances")]
    pub min_instances: u32,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub scaling_rule: String,
}

/// Inclusive instance-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
}

impl Bounds {
    /// Clamp `value` into `[min, max]`. Negative values clamp to `min`.
    pub fn clamp(&self, value: i64) -> u32 {
        value.clamp(self.min as i64, self.max as i64) as u32
    }
}

fn default_min_instances() -> u32 {
    1
}

fn bounds_of(min: u32, max: Option<u32>) -> Bounds {
    Bounds {
        min,
        max: max.unwrap_or(min),
    }
}

impl NodeGroupSpec {
    pub fn bounds(&self) -> Bounds {
        bounds_of(self.min_instances, self.max_instances)
    }
}

impl ServiceSpec {
    pub fn bounds(&self) -> Bounds {
        bounds_of(self.min_instances, self.max_instances)
    }

    /// Name the container orchestrator knows this service by.
    pub fn qualified_name(&self, stack: Option<&str>) -> String {
        match stack {
            Some(stack) if !stack.is_empty() => format!("{stack}_{}", self.name),
            _ => self.name.clone(),
        }
    }
}

impl Policy {
    /// Parse and validate a YAML policy document.
    pub fn from_yaml(text: &str) -> PolicyResult<Self> {
        if text.trim().is_empty() {
            return Err(PolicyError::Empty);
        }
        let policy: Policy = serde_yaml::from_str(text)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check structural invariants the session relies on.
    pub fn validate(&self) -> PolicyResult<()> {
        let mut seen = HashSet::new();
        for node in &self.scaling.nodes {
            check_target("node group", &node.name, node.min_instances, node.max_instances, &node.scaling_rule)?;
            if !seen.insert(node.name.as_str()) {
                return Err(PolicyError::Invalid(format!(
                    "duplicate node group name \"{}\"",
                    node.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for service in &self.scaling.services {
            check_target("service", &service.name, service.min_instances, service.max_instances, &service.scaling_rule)?;
            if !seen.insert(service.name.as_str()) {
                return Err(PolicyError::Invalid(format!(
                    "duplicate service name \"{}\"",
                    service.name
                )));
            }
        }

        for alert in &self.data.alerts {
            if alert.alert.trim().is_empty() {
                return Err(PolicyError::Invalid("alert without a name".to_string()));
            }
        }
        Ok(())
    }

    /// Replace `{{ NAME }}` placeholders in every query with its constant.
    pub fn resolve_queries(&mut self) {
        if self.data.constants.is_empty() {
            return;
        }
        for query in self.data.queries.values_mut() {
            if let QuerySpec::Expr(expr) = query {
                *expr = template::render(expr, &self.data.constants);
            }
        }
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Names of alerts declared in `data.alerts`.
    pub fn alert_names(&self) -> impl Iterator<Item = &str> {
        self.data.alerts.iter().map(|a| a.alert.as_str())
    }
}

fn check_target(
    kind: &str,
    name: &str,
    min: u32,
    max: Option<u32>,
    rule: &str,
) -> PolicyResult<()> {
    if name.trim().is_empty() {
        return Err(PolicyError::Invalid(format!("{kind} without a name")));
    }
    if let Some(max) = max
        && min > max
    {
        return Err(PolicyError::Invalid(format!(
            "{kind} \"{name}\": min_instances {min} exceeds max_instances {max}"
        )));
    }
    if rule.trim().is_empty() {
        return Err(PolicyError::Invalid(format!(
            "{kind} \"{name}\": scaling_rule is empty"
        )));
    }
    Ok(())
}

/// Older policies give a single mapping where newer ones give a list.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(v)) => v,
        Some(OneOrMany::One(t)) => vec![t],
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
stack: demo
data:
  sources: ["exporter:9100"]
  constants:
    MAXCPU: 80
    JOB: node
  queries:
    CPU: 'avg(cpu{job="{{ JOB }}"})'
    m_opt_target_minth_LAT: 5
  alerts:
    - alert: high_load
      expr: 'avg(cpu) > 90'
      for: 1m
scaling:
  nodes:
    - name: worker
      orchestrator: terraform
      min_instances: 1
      max_instances: 5
      scaling_rule: "m_node_count = 2"
  services:
    - name: web
      min_instances: 2
      max_instances: 10
      scaling_rule: "m_container_count = 3"
"#;

    #[test]
    fn parse_full_policy() {
        let policy = Policy::from_yaml(POLICY).unwrap();
        assert_eq!(policy.stack(), Some("demo"));
        assert_eq!(policy.scaling.nodes.len(), 1);
        assert_eq!(policy.scaling.nodes[0].orchestrator, Orchestrator::Terraform);
        assert_eq!(policy.scaling.nodes[0].bounds(), Bounds { min: 1, max: 5 });
        assert_eq!(policy.data.alerts[0].for_duration.as_deref(), Some("1m"));
        assert_eq!(
            policy.data.queries["m_opt_target_minth_LAT"],
            QuerySpec::Literal(serde_json::json!(5))
        );
    }

    #[test]
    fn resolve_queries_renders_constants() {
        let mut policy = Policy::from_yaml(POLICY).unwrap();
        policy.resolve_queries();
        assert_eq!(
            policy.data.queries["CPU"].expr(),
            Some(r#"avg(cpu{job="node"})"#)
        );
    }

    #[test]
    fn single_node_mapping_is_accepted() {
        let text = r#"
scaling:
  nodes:
    name: worker
    max_instances: 3
    scaling_rule: "m_node_count = 1"
"#;
        let policy = Policy::from_yaml(text).unwrap();
        assert_eq!(policy.scaling.nodes.len(), 1);
        assert_eq!(policy.scaling.nodes[0].orchestrator, Orchestrator::Occopus);
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(Policy::from_yaml("  \n"), Err(PolicyError::Empty)));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let text = r#"
scaling:
  services:
    - name: web
      min_instances: 5
      max_instances: 2
      scaling_rule: "m_container_count = 1"
"#;
        assert!(matches!(Policy::from_yaml(text), Err(PolicyError::Invalid(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = r#"
scaling:
  services:
    - { name: web, scaling_rule: "x = 1" }
    - { name: web, scaling_rule: "x = 2" }
"#;
        assert!(matches!(Policy::from_yaml(text), Err(PolicyError::Invalid(_))));
    }

    #[test]
    fn missing_rule_is_rejected() {
        let text = "scaling:\n  nodes:\n    - name: worker\n";
        assert!(matches!(Policy::from_yaml(text), Err(PolicyError::Invalid(_))));
    }

    #[test]
    fn bounds_default_max_to_min() {
        let spec = ServiceSpec {
            name: "web".to_string(),
            min_instances: 2,
            max_instances: None,
            scaling_rule: "x = 1".to_string(),
        };
        assert_eq!(spec.bounds(), Bounds { min: 2, max: 2 });
    }

    #[test]
    fn bounds_clamp() {
        let b = Bounds { min: 1, max: 5 };
        assert_eq!(b.clamp(-3), 1);
        assert_eq!(b.clamp(3), 3);
        assert_eq!(b.clamp(42), 5);
    }

    #[test]
    fn qualified_service_name() {
        let policy = Policy::from_yaml(POLICY).unwrap();
        let web = &policy.scaling.services[0];
        assert_eq!(web.qualified_name(policy.stack()), "demo_web");
        assert_eq!(web.qualified_name(None), "web");
        assert_eq!(web.qualified_name(Some("")), "web");
    }
}
