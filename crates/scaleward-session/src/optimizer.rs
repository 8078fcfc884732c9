//! OptimizerBridge: feeds the advisory service and caches its advice.
//!
//! Optimizer variables are named by prefix in the policy:
//!
//! ```text
//! constants: m_opt_init_<VAR>            → init parameter VAR
//! queries:   m_opt_input_<VAR>           → input metric VAR, sampled every cycle
//!            m_opt_target_query_<VAR>    → target metric VAR, sampled every cycle
//!            m_opt_target_minth_<VAR>    → min_threshold of target VAR
//!            m_opt_target_maxth_<VAR>    → max_threshold of target VAR
//! ```
//!
//! The bridge is active only when some node group's rule mentions
//! `m_opt_advice`. When the service is disabled or unreachable, `advice()`
//! returns a fixed "invalid" placeholder instead of failing the cycle.

use std::collections::BTreeMap;

use scaleward_adapters::OptimizerClient;
use scaleward_policy::config::OptimizerConfig;
use scaleward_policy::{Policy, QuerySpec};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

/// Name under which advice is exposed to rules.
pub const ADVICE_BINDING: &str = "m_opt_advice";

/// A policy query the optimizer wants sampled every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OptVariable {
    /// Name in the policy, e.g. `m_opt_input_CPU`.
    pub lname: String,
    /// Name sent to the optimizer, e.g. `CPU`.
    pub sname: String,
    pub query: QuerySpec,
    pub target: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SampleBody {
    pub input_metrics: Vec<MetricSample>,
    pub target_metrics: Vec<MetricSample>,
    /// Unix seconds, as a string.
    pub timestamp: String,
    pub vm_number: usize,
}

/// Wire shape of one `POST sample`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Sample {
    pub sample: SampleBody,
}

pub struct OptimizerBridge {
    client: Option<OptimizerClient>,
    prefixes: OptimizerConfig,
    active: bool,
    accessible: bool,
    init_params: Map<String, Value>,
    variables: Vec<OptVariable>,
    advice: Value,
}

/// Advice returned while the optimizer cannot be consulted.
pub fn placeholder_advice(reason: &str) -> Value {
    json!({
        "valid": "False",
        "phase": "training",
        "vm_number": 0,
        "errmsg": reason,
        "confident": 0,
    })
}

impl OptimizerBridge {
    pub fn new(client: Option<OptimizerClient>, prefixes: OptimizerConfig) -> Self {
        let reason = if client.is_some() {
            "Optimizer has not been initialised"
        } else {
            "Optimizer is disabled"
        };
        Self {
            client,
            prefixes,
            active: false,
            accessible: false,
            init_params: Map::new(),
            variables: Vec::new(),
            advice: placeholder_advice(reason),
        }
    }

    /// Whether any node group asks for advice.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn variables(&self) -> &[OptVariable] {
        &self.variables
    }

    /// `{constants: {...}}` body of the init call.
    pub fn init_params(&self) -> Value {
        json!({ "constants": self.init_params })
    }

    /// Last advice received, or the placeholder.
    pub fn advice(&self) -> &Value {
        &self.advice
    }

    /// Collect init parameters and sampled variables from `policy`.
    pub fn collect(&mut self, policy: &Policy) {
        self.init_params.clear();
        self.variables.clear();
        self.active = policy
            .scaling
            .nodes
            .iter()
            .any(|n| n.scaling_rule.contains(ADVICE_BINDING));
        if !self.active {
            debug!("(O) no rule asks for advice, optimizer idle");
            return;
        }

        let p = &self.prefixes;
        for (name, value) in &policy.data.constants {
            if let Some(var) = name.strip_prefix(p.prefix_init.as_str()) {
                info!(var, %value, "(O) init parameter");
                self.init_params.insert(var.to_string(), value.clone());
            }
        }

        let mut inputs = Vec::new();
        for (name, query) in &policy.data.queries {
            if let Some(var) = name.strip_prefix(p.prefix_input.as_str()) {
                info!(var, "(O) input metric");
                inputs.push(json!({ "name": var }));
                self.variables.push(OptVariable {
                    lname: name.clone(),
                    sname: var.to_string(),
                    query: query.clone(),
                    target: false,
                });
            }
        }

        let query_prefix = format!("{}{}", p.prefix_target, p.prefix_target_query);
        let minth_prefix = format!("{}{}", p.prefix_target, p.prefix_target_minth);
        let maxth_prefix = format!("{}{}", p.prefix_target, p.prefix_target_maxth);
        let mut targets: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for (name, query) in &policy.data.queries {
            let (var, field) = if let Some(var) = name.strip_prefix(query_prefix.as_str()) {
                self.variables.push(OptVariable {
                    lname: name.clone(),
                    sname: var.to_string(),
                    query: query.clone(),
                    target: true,
                });
                (var, None)
            } else if let Some(var) = name.strip_prefix(minth_prefix.as_str()) {
                (var, Some("min_threshold"))
            } else if let Some(var) = name.strip_prefix(maxth_prefix.as_str()) {
                (var, Some("max_threshold"))
            } else {
                continue;
            };
            info!(var, field = field.unwrap_or("name"), "(O) target metric");
            let entry = targets.entry(var.to_string()).or_default();
            entry.insert("name".to_string(), json!(var));
            if let Some(field) = field {
                entry.insert(field.to_string(), query_value(query));
            }
        }

        self.init_params.insert("input_metrics".to_string(), Value::Array(inputs));
        self.init_params.insert(
            "target_metrics".to_string(),
            Value::Array(targets.into_values().map(Value::Object).collect()),
        );
        if let Some(node) = policy
            .scaling
            .nodes
            .iter()
            .find(|n| n.scaling_rule.contains(ADVICE_BINDING))
        {
            let bounds = node.bounds();
            self.init_params.insert("min_vm_number".to_string(), json!(bounds.min));
            self.init_params.insert("max_vm_number".to_string(), json!(bounds.max));
        }
    }

    /// Send the init parameters. A failure disables the optimizer for
    /// the rest of the session.
    pub async fn init(&mut self) {
        if !self.active {
            return;
        }
        let Some(client) = &self.client else {
            info!("(O) optimizer disabled, skipping init");
            return;
        };
        match client.init(&self.init_params()).await {
            Ok(()) => {
                self.accessible = true;
                info!(endpoint = client.endpoint(), "(O) optimizer initialised");
            }
            Err(e) => {
                self.accessible = false;
                warn!(error = %e, "(O) optimizer init failed, disabled for this policy");
                self.advice = placeholder_advice("Optimizer is not accessible");
            }
        }
    }

    /// Sample built from this cycle's resolved optimizer variables
    /// (`lname` → value) and the ready-node count.
    pub fn build_sample(&self, resolved: &BTreeMap<String, f64>, ready_nodes: usize, now: i64) -> Sample {
        let mut body = SampleBody {
            input_metrics: Vec::new(),
            target_metrics: Vec::new(),
            timestamp: now.to_string(),
            vm_number: ready_nodes.max(1),
        };
        for var in &self.variables {
            let Some(&value) = resolved.get(&var.lname) else {
                continue;
            };
            let sample = MetricSample {
                name: var.sname.clone(),
                value,
            };
            if var.target {
                body.target_metrics.push(sample);
            } else {
                body.input_metrics.push(sample);
            }
        }
        debug!(
            inputs = body.input_metrics.len(),
            targets = body.target_metrics.len(),
            vm_number = body.vm_number,
            "(O) sample generated"
        );
        Sample { sample: body }
    }

    /// Post `sample` and refresh the cached advice. Errors degrade to the
    /// placeholder and never fail the caller.
    pub async fn exchange(&mut self, sample: &Sample) -> &Value {
        let client = match &self.client {
            Some(client) if self.accessible => client,
            _ => return &self.advice,
        };
        if let Err(e) = client.sample(sample).await {
            warn!(error = %e, "(O) posting sample failed");
        }
        self.advice = match client.advice().await {
            Ok(advice) => advice,
            Err(e) => {
                warn!(error = %e, "(O) fetching advice failed");
                placeholder_advice(&format!("Optimizer is not accessible: {e}"))
            }
        };
        &self.advice
    }
}

fn query_value(query: &QuerySpec) -> Value {
    match query {
        QuerySpec::Expr(e) => Value::String(e.clone()),
        QuerySpec::Literal(v) => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
data:
  constants:
    m_opt_init_knowledge_base: use_existing
    MAXCPU: 80
  queries:
    m_opt_input_CPU: 'avg(cpu)'
    m_opt_target_query_LAT: 'avg(latency)'
    m_opt_target_minth_LAT: 5
    m_opt_target_maxth_LAT: 10
    OTHER: 'up'
scaling:
  nodes:
    - name: worker
      min_instances: 1
      max_instances: 6
      scaling_rule: "advice = m_opt_advice()"
"#;

    fn bridge() -> OptimizerBridge {
        let policy = Policy::from_yaml(POLICY).unwrap();
        let mut bridge = OptimizerBridge::new(None, OptimizerConfig::default());
        bridge.collect(&policy);
        bridge
    }

    #[test]
    fn init_params_follow_prefixes() {
        let bridge = bridge();
        assert!(bridge.is_active());
        let params = bridge.init_params();
        let constants = &params["constants"];
        assert_eq!(constants["knowledge_base"], "use_existing");
        assert!(constants.get("MAXCPU").is_none());
        assert_eq!(constants["input_metrics"], json!([{"name": "CPU"}]));
        assert_eq!(
            constants["target_metrics"],
            json!([{"name": "LAT", "min_threshold": 5, "max_threshold": 10}])
        );
        assert_eq!(constants["min_vm_number"], 1);
        assert_eq!(constants["max_vm_number"], 6);
        assert_eq!(bridge.variables().len(), 2);
    }

    #[test]
    fn sample_splits_inputs_and_targets() {
        let bridge = bridge();
        let resolved = BTreeMap::from([
            ("m_opt_input_CPU".to_string(), 55.0),
            ("m_opt_target_query_LAT".to_string(), 7.5),
            ("OTHER".to_string(), 1.0),
        ]);
        let sample = bridge.build_sample(&resolved, 0, 1_700_000_000);
        assert_eq!(sample.sample.vm_number, 1);
        assert_eq!(sample.sample.timestamp, "1700000000");
        assert_eq!(
            sample.sample.input_metrics,
            vec![MetricSample { name: "CPU".into(), value: 55.0 }]
        );
        assert_eq!(
            sample.sample.target_metrics,
            vec![MetricSample { name: "LAT".into(), value: 7.5 }]
        );
    }

    #[tokio::test]
    async fn disabled_optimizer_returns_placeholder() {
        let mut bridge = bridge();
        bridge.init().await;
        let sample = bridge.build_sample(&BTreeMap::new(), 3, 0);
        let advice = bridge.exchange(&sample).await;
        assert_eq!(advice["valid"], "False");
        assert_eq!(advice["phase"], "training");
        assert_eq!(advice["vm_number"], 0);
    }

    #[tokio::test]
    async fn unreachable_optimizer_degrades_to_placeholder() {
        let policy = Policy::from_yaml(POLICY).unwrap();
        let client = OptimizerClient::new("http://127.0.0.1:1");
        let mut bridge = OptimizerBridge::new(Some(client), OptimizerConfig::default());
        bridge.collect(&policy);
        bridge.init().await;
        let advice = bridge.exchange(&bridge.build_sample(&BTreeMap::new(), 1, 0)).await;
        assert_eq!(advice["valid"], "False");
        assert!(advice["errmsg"].as_str().unwrap().contains("not accessible"));
    }

    #[test]
    fn inactive_without_advice_in_rules() {
        let policy = Policy::from_yaml(
            "scaling:\n  nodes:\n    - name: w\n      scaling_rule: 'm_node_count = 1'\n",
        )
        .unwrap();
        let mut bridge = OptimizerBridge::new(None, OptimizerConfig::default());
        bridge.collect(&policy);
        assert!(!bridge.is_active());
        assert!(bridge.variables().is_empty());
    }
}
