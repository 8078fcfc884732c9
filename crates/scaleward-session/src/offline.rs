//! One cycle against caller-supplied metric and alert results.

use std::collections::BTreeMap;
use std::sync::Arc;

use scaleward_adapters::{NodeInfo, SimulatedAdapter, StaticMetrics};
use scaleward_health::{Alert, AlertBatch};
use scaleward_policy::{Policy, QuerySpec};
use scaleward_rules::SinkWriter;
use serde::Deserialize;
use tracing::{info, warn};

use crate::backends::{Backends, SessionSettings};
use crate::controller::SessionController;
use crate::decision::CycleReport;
use crate::error::SessionResult;

/// Observed facts standing in for the live collaborators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfflineInputs {
    /// Query name → value.
    #[serde(default)]
    pub queries: BTreeMap<String, f64>,
    /// Names of alerts to treat as firing.
    #[serde(default)]
    pub alerts: Vec<String>,
    /// Current instance count per node group or service name. Targets
    /// left out start from `min_instances`.
    #[serde(default)]
    pub counts: BTreeMap<String, u32>,
    /// Ready nodes.
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// Evaluate every target of `policy` once, with simulated infrastructure,
/// and report what would have been dispatched.
pub async fn evaluate_offline(
    policy: Policy,
    inputs: OfflineInputs,
    settings: SessionSettings,
    sink: SinkWriter,
) -> SessionResult<CycleReport> {
    let mut rendered = policy.clone();
    rendered.resolve_queries();

    let mut metrics = StaticMetrics::new();
    for (name, value) in &inputs.queries {
        match rendered.data.queries.get(name) {
            Some(QuerySpec::Expr(expr)) => metrics.insert(expr.clone(), *value),
            Some(QuerySpec::Literal(_)) => {
                warn!(query = %name, "query is a literal in the policy, supplied value ignored")
            }
            None => warn!(query = %name, "query not defined in the policy, ignoring"),
        }
    }

    let mut sim = SimulatedAdapter::new().with_ready_nodes(inputs.nodes);
    for node in &policy.scaling.nodes {
        if let Some(&count) = inputs.counts.get(&node.name) {
            sim = sim.with_count(node.name.clone(), count);
        }
    }
    for service in &policy.scaling.services {
        if let Some(&count) = inputs.counts.get(&service.name) {
            sim = sim.with_count(service.qualified_name(policy.stack()), count);
        }
    }

    let backends = Backends::simulated(metrics, Arc::new(sim));
    let mut controller = SessionController::new(policy, settings, backends, sink)?;
    controller.prepare().await;
    controller.fire_alerts(&AlertBatch {
        alerts: inputs
            .alerts
            .iter()
            .map(|name| Alert::firing(name, ""))
            .collect(),
    });
    let report = controller.run_cycle().await;
    info!(decisions = report.decisions.len(), "offline evaluation finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use scaleward_rules::OutputSink;

    use super::*;
    use crate::decision::{DecisionStatus, TargetKind};

    const POLICY: &str = r#"
stack: demo
data:
  constants:
    JOB: node
    MAXCPU: 80
  queries:
    CPU: 'avg(cpu{job="{{ JOB }}"})'
  alerts:
    - alert: overload
      expr: 'CPU > 95'
scaling:
  nodes:
    - name: worker
      min_instances: 1
      max_instances: 4
      scaling_rule: |
        if CPU > MAXCPU or overload:
          m_node_count += 1
  services:
    - name: web
      min_instances: 1
      max_instances: 10
      scaling_rule: "m_container_count = len(m_nodes) * 2"
"#;

    #[tokio::test]
    async fn supplied_values_drive_one_cycle() {
        let sink = OutputSink::start();
        let inputs = OfflineInputs {
            queries: BTreeMap::from([("CPU".to_string(), 90.0)]),
            counts: BTreeMap::from([("worker".to_string(), 2), ("web".to_string(), 1)]),
            nodes: vec![NodeInfo::new("n1", "10.0.0.1"), NodeInfo::new("n2", "10.0.0.2")],
            ..OfflineInputs::default()
        };
        let report = evaluate_offline(
            Policy::from_yaml(POLICY).unwrap(),
            inputs,
            SessionSettings::default(),
            sink.writer(),
        )
        .await
        .unwrap();

        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(worker.status, DecisionStatus::Applied);
        assert_eq!(worker.inputs["CPU"], 90.0);
        assert_eq!(worker.inputs["overload"], false);
        assert_eq!(worker.count(), Some(3));

        let web = report.decision(TargetKind::Service, "web").unwrap();
        assert_eq!(web.action.as_ref().unwrap().target, "demo_web");
        assert_eq!(web.count(), Some(4));
        sink.stop().await;
    }

    #[tokio::test]
    async fn alerts_are_treated_as_firing() {
        let sink = OutputSink::start();
        let inputs = OfflineInputs {
            queries: BTreeMap::from([("CPU".to_string(), 10.0)]),
            alerts: vec!["overload".to_string()],
            ..OfflineInputs::default()
        };
        let report = evaluate_offline(
            Policy::from_yaml(POLICY).unwrap(),
            inputs,
            SessionSettings::default(),
            sink.writer(),
        )
        .await
        .unwrap();
        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(worker.inputs["overload"], true);
        assert_eq!(worker.count(), Some(2));
    }

    #[tokio::test]
    async fn missing_metric_skips_the_target() {
        let sink = OutputSink::start();
        let report = evaluate_offline(
            Policy::from_yaml(POLICY).unwrap(),
            OfflineInputs::default(),
            SessionSettings::default(),
            sink.writer(),
        )
        .await
        .unwrap();
        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(worker.status, DecisionStatus::Skipped);
        let web = report.decision(TargetKind::Service, "web").unwrap();
        assert_eq!(web.count(), Some(1));
    }
}
