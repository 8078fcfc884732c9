//! SessionController: the per-cycle control loop of one policy.
//!
//! ```text
//! Preparing ─▶ Running ─▶ Stopping ─▶ Stopped
//!               │  ▲
//!               ▼  │
//!    maintenance → node groups (batched per orchestrator) → services
//!               │  ▲
//!               └──┴── interruptible sleep (stop signal, alert commands)
//! ```
//!
//! The controller is the single owner of its [`DownNodeTracker`] and
//! [`AlertRegistry`]. Other tasks reach the registry only through
//! [`AlertCommand`]s, which the loop applies while it sleeps.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use scaleward_adapters::{
    AdapterResult, InfraAdapter, MetricResult, NodeFilter, NodeInfo, ScaleAction, ScaleRequest,
};
use scaleward_health::{AlertBatch, AlertRegistry, DownNodeTracker};
use scaleward_policy::{Bounds, Orchestrator, Policy, PolicyError, QuerySpec};
use scaleward_rules::{Bindings, Callable, RuleEvaluator, SinkWriter, Value};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::backends::{Backends, SessionSettings};
use crate::decision::{CycleReport, Decision, TargetKind};
use crate::error::SessionResult;
use crate::handle::AlertCommand;
use crate::optimizer::{ADVICE_BINDING, OptimizerBridge};

pub const NODE_COUNT: &str = "m_node_count";
pub const NODES: &str = "m_nodes";
pub const NODES_TODROP: &str = "m_nodes_todrop";
pub const CONTAINER_COUNT: &str = "m_container_count";
pub const NODE_COUNT_AGE: &str = "m_time_since_node_count_changed";
pub const CONTAINER_COUNT_AGE: &str = "m_time_since_container_count_changed";
pub const USERDATA: &str = "m_userdata";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Preparing,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Preparing => "preparing",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        })
    }
}

impl TargetKind {
    fn count_binding(self) -> &'static str {
        match self {
            TargetKind::Node => NODE_COUNT,
            TargetKind::Service => CONTAINER_COUNT,
        }
    }

    fn age_binding(self) -> &'static str {
        match self {
            TargetKind::Node => NODE_COUNT_AGE,
            TargetKind::Service => CONTAINER_COUNT_AGE,
        }
    }

    fn outputs(self) -> &'static [&'static str] {
        match self {
            TargetKind::Node => &[NODE_COUNT, NODES_TODROP, USERDATA],
            TargetKind::Service => &[CONTAINER_COUNT, USERDATA],
        }
    }
}

/// A scaling target and the state it carries between cycles.
struct TargetState {
    kind: TargetKind,
    name: String,
    /// Name the adapter knows the target by.
    adapter_target: String,
    orchestrator: Option<Orchestrator>,
    adapter: Arc<dyn InfraAdapter>,
    rule: String,
    bounds: Bounds,
    count: u32,
    /// Unix seconds of the last count change.
    changed_at: i64,
    inputs: Bindings,
    outputs: Bindings,
}

impl TargetState {
    fn set_count(&mut self, count: u32, changed_at: i64) {
        self.count = count;
        self.changed_at = changed_at;
        self.outputs
            .insert(self.kind.count_binding().to_string(), Value::Int(count as i64));
    }
}

/// Target count and change time before a decision, restored if dispatch fails.
#[derive(Clone, Copy)]
struct Checkpoint {
    target: usize,
    count: u32,
    changed_at: i64,
}

pub struct SessionController {
    policy: Policy,
    settings: SessionSettings,
    backends: Backends,
    evaluator: RuleEvaluator,
    targets: Vec<TargetState>,
    userdata: Value,
    tracker: DownNodeTracker,
    alerts: AlertRegistry,
    optimizer: OptimizerBridge,
    phase: watch::Sender<Phase>,
}

impl SessionController {
    /// Validate `policy`, render its query templates and bind every target
    /// to its adapter. Fails only on configuration problems.
    pub fn new(
        mut policy: Policy,
        settings: SessionSettings,
        backends: Backends,
        sink: SinkWriter,
    ) -> SessionResult<Self> {
        policy.validate()?;
        policy.resolve_queries();

        let mut targets = Vec::new();
        for node in &policy.scaling.nodes {
            let adapter = backends
                .node_adapter(node.orchestrator)
                .cloned()
                .ok_or_else(|| {
                    PolicyError::Invalid(format!(
                        "node group \"{}\": no {} adapter configured",
                        node.name, node.orchestrator
                    ))
                })?;
            targets.push(TargetState {
                kind: TargetKind::Node,
                name: node.name.clone(),
                adapter_target: node.name.clone(),
                orchestrator: Some(node.orchestrator),
                adapter,
                rule: node.scaling_rule.clone(),
                bounds: node.bounds(),
                count: node.bounds().min,
                changed_at: 0,
                inputs: Bindings::new(),
                outputs: Bindings::new(),
            });
        }
        for service in &policy.scaling.services {
            targets.push(TargetState {
                kind: TargetKind::Service,
                name: service.name.clone(),
                adapter_target: service.qualified_name(policy.stack()),
                orchestrator: None,
                adapter: backends.containers.clone(),
                rule: service.scaling_rule.clone(),
                bounds: service.bounds(),
                count: service.bounds().min,
                changed_at: 0,
                inputs: Bindings::new(),
                outputs: Bindings::new(),
            });
        }

        let userdata = policy
            .scaling
            .userdata
            .as_ref()
            .map(Value::from_json)
            .unwrap_or(Value::None);
        let evaluator = RuleEvaluator::new(sink).with_timeout(settings.evaluation_timeout);
        let optimizer = OptimizerBridge::new(backends.optimizer.clone(), settings.optimizer.clone());
        let (phase, _) = watch::channel(Phase::Preparing);

        Ok(Self {
            tracker: DownNodeTracker::new(settings.down_nodes_timeout),
            alerts: AlertRegistry::new(),
            policy,
            settings,
            backends,
            evaluator,
            targets,
            userdata,
            optimizer,
            phase,
        })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watch phase transitions from another task.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Tracked instance count of a node group or service.
    pub fn target_count(&self, kind: TargetKind, name: &str) -> Option<u32> {
        self.targets
            .iter()
            .find(|t| t.kind == kind && t.name == name)
            .map(|t| t.count)
    }

    /// Bindings the last evaluation of a target produced.
    pub fn target_outputs(&self, kind: TargetKind, name: &str) -> Option<&Bindings> {
        self.targets
            .iter()
            .find(|t| t.kind == kind && t.name == name)
            .map(|t| &t.outputs)
    }

    /// Bindings the last evaluation of a target was given.
    pub fn target_inputs(&self, kind: TargetKind, name: &str) -> Option<&Bindings> {
        self.targets
            .iter()
            .find(|t| t.kind == kind && t.name == name)
            .map(|t| &t.inputs)
    }

    pub fn userdata(&self) -> &Value {
        &self.userdata
    }

    pub fn alerts(&self) -> &AlertRegistry {
        &self.alerts
    }

    pub fn fire_alerts(&mut self, batch: &AlertBatch) -> Vec<String> {
        self.alerts.add(batch)
    }

    /// Forget one alert, or all of them. Returns how many were removed.
    pub fn reset_alerts(&mut self, name: Option<&str>) -> usize {
        match name {
            Some(name) => usize::from(self.alerts.remove(name)),
            None => self.alerts.clear(),
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
        info!(%phase, stack = ?self.policy.stack(), "session phase changed");
    }

    /// Register sources and alert rules, seed target counts from the
    /// infrastructure and initialise the optimizer.
    pub async fn prepare(&mut self) {
        self.set_phase(Phase::Preparing);
        let metrics = self.backends.metrics.clone();
        if let Err(e) = metrics.register_sources(&self.policy.data.sources).await {
            warn!(error = %e, "registering exporter sources failed");
        }
        if let Err(e) = metrics.register_alert_rules(&self.policy.data.alerts).await {
            warn!(error = %e, "registering alert rules failed");
        }

        let now = chrono::Utc::now().timestamp();
        for target in &mut self.targets {
            let observed = match target.adapter.query_current_count(&target.adapter_target).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(
                        kind = %target.kind,
                        name = %target.name,
                        backend = target.adapter.name(),
                        error = %e,
                        "(C) current count unavailable, starting from min_instances"
                    );
                    target.bounds.min
                }
            };
            let count = target.bounds.clamp(observed as i64);
            info!(kind = %target.kind, name = %target.name, observed, count, "(C) initial count");
            target.set_count(count, now);
        }

        self.optimizer.collect(&self.policy);
        self.optimizer.init().await;
    }

    /// Run one cycle at the current wall-clock time.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_at(chrono::Utc::now().timestamp()).await
    }

    /// Run one cycle as of `now` (Unix seconds).
    pub async fn run_cycle_at(&mut self, now: i64) -> CycleReport {
        let mut report = CycleReport {
            started_at: now,
            ..CycleReport::default()
        };
        let containers = self.backends.containers.clone();

        match containers.list_nodes(NodeFilter::Down).await {
            Ok(down) => {
                report.removed_nodes = self.tracker.reconcile_at(&down, now, containers.as_ref()).await;
            }
            Err(e) => warn!(backend = containers.name(), error = %e, "(M) listing down nodes failed"),
        }
        let ready = match containers.list_nodes(NodeFilter::Ready).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(backend = containers.name(), error = %e, "(Q) listing ready nodes failed");
                Vec::new()
            }
        };

        let mut queued: BTreeMap<Orchestrator, Vec<(usize, Checkpoint)>> = BTreeMap::new();
        for idx in 0..self.targets.len() {
            if self.targets[idx].kind != TargetKind::Node {
                continue;
            }
            let checkpoint = self.checkpoint(idx);
            let decision = self.evaluate_target(idx, &ready, now).await;
            if decision.action.is_some() {
                if let Some(orchestrator) = self.targets[idx].orchestrator {
                    queued
                        .entry(orchestrator)
                        .or_default()
                        .push((report.decisions.len(), checkpoint));
                }
            }
            report.decisions.push(decision);
        }
        for (orchestrator, entries) in queued {
            self.dispatch_batch(orchestrator, &entries, &mut report.decisions).await;
        }

        for idx in 0..self.targets.len() {
            if self.targets[idx].kind != TargetKind::Service {
                continue;
            }
            let checkpoint = self.checkpoint(idx);
            let mut decision = self.evaluate_target(idx, &ready, now).await;
            if let Some(request) = &decision.action {
                let adapter = self.targets[idx].adapter.clone();
                if let Err(e) = dispatch_one(adapter.as_ref(), request).await {
                    error!(
                        service = %decision.target,
                        backend = adapter.name(),
                        error = %e,
                        "(S) scaling service failed"
                    );
                    decision.fail(e.to_string());
                    self.restore(checkpoint);
                }
            }
            report.decisions.push(decision);
        }
        report
    }

    fn checkpoint(&self, target: usize) -> Checkpoint {
        Checkpoint {
            target,
            count: self.targets[target].count,
            changed_at: self.targets[target].changed_at,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.targets[checkpoint.target].set_count(checkpoint.count, checkpoint.changed_at);
    }

    async fn dispatch_batch(
        &mut self,
        orchestrator: Orchestrator,
        entries: &[(usize, Checkpoint)],
        decisions: &mut [Decision],
    ) {
        let requests: Vec<ScaleRequest> = entries
            .iter()
            .filter_map(|(d, _)| decisions[*d].action.clone())
            .collect();
        let Some(adapter) = self.backends.node_adapter(orchestrator).cloned() else {
            return;
        };
        info!(%orchestrator, backend = adapter.name(), requests = requests.len(), "(S) dispatching node batch");
        if let Err(e) = adapter.scale_batch(&requests).await {
            error!(%orchestrator, backend = adapter.name(), error = %e, "(S) scaling node groups failed");
            for (d, checkpoint) in entries {
                decisions[*d].fail(e.to_string());
                self.restore(*checkpoint);
            }
        }
    }

    /// Gather inputs for one target, evaluate its rule and turn the result
    /// into a clamped action. The target's count is updated optimistically.
    async fn evaluate_target(&mut self, idx: usize, ready: &[NodeInfo], now: i64) -> Decision {
        let (kind, name, rule) = {
            let t = &self.targets[idx];
            (t.kind, t.name.clone(), t.rule.clone())
        };
        let mut decision = Decision::new(kind, &name);

        let metrics = match self.resolve_metrics(&rule, &name).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(%kind, %name, phase = "resolve", error = %e, "(Q) metric unavailable, skipping target this cycle");
                decision.skip(e.to_string());
                decision.outputs = bindings_json(&self.targets[idx].outputs);
                return decision;
            }
        };

        let mut inputs = Bindings::new();
        for (constant, value) in &self.policy.data.constants {
            inputs.insert(constant.clone(), Value::from_json(value));
        }
        inputs.extend(metrics);

        let consulted: BTreeSet<String> = self
            .policy
            .alert_names()
            .chain(self.alerts.names())
            .filter(|alert| rule.contains(alert))
            .map(str::to_string)
            .collect();
        for alert in &consulted {
            let firing = self.alerts.contains(alert);
            if firing {
                info!(%kind, %name, %alert, "(A) alert seen by rule");
            }
            inputs.insert(alert.clone(), Value::Bool(firing));
        }

        {
            let target = &self.targets[idx];
            inputs.insert(kind.count_binding().to_string(), Value::Int(target.count as i64));
            inputs.insert(kind.age_binding().to_string(), Value::Int(now - target.changed_at));
        }
        if kind == TargetKind::Service {
            inputs.insert(NODE_COUNT.to_string(), Value::Int(ready.len() as i64));
        }
        inputs.insert(NODES.to_string(), nodes_binding(ready));
        inputs.insert(USERDATA.to_string(), self.userdata.clone());

        if kind == TargetKind::Node && self.optimizer.is_active() && rule.contains(ADVICE_BINDING) {
            let advice = self.consult_optimizer(ready.len(), now).await;
            inputs.insert(
                ADVICE_BINDING.to_string(),
                Value::Callable(Callable::Constant(Box::new(Value::from_json(&advice)))),
            );
        }

        decision.inputs = bindings_json(&inputs);
        debug!(%kind, %name, inputs = %decision.inputs, "evaluating scaling rule");
        let result = self.evaluator.evaluate(&rule, &inputs, kind.outputs()).await;

        for alert in &consulted {
            self.alerts.remove(alert);
        }

        let target = &mut self.targets[idx];
        target.inputs = inputs;
        let mut outputs = match result {
            Ok(outputs) => outputs,
            Err(e) => {
                if e.is_timeout() {
                    error!(%kind, %name, phase = "evaluate", error = %e, "scaling rule timed out");
                } else {
                    error!(%kind, %name, phase = "evaluate", error = %e, "scaling rule failed");
                }
                decision.fail(e.to_string());
                decision.outputs = bindings_json(&target.outputs);
                return decision;
            }
        };

        let previous = target.count;
        let todrop = match outputs.get(NODES_TODROP) {
            Some(value) if kind == TargetKind::Node => drop_list(value),
            _ => Vec::new(),
        };
        let request = if todrop.is_empty() {
            let count = match outputs.get(kind.count_binding()) {
                Some(value) => match value.as_i64() {
                    Some(requested) => {
                        let count = target.bounds.clamp(requested);
                        if count as i64 != requested {
                            debug!(%kind, %name, requested, count, "(S) count clamped to bounds");
                        }
                        count
                    }
                    None => {
                        warn!(%kind, %name, value = %value.repr(), "rule set a non-numeric count, keeping {previous}");
                        previous
                    }
                },
                None => previous,
            };
            ScaleRequest::set_count(&target.adapter_target, count)
        } else {
            let count = target.bounds.clamp(previous as i64 - todrop.len() as i64);
            info!(%kind, %name, nodes = ?todrop, count, "(S) dropping nodes");
            ScaleRequest::drop(&target.adapter_target, todrop, count)
        };

        let count = request.action.resulting_count();
        if count != previous {
            info!(%kind, %name, from = previous, to = count, "(S) count changed");
            target.set_count(count, now);
        } else {
            target.set_count(count, target.changed_at);
        }
        if let Some(userdata) = outputs.remove(USERDATA) {
            self.userdata = userdata.clone();
            outputs.insert(USERDATA.to_string(), userdata);
        }
        outputs.insert(kind.count_binding().to_string(), Value::Int(count as i64));
        target.outputs = outputs;

        decision.outputs = bindings_json(&target.outputs);
        decision.action = Some(request);
        decision
    }

    /// Resolve every query whose name appears in `rule`. The first metric
    /// failure aborts the lot.
    async fn resolve_metrics(&self, rule: &str, name: &str) -> MetricResult<Bindings> {
        let mut resolved = Bindings::new();
        for (query_name, query) in &self.policy.data.queries {
            if !rule.contains(query_name.as_str()) {
                continue;
            }
            let value = match query {
                QuerySpec::Expr(expr) => {
                    let value = self.backends.metrics.resolve(expr).await?;
                    debug!(%name, query = %query_name, value, "(Q) metric resolved");
                    Value::Float(value)
                }
                QuerySpec::Literal(value) => Value::from_json(value),
            };
            resolved.insert(query_name.clone(), value);
        }
        Ok(resolved)
    }

    /// Sample every optimizer variable, post the sample and return the
    /// refreshed advice.
    async fn consult_optimizer(&mut self, ready_nodes: usize, now: i64) -> serde_json::Value {
        let mut resolved = BTreeMap::new();
        for var in self.optimizer.variables() {
            let value = match &var.query {
                QuerySpec::Expr(expr) => match self.backends.metrics.resolve(expr).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(var = %var.lname, error = %e, "(O) optimizer variable unavailable");
                        continue;
                    }
                },
                QuerySpec::Literal(value) => match value.as_f64() {
                    Some(value) => value,
                    None => continue,
                },
            };
            resolved.insert(var.lname.clone(), value);
        }
        let sample = self.optimizer.build_sample(&resolved, ready_nodes, now);
        self.optimizer.exchange(&sample).await.clone()
    }

    /// Drive the session until `stop` flips to `true` or its sender goes
    /// away. Alert commands are applied between cycles.
    pub async fn run(
        mut self,
        mut stop: watch::Receiver<bool>,
        mut commands: mpsc::Receiver<AlertCommand>,
    ) {
        self.prepare().await;
        self.set_phase(Phase::Running);

        'cycles: loop {
            if *stop.borrow() {
                break;
            }
            let report = self.run_cycle().await;
            debug!(
                decisions = report.decisions.len(),
                removed_nodes = report.removed_nodes.len(),
                "cycle finished"
            );

            let sleep = tokio::time::sleep(self.settings.cycle_interval);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break 'cycles;
                        }
                    }
                    Some(command) = commands.recv() => self.apply(command),
                }
            }
        }

        self.teardown().await;
    }

    fn apply(&mut self, command: AlertCommand) {
        match command {
            AlertCommand::Fire { batch, reply } => {
                let _ = reply.send(self.fire_alerts(&batch));
            }
            AlertCommand::Reset { name, reply } => {
                let _ = reply.send(self.reset_alerts(name.as_deref()));
            }
        }
    }

    /// Undo what `prepare` registered. Runs once, at the end of `run`.
    pub async fn teardown(&mut self) {
        self.set_phase(Phase::Stopping);
        let metrics = self.backends.metrics.clone();
        if let Err(e) = metrics.deregister_sources().await {
            warn!(error = %e, "deregistering exporter sources failed");
        }
        if let Err(e) = metrics.clear_alert_rules().await {
            warn!(error = %e, "removing alert rules failed");
        }
        self.alerts.clear();
        self.set_phase(Phase::Stopped);
    }
}

async fn dispatch_one(
    adapter: &dyn InfraAdapter,
    request: &ScaleRequest,
) -> AdapterResult<()> {
    match &request.action {
        ScaleAction::SetCount { count } => adapter.scale(&request.target, *count).await,
        ScaleAction::Drop { instances, .. } => {
            adapter.drop_instances(&request.target, instances).await
        }
    }
}

fn nodes_binding(nodes: &[NodeInfo]) -> Value {
    Value::List(
        nodes
            .iter()
            .map(|n| {
                Value::Dict(BTreeMap::from([
                    ("ID".to_string(), Value::Str(n.id.clone())),
                    ("Addr".to_string(), Value::Str(n.addr.clone())),
                ]))
            })
            .collect(),
    )
}

/// Node ids named by `m_nodes_todrop`: plain ids or `{ID, ...}` dicts.
fn drop_list(value: &Value) -> Vec<String> {
    let items = match value {
        Value::List(items) | Value::Tuple(items) => items,
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Str(id) => Some(id.clone()),
            Value::Dict(node) => node.get("ID").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect()
}

fn bindings_json(bindings: &Bindings) -> serde_json::Value {
    serde_json::Value::Object(
        bindings
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scaleward_adapters::{AdapterCall, SimulatedAdapter, StaticMetrics};
    use scaleward_health::Alert;

    use super::*;
    use crate::decision::DecisionStatus;

    fn settings() -> SessionSettings {
        SessionSettings {
            cycle_interval: Duration::from_secs(15),
            evaluation_timeout: Duration::from_secs(5),
            down_nodes_timeout: Duration::from_secs(120),
            ..SessionSettings::default()
        }
    }

    fn controller(yaml: &str, metrics: StaticMetrics, sim: Arc<SimulatedAdapter>) -> SessionController {
        let policy = Policy::from_yaml(yaml).unwrap();
        let sink = scaleward_rules::OutputSink::start();
        SessionController::new(policy, settings(), Backends::simulated(metrics, sim), sink.writer())
            .unwrap()
    }

    const TWO_GROUPS: &str = r#"
stack: demo
data:
  constants:
    MAXCPU: 80
  queries:
    CPU: 'avg(cpu)'
scaling:
  nodes:
    - name: worker
      min_instances: 1
      max_instances: 5
      scaling_rule: |
        if CPU > MAXCPU:
          m_node_count += 10
    - name: spare
      orchestrator: terraform
      min_instances: 2
      max_instances: 3
      scaling_rule: "m_node_count = -4"
  services:
    - name: web
      min_instances: 1
      max_instances: 4
      scaling_rule: "m_container_count = m_node_count + 1"
"#;

    #[tokio::test]
    async fn counts_are_clamped_and_node_groups_batched() {
        let sim = Arc::new(
            SimulatedAdapter::new()
                .with_count("worker", 2)
                .with_count("spare", 3)
                .with_ready_nodes(vec![NodeInfo::new("n1", "10.0.0.1"), NodeInfo::new("n2", "10.0.0.2")]),
        );
        let mut ctl = controller(TWO_GROUPS, StaticMetrics::new().with("avg(cpu)", 95.0), sim.clone());
        ctl.prepare().await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));

        let report = ctl.run_cycle_at(1_000).await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(5));
        assert_eq!(ctl.target_count(TargetKind::Node, "spare"), Some(2));
        assert_eq!(ctl.target_count(TargetKind::Service, "web"), Some(3));
        assert!(report.decisions.iter().all(|d| d.status == DecisionStatus::Applied));

        // Both orchestrators map to the same simulator here: one batch each,
        // in orchestrator order, then the service on its own.
        let actions = sim.actions().await;
        assert_eq!(
            actions,
            vec![
                AdapterCall::Batch(vec![ScaleRequest::set_count("worker", 5)]),
                AdapterCall::Batch(vec![ScaleRequest::set_count("spare", 2)]),
                AdapterCall::Scale { target: "demo_web".into(), count: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn count_stays_in_bounds_across_cycles() {
        let yaml = r#"
scaling:
  nodes:
    - name: worker
      min_instances: 2
      max_instances: 4
      scaling_rule: "m_node_count = m_node_count * 3 - 7"
"#;
        let sim = Arc::new(SimulatedAdapter::new().with_count("worker", 3));
        let mut ctl = controller(yaml, StaticMetrics::new(), sim);
        ctl.prepare().await;
        for cycle in 0..5 {
            ctl.run_cycle_at(cycle * 15).await;
            let count = ctl.target_count(TargetKind::Node, "worker").unwrap();
            assert!((2..=4).contains(&count), "count {count} out of bounds");
            let outputs = ctl.target_outputs(TargetKind::Node, "worker").unwrap();
            assert_eq!(outputs.get(NODE_COUNT), Some(&Value::Int(count as i64)));
        }
    }

    #[tokio::test]
    async fn initial_count_falls_back_to_min_instances() {
        let sim = Arc::new(SimulatedAdapter::new());
        let mut ctl = controller(TWO_GROUPS, StaticMetrics::new().with("avg(cpu)", 10.0), sim);
        ctl.prepare().await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(1));
        assert_eq!(ctl.target_count(TargetKind::Node, "spare"), Some(2));
        assert_eq!(ctl.target_count(TargetKind::Service, "web"), Some(1));
    }

    #[tokio::test]
    async fn failing_metric_skips_only_that_target() {
        let sim = Arc::new(SimulatedAdapter::new().with_count("worker", 2).with_count("spare", 2));
        // avg(cpu) unknown to the static source: worker is skipped.
        let mut ctl = controller(TWO_GROUPS, StaticMetrics::new(), sim.clone());
        ctl.prepare().await;
        let report = ctl.run_cycle_at(100).await;

        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(worker.status, DecisionStatus::Skipped);
        assert!(worker.action.is_none());
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));

        let spare = report.decision(TargetKind::Node, "spare").unwrap();
        assert_eq!(spare.status, DecisionStatus::Applied);
        assert_eq!(spare.count(), Some(2));
    }

    #[tokio::test]
    async fn rule_errors_do_not_abort_the_cycle() {
        let yaml = r#"
scaling:
  nodes:
    - name: broken
      scaling_rule: "def f():\n  pass"
    - name: slow
      scaling_rule: |
        while True:
          pass
    - name: fine
      min_instances: 1
      max_instances: 3
      scaling_rule: "m_node_count = 3"
"#;
        let sim = Arc::new(SimulatedAdapter::new());
        let policy = Policy::from_yaml(yaml).unwrap();
        let mut settings = settings();
        settings.evaluation_timeout = Duration::from_millis(200);
        let sink = scaleward_rules::OutputSink::start();
        let mut ctl = SessionController::new(
            policy,
            settings,
            Backends::simulated(StaticMetrics::new(), sim),
            sink.writer(),
        )
        .unwrap();
        ctl.prepare().await;
        let report = ctl.run_cycle_at(0).await;

        let broken = report.decision(TargetKind::Node, "broken").unwrap();
        assert_eq!(broken.status, DecisionStatus::Failed);
        let slow = report.decision(TargetKind::Node, "slow").unwrap();
        assert!(slow.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.decision(TargetKind::Node, "fine").unwrap().count(), Some(3));
    }

    #[tokio::test]
    async fn failed_dispatch_reverts_the_count() {
        let yaml = r#"
scaling:
  services:
    - name: web
      min_instances: 1
      max_instances: 9
      scaling_rule: "m_container_count = 7"
"#;
        let sim = Arc::new(SimulatedAdapter::new().fail_target("web"));
        let mut ctl = controller(yaml, StaticMetrics::new(), sim);
        ctl.prepare().await;
        let report = ctl.run_cycle_at(10).await;
        let web = report.decision(TargetKind::Service, "web").unwrap();
        assert_eq!(web.status, DecisionStatus::Failed);
        assert_eq!(ctl.target_count(TargetKind::Service, "web"), Some(1));
    }

    #[tokio::test]
    async fn drop_list_reduces_count_to_at_least_min() {
        let yaml = r#"
scaling:
  nodes:
    - name: worker
      min_instances: 2
      max_instances: 6
      scaling_rule: |
        m_nodes_todrop = []
        for node in m_nodes:
          m_nodes_todrop.append(node["ID"])
"#;
        let ready = vec![
            NodeInfo::new("n1", "10.0.0.1"),
            NodeInfo::new("n2", "10.0.0.2"),
            NodeInfo::new("n3", "10.0.0.3"),
        ];
        let sim = Arc::new(SimulatedAdapter::new().with_count("worker", 4).with_ready_nodes(ready));
        let mut ctl = controller(yaml, StaticMetrics::new(), sim.clone());
        ctl.prepare().await;
        let report = ctl.run_cycle_at(0).await;
        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(
            worker.action,
            Some(ScaleRequest::drop(
                "worker",
                vec!["n1".into(), "n2".into(), "n3".into()],
                2
            ))
        );
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));
    }

    #[tokio::test]
    async fn alerts_are_seen_once_then_removed() {
        let yaml = r#"
data:
  alerts:
    - alert: high_load
      expr: 'avg(cpu) > 90'
scaling:
  nodes:
    - name: worker
      min_instances: 1
      max_instances: 5
      scaling_rule: |
        if high_load:
          m_node_count += 1
"#;
        let sim = Arc::new(SimulatedAdapter::new().with_count("worker", 1));
        let mut ctl = controller(yaml, StaticMetrics::new(), sim);
        ctl.prepare().await;

        ctl.run_cycle_at(0).await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(1));

        ctl.fire_alerts(&AlertBatch {
            alerts: vec![Alert::firing("high_load", "t1")],
        });
        let report = ctl.run_cycle_at(15).await;
        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(worker.inputs["high_load"], true);
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));
        assert!(ctl.alerts().is_empty());

        ctl.run_cycle_at(30).await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));
    }

    #[tokio::test]
    async fn anti_flap_timer_and_userdata_carry_over() {
        let yaml = r#"
scaling:
  nodes:
    - name: worker
      min_instances: 1
      max_instances: 5
      scaling_rule: |
        m_userdata = m_userdata + 1
        if m_time_since_node_count_changed >= 30:
          m_node_count += 1
  userdata: 0
"#;
        let sim = Arc::new(SimulatedAdapter::new().with_count("worker", 1));
        let mut ctl = controller(yaml, StaticMetrics::new(), sim);
        ctl.prepare().await;
        let start = ctl.targets[0].changed_at;

        ctl.run_cycle_at(start + 15).await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(1));
        ctl.run_cycle_at(start + 30).await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));
        // Timer restarted by the change.
        let report = ctl.run_cycle_at(start + 45).await;
        let worker = report.decision(TargetKind::Node, "worker").unwrap();
        assert_eq!(worker.inputs[NODE_COUNT_AGE], 15);
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(2));
        assert_eq!(ctl.userdata(), &Value::Int(3));
    }

    #[tokio::test]
    async fn down_nodes_are_removed_after_the_timeout() {
        let sim = Arc::new(
            SimulatedAdapter::new().with_down_nodes(vec![NodeInfo::new("bad", "10.0.0.9")]),
        );
        let yaml = "scaling:\n  nodes:\n    - name: worker\n      scaling_rule: 'pass'\n";
        let mut ctl = controller(yaml, StaticMetrics::new(), sim.clone());
        ctl.prepare().await;
        assert!(ctl.run_cycle_at(0).await.removed_nodes.is_empty());
        let report = ctl.run_cycle_at(121).await;
        assert_eq!(report.removed_nodes, vec!["bad".to_string()]);
        assert_eq!(sim.removed_nodes().await, vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn advice_is_exposed_as_a_callable() {
        let yaml = r#"
scaling:
  nodes:
    - name: worker
      min_instances: 1
      max_instances: 5
      scaling_rule: |
        advice = m_opt_advice()
        if advice["valid"] == "False":
          m_node_count = 4
"#;
        let sim = Arc::new(SimulatedAdapter::new().with_count("worker", 1));
        let mut ctl = controller(yaml, StaticMetrics::new(), sim);
        ctl.prepare().await;
        ctl.run_cycle_at(0).await;
        assert_eq!(ctl.target_count(TargetKind::Node, "worker"), Some(4));
    }

    #[tokio::test]
    async fn stop_is_honoured_during_the_sleep() {
        let yaml = "scaling:\n  nodes:\n    - name: worker\n      scaling_rule: 'pass'\n";
        let sim = Arc::new(SimulatedAdapter::new());
        let mut settings = settings();
        settings.cycle_interval = Duration::from_secs(3600);
        let sink = scaleward_rules::OutputSink::start();
        let ctl = SessionController::new(
            Policy::from_yaml(yaml).unwrap(),
            settings,
            Backends::simulated(StaticMetrics::new(), sim),
            sink.writer(),
        )
        .unwrap();
        let mut phase = ctl.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = tokio::spawn(ctl.run(stop_rx, cmd_rx));

        phase.wait_for(|p| *p == Phase::Running).await.unwrap();
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*phase.borrow(), Phase::Stopped);
    }

    #[test]
    fn drop_list_accepts_ids_and_node_dicts() {
        let Value::List(mut items) = nodes_binding(&[NodeInfo::new("n2", "x")]) else {
            unreachable!()
        };
        items.insert(0, Value::Str("n1".into()));
        items.push(Value::Int(3));
        assert_eq!(drop_list(&Value::List(items)), vec!["n1".to_string(), "n2".to_string()]);
        assert!(drop_list(&Value::Int(1)).is_empty());
    }
}
