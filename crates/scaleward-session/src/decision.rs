//! What one cycle decided, per target.

use scaleward_adapters::ScaleRequest;
use serde::Serialize;

/// Class of a scaling target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Node,
    Service,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Node => write!(f, "node"),
            TargetKind::Service => write!(f, "service"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    /// Evaluated and dispatched (or dispatch not needed).
    Applied,
    /// Not evaluated this cycle; previous outputs retained.
    Skipped,
    /// Evaluation or dispatch failed.
    Failed,
}

/// Outcome for one target in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub kind: TargetKind,
    pub target: String,
    pub status: DecisionStatus,
    /// Bindings the rule was evaluated with.
    pub inputs: serde_json::Value,
    /// Bindings the rule produced.
    pub outputs: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ScaleRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Decision {
    pub(crate) fn new(kind: TargetKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            status: DecisionStatus::Applied,
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
            action: None,
            error: None,
        }
    }

    pub(crate) fn skip(&mut self, reason: impl Into<String>) {
        self.status = DecisionStatus::Skipped;
        self.error = Some(reason.into());
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = DecisionStatus::Failed;
        self.error = Some(reason.into());
    }

    /// Count this decision leaves the target at, if it produced an action.
    pub fn count(&self) -> Option<u32> {
        self.action.as_ref().map(|a| a.action.resulting_count())
    }
}

/// Everything a cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Unix seconds at cycle start.
    pub started_at: i64,
    /// Down nodes whose removal was requested.
    pub removed_nodes: Vec<String>,
    pub decisions: Vec<Decision>,
}

impl CycleReport {
    pub fn decision(&self, kind: TargetKind, target: &str) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|d| d.kind == kind && d.target == target)
    }
}
