//! Plan definition and JSON loading.
//!
//! A plan is produced by an external planner and handed to the engine read-only:
//! - `Plan` - goal, ordered steps, checkpoints and the final quality gate
//! - `Step` - one atomic unit of work with its success criteria and retry budget
//! - `graph` - structural validation (ids, dependencies, cycles)

pub mod graph;

pub use graph::StepGraph;

use crate::validation::Predicate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A complete work plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointSpec>,
    #[serde(default)]
    pub quality_gate: QualityGateSpec,
}

impl Plan {
    pub fn new(id: &str, goal: &str, steps: Vec<Step>) -> Self {
        Self {
            id: id.to_string(),
            goal: goal.to_string(),
            steps,
            checkpoints: Vec::new(),
            quality_gate: QualityGateSpec::default(),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointSpec) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }

    pub fn with_quality_gate(mut self, gate: QualityGateSpec) -> Self {
        self.quality_gate = gate;
        self
    }

    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid plan document")
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Checkpoints anchored on the given step, in plan order.
    pub fn checkpoints_anchored_at<'a>(
        &'a self,
        step_id: &'a str,
    ) -> impl Iterator<Item = &'a CheckpointSpec> + 'a {
        self.checkpoints
            .iter()
            .filter(move |c| c.anchor_step == step_id)
    }
}

/// One atomic, independently validated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// What the caller is expected to do
    pub action: String,
    /// Ordered success criteria. Empty means trivially valid.
    #[serde(default)]
    pub criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    pub retry: RetryBehavior,
    /// Step ids that must be `success` or `skipped` before this step may start
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Step {
    pub fn new(id: &str, action: &str) -> Self {
        Self {
            id: id.to_string(),
            action: action.to_string(),
            criteria: Vec::new(),
            retry: RetryBehavior::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: SuccessCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn with_retry(mut self, retry: RetryBehavior) -> Self {
        self.retry = retry;
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A checkable predicate a step (or checkpoint) must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    /// Stable identifier; defaults to `<owner>#<position>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub description: String,
    pub check: Predicate,
}

impl SuccessCriterion {
    pub fn new(description: impl Into<String>, check: Predicate) -> Self {
        Self {
            id: None,
            description: description.into(),
            check,
        }
    }

    pub fn id_for(&self, owner: &str, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}#{}", owner, index + 1))
    }
}

/// What happens once a step has used its attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Halt the task and report the failing criterion (default)
    #[default]
    HaltWithContext,
    /// Mark the step skipped and keep going
    SkipIfOptional,
}

impl std::fmt::Display for EscalationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationPolicy::HaltWithContext => write!(f, "halt_with_context"),
            EscalationPolicy::SkipIfOptional => write!(f, "skip_if_optional"),
        }
    }
}

/// Per-step retry budget and guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryBehavior {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Guidance handed back to the caller with every retry
    #[serde(default)]
    pub fix_hints: Vec<String>,
    #[serde(default)]
    pub escalation: EscalationPolicy,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryBehavior {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fix_hints: Vec::new(),
            escalation: EscalationPolicy::default(),
        }
    }
}

impl RetryBehavior {
    pub fn new(max_attempts: u32, escalation: EscalationPolicy) -> Self {
        Self {
            max_attempts,
            fix_hints: Vec::new(),
            escalation,
        }
    }

    pub fn with_hints(mut self, hints: &[&str]) -> Self {
        self.fix_hints = hints.iter().map(|h| h.to_string()).collect();
        self
    }
}

/// A named, verified waypoint enabling rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSpec {
    pub name: String,
    /// The step whose success triggers verification
    pub anchor_step: String,
    /// Where a rollback lands; informational, defaults to the step after the anchor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_target: Option<String>,
    #[serde(default)]
    pub verify: Vec<SuccessCriterion>,
    /// `None` defers to `[checkpoints] mandatory_by_default`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
}

impl CheckpointSpec {
    pub fn new(name: &str, anchor_step: &str) -> Self {
        Self {
            name: name.to_string(),
            anchor_step: anchor_step.to_string(),
            rollback_target: None,
            verify: Vec::new(),
            mandatory: None,
        }
    }

    pub fn with_verify(mut self, criterion: SuccessCriterion) -> Self {
        self.verify.push(criterion);
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = Some(mandatory);
        self
    }
}

/// What a blocked quality gate does to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockBehavior {
    /// Stay in AWAITING_QUALITY_GATE for remediation and an explicit re-run
    #[default]
    Remain,
    /// Move the task to FAILED
    Fail,
}

impl std::str::FromStr for BlockBehavior {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remain" => Ok(BlockBehavior::Remain),
            "fail" => Ok(BlockBehavior::Fail),
            _ => anyhow::bail!("Invalid on_block value '{}'. Valid values: remain, fail", s),
        }
    }
}

/// The final admission checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityGateSpec {
    #[serde(default)]
    pub checks: Vec<QualityCheck>,
    /// `None` defers to `[quality_gate] on_block`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_block: Option<BlockBehavior>,
}

impl QualityGateSpec {
    pub fn new(checks: Vec<QualityCheck>) -> Self {
        Self {
            checks,
            on_block: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    pub check: Predicate,
}

fn default_required() -> bool {
    true
}

impl QualityCheck {
    pub fn required(name: &str, check: Predicate) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            check,
        }
    }

    pub fn optional(name: &str, check: Predicate) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PLAN_JSON: &str = r#"{
        "id": "auth-service",
        "goal": "Add login endpoint",
        "steps": [
            {
                "id": "schema",
                "action": "Create users table",
                "criteria": [
                    {"description": "migration applies", "check": {"type": "command", "run": "make migrate"}}
                ]
            },
            {
                "id": "endpoint",
                "action": "Implement POST /login",
                "depends_on": ["schema"],
                "retry": {"max_attempts": 5, "fix_hints": ["check the router"], "escalation": "skip_if_optional"}
            }
        ],
        "checkpoints": [
            {"name": "db-ready", "anchor_step": "schema", "mandatory": true}
        ],
        "quality_gate": {
            "checks": [
                {"name": "tests", "check": {"type": "command", "run": "make test"}},
                {"name": "lint", "required": false, "check": {"type": "command", "run": "make lint"}}
            ],
            "on_block": "fail"
        }
    }"#;

    #[test]
    fn test_parse_plan_with_defaults() {
        let plan = Plan::parse(PLAN_JSON).unwrap();
        assert_eq!(plan.steps.len(), 2);

        let schema = plan.step("schema").unwrap();
        assert_eq!(schema.retry, RetryBehavior::default());
        assert_eq!(schema.criteria[0].id_for("schema", 0), "schema#1");

        let endpoint = plan.step("endpoint").unwrap();
        assert_eq!(endpoint.retry.max_attempts, 5);
        assert_eq!(endpoint.retry.escalation, EscalationPolicy::SkipIfOptional);
        assert_eq!(endpoint.depends_on, vec!["schema"]);

        assert_eq!(plan.checkpoints[0].name, "db-ready");
        assert_eq!(plan.checkpoints[0].mandatory, Some(true));
        assert!(plan.quality_gate.checks[0].required);
        assert!(!plan.quality_gate.checks[1].required);
        assert_eq!(plan.quality_gate.on_block, Some(BlockBehavior::Fail));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let plan = Plan::parse(PLAN_JSON).unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&plan).unwrap()).unwrap();
        assert_eq!(Plan::load(&path).unwrap(), plan);
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = Plan::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.json"));
    }

    #[test]
    fn test_anchored_checkpoints() {
        let plan = Plan::parse(PLAN_JSON).unwrap();
        assert_eq!(plan.checkpoints_anchored_at("schema").count(), 1);
        assert_eq!(plan.checkpoints_anchored_at("endpoint").count(), 0);
    }

    #[test]
    fn test_explicit_criterion_id_wins() {
        let mut c = SuccessCriterion::new("compiles", Predicate::command("cargo check"));
        c.id = Some("compile".into());
        assert_eq!(c.id_for("build", 3), "compile");
    }
}
