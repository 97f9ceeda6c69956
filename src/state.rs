//! Task and step state tracking.
//!
//! `TaskState` is the single mutable record per task. It is serialized as a flat,
//! pretty-printed JSON document so an operator can read it without tooling.

use crate::checkpoint::{CheckpointFailure, CheckpointRecord};
use crate::errors::{EngineError, EngineResult};
use crate::gate::QualityGateResult;
use crate::plan::Plan;
use crate::validation::CriterionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Initializing,
    Planning,
    ReadyToBuild,
    Building,
    AwaitingQualityGate,
    Complete,
    Failed,
    /// Stopped for manual intervention; only an explicit rollback or abort leaves it
    Halted,
    /// Cancelled by the caller
    Aborted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initializing => "INITIALIZING",
            TaskStatus::Planning => "PLANNING",
            TaskStatus::ReadyToBuild => "READY_TO_BUILD",
            TaskStatus::Building => "BUILDING",
            TaskStatus::AwaitingQualityGate => "AWAITING_QUALITY_GATE",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Halted => "HALTED",
            TaskStatus::Aborted => "ABORTED",
        }
    }

    /// Terminal statuses are archived and never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Aborted
        )
    }

    /// Whether steps may be issued or reported in this status.
    pub fn can_advance(&self) -> bool {
        !self.is_terminal() && *self != TaskStatus::Halted
    }

    /// The transition legality table.
    ///
    /// Forward edges follow the lifecycle; HALTED and ABORTED are reachable from
    /// every non-terminal status. The backward edges into BUILDING exist only for
    /// checkpoint rollback.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::{
            Aborted, AwaitingQualityGate, Building, Complete, Failed, Halted, Initializing,
            Planning, ReadyToBuild,
        };
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (Halted, Halted) => false,
            (_, Halted) | (_, Aborted) => true,
            (Initializing, Planning) => true,
            (Planning, ReadyToBuild) | (Planning, Building) => true,
            (ReadyToBuild, Building) => true,
            (Building, AwaitingQualityGate) => true,
            (AwaitingQualityGate, Complete) | (AwaitingQualityGate, Failed) => true,
            (AwaitingQualityGate, Building) | (Halted, Building) => true,
            _ => false,
        }
    }
}

impl TaskStatus {
    /// Checked transition: the new status, or `IllegalTransition`.
    pub fn transition_to(self, to: TaskStatus) -> EngineResult<TaskStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(EngineError::IllegalTransition { from: self, to })
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "INITIALIZING" => Ok(TaskStatus::Initializing),
            "PLANNING" => Ok(TaskStatus::Planning),
            "READY_TO_BUILD" => Ok(TaskStatus::ReadyToBuild),
            "BUILDING" => Ok(TaskStatus::Building),
            "AWAITING_QUALITY_GATE" => Ok(TaskStatus::AwaitingQualityGate),
            "COMPLETE" => Ok(TaskStatus::Complete),
            "FAILED" => Ok(TaskStatus::Failed),
            "HALTED" => Ok(TaskStatus::Halted),
            "ABORTED" => Ok(TaskStatus::Aborted),
            _ => anyhow::bail!("Unknown task status '{}'", s),
        }
    }
}

/// Per-step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// Whether dependents of a step in this status may start.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution record of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub id: String,
    pub status: StepStatus,
    /// Attempts started, including the current one
    pub attempts: u32,
    pub max_attempts: u32,
    /// Cached criterion results from the latest validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_results: Vec<CriterionResult>,
    /// Fix hints already handed to the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints_given: Vec<String>,
}

impl StepState {
    fn new(id: &str, max_attempts: u32) -> Self {
        Self {
            id: id.to_string(),
            status: StepStatus::Pending,
            attempts: 0,
            max_attempts,
            last_results: Vec::new(),
            hints_given: Vec::new(),
        }
    }

    /// Back to a fresh, never-attempted step.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.attempts = 0;
        self.last_results.clear();
        self.hints_given.clear();
    }
}

/// The persisted per-task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub plan_id: String,
    pub goal: String,
    pub status: TaskStatus,
    /// Step the caller is working on, or the next one to issue
    pub current_step: Option<String>,
    /// Steps in plan order
    pub steps: Vec<StepState>,
    #[serde(default)]
    pub checkpoints_reached: Vec<CheckpointRecord>,
    /// Furthest verified checkpoint
    #[serde(default)]
    pub rollback_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoint_failures: Vec<CheckpointFailure>,
    /// Why the task halted or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_result: Option<QualityGateResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    /// Fresh state for a task over `plan`, in INITIALIZING.
    pub fn new(task_id: &str, plan: &Plan) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            plan_id: plan.id.clone(),
            goal: plan.goal.clone(),
            status: TaskStatus::Initializing,
            current_step: None,
            steps: plan
                .steps
                .iter()
                .map(|s| StepState::new(&s.id, s.retry.max_attempts))
                .collect(),
            checkpoints_reached: Vec::new(),
            rollback_to: None,
            checkpoint_failures: Vec::new(),
            halt_summary: None,
            gate_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, enforcing the legality table.
    pub fn transition(&mut self, to: TaskStatus) -> EngineResult<()> {
        let next = self.status.transition_to(to)?;
        tracing::info!(task = %self.task_id, from = %self.status, to = %next, "task status transition");
        self.status = next;
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn in_progress_step(&self) -> Option<&StepState> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::InProgress)
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Steps that finished without blocking the plan (success or skipped).
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status.satisfies_dependents())
            .count()
    }

    pub fn has_reached(&self, checkpoint: &str) -> bool {
        self.checkpoints_reached.iter().any(|c| c.name == checkpoint)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
