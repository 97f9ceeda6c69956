//! Checkpoint verification and rollback.
//!
//! A checkpoint is verified right after its anchor step succeeds. Reached checkpoints
//! are recorded on the task and become rollback targets. Step order for rollback is
//! the order of `TaskState::steps`, which mirrors the plan, widened by the plan's
//! dependency graph so a kept step never rests on a reset one.

use crate::errors::{EngineError, EngineResult};
use crate::plan::{CheckpointSpec, Plan, StepGraph};
use crate::state::{StepStatus, TaskState, TaskStatus};
use crate::validation::{ValidationRunner, all_passed, first_failure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A checkpoint whose verification passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub name: String,
    pub anchor_step: String,
    pub reached_at: DateTime<Utc>,
}

/// A checkpoint whose verification failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFailure {
    pub name: String,
    pub anchor_step: String,
    pub mandatory: bool,
    pub failure: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointOutcome {
    Passed(CheckpointRecord),
    Failed { mandatory: bool, summary: String },
    /// The anchor step has not succeeded; nothing was verified
    NotEligible,
}

impl CheckpointOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CheckpointOutcome::Passed(_))
    }
}

pub struct CheckpointManager {
    runner: ValidationRunner,
    mandatory_by_default: bool,
}

impl CheckpointManager {
    pub fn new(runner: ValidationRunner, mandatory_by_default: bool) -> Self {
        Self {
            runner,
            mandatory_by_default,
        }
    }

    pub fn is_mandatory(&self, spec: &CheckpointSpec) -> bool {
        spec.mandatory.unwrap_or(self.mandatory_by_default)
    }

    /// Verify `spec` against the environment and record the outcome on `state`.
    pub async fn try_checkpoint(
        &self,
        state: &mut TaskState,
        spec: &CheckpointSpec,
    ) -> CheckpointOutcome {
        let anchor_done = state
            .step(&spec.anchor_step)
            .is_some_and(|s| s.status == StepStatus::Success);
        if !anchor_done {
            tracing::debug!(checkpoint = %spec.name, anchor = %spec.anchor_step, "anchor not complete; checkpoint skipped");
            return CheckpointOutcome::NotEligible;
        }

        let results = self
            .runner
            .evaluate_criteria(&spec.name, &spec.verify)
            .await;
        let now = Utc::now();

        if all_passed(&results) {
            let record = CheckpointRecord {
                name: spec.name.clone(),
                anchor_step: spec.anchor_step.clone(),
                reached_at: now,
            };
            state.checkpoints_reached.retain(|c| c.name != spec.name);
            state.checkpoints_reached.push(record.clone());
            state.rollback_to = furthest_checkpoint(state);
            tracing::info!(task = %state.task_id, checkpoint = %spec.name, "checkpoint reached");
            return CheckpointOutcome::Passed(record);
        }

        let mandatory = self.is_mandatory(spec);
        let summary = first_failure(&results)
            .map(|f| f.summary())
            .unwrap_or_else(|| "verification failed".to_string());
        tracing::warn!(
            task = %state.task_id,
            checkpoint = %spec.name,
            mandatory,
            failure = %summary,
            "checkpoint verification failed"
        );
        state.checkpoint_failures.push(CheckpointFailure {
            name: spec.name.clone(),
            anchor_step: spec.anchor_step.clone(),
            mandatory,
            failure: summary.clone(),
            at: now,
        });
        CheckpointOutcome::Failed { mandatory, summary }
    }
}

fn step_position(state: &TaskState, step_id: &str) -> Option<usize> {
    state.steps.iter().position(|s| s.id == step_id)
}

/// The reached checkpoint anchored furthest along the plan; later records win ties.
pub fn furthest_checkpoint(state: &TaskState) -> Option<String> {
    state
        .checkpoints_reached
        .iter()
        .filter_map(|c| step_position(state, &c.anchor_step).map(|pos| (pos, c)))
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, c)| c.name.clone())
}

/// Reset every step after the checkpoint's anchor and return the task to BUILDING.
///
/// Steps at or before the anchor keep their status, and so does everything they
/// depend on, even when the plan lists a dependency later. Checkpoints anchored on a
/// reset step are forgotten, so they must be verified again.
pub fn rollback(state: &mut TaskState, plan: &Plan, name: &str) -> EngineResult<()> {
    match state.status {
        TaskStatus::Building | TaskStatus::AwaitingQualityGate | TaskStatus::Halted => {}
        status if status.is_terminal() => {
            return Err(EngineError::TaskTerminal {
                task_id: state.task_id.clone(),
                status,
            });
        }
        status => {
            return Err(EngineError::IllegalTransition {
                from: status,
                to: TaskStatus::Building,
            });
        }
    }

    let record = state
        .checkpoints_reached
        .iter()
        .find(|c| c.name == name)
        .cloned()
        .ok_or_else(|| EngineError::UnknownCheckpoint {
            task_id: state.task_id.clone(),
            name: name.to_string(),
        })?;
    let anchor = step_position(state, &record.anchor_step).ok_or_else(|| {
        EngineError::UnknownStep {
            task_id: state.task_id.clone(),
            step: record.anchor_step.clone(),
        }
    })?;

    let graph = StepGraph::build(plan)?;
    let leading = state.steps[..=anchor]
        .iter()
        .filter_map(|s| graph.get_index(&s.id));
    let kept_indices = graph.dependency_closure(leading);
    let kept: HashSet<&str> = plan
        .steps
        .iter()
        .enumerate()
        .filter(|(i, _)| kept_indices.contains(i))
        .map(|(_, s)| s.id.as_str())
        .collect();

    if let Some(failed) = state
        .steps
        .iter()
        .find(|s| kept.contains(s.id.as_str()) && s.status == StepStatus::Failed)
    {
        return Err(EngineError::RollbackRejected {
            task_id: state.task_id.clone(),
            name: name.to_string(),
            reason: format!(
                "step '{}' failed and is kept by the anchor '{}'",
                failed.id, record.anchor_step
            ),
        });
    }

    for step in state
        .steps
        .iter_mut()
        .filter(|s| !kept.contains(s.id.as_str()))
    {
        step.reset();
    }

    state
        .checkpoints_reached
        .retain(|c| kept.contains(c.anchor_step.as_str()));
    state.rollback_to = furthest_checkpoint(state);

    state.current_step = state
        .in_progress_step()
        .map(|s| s.id.clone())
        .or_else(|| {
            state
                .steps
                .iter()
                .find(|s| !kept.contains(s.id.as_str()))
                .map(|s| s.id.clone())
        });
    state.halt_summary = None;
    state.gate_result = None;

    if state.status != TaskStatus::Building {
        state.transition(TaskStatus::Building)?;
    }
    tracing::info!(task = %state.task_id, checkpoint = %name, "rolled back to checkpoint");
    Ok(())
}
