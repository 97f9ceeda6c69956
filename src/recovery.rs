//! Minimal resumable context for callers that lost their working memory.
//!
//! A snapshot is a projection of `TaskState`, never a second source of truth.
//! `last_activity` is the task's own `updated_at`, so snapshotting an unchanged task
//! twice yields the same value.

use crate::plan::Plan;
use crate::state::{TaskState, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub task_id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub current_step: Option<String>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub last_activity: DateTime<Utc>,
}

/// One row of the resume list.
pub type ResumeEntry = RecoverySnapshot;

/// What a caller needs to pick a task back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumableContext {
    pub snapshot: RecoverySnapshot,
    /// Action text of the current step, when the plan was available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    pub options: Vec<String>,
}

impl ResumableContext {
    pub fn with_plan(mut self, plan: &Plan) -> Self {
        self.current_action = self
            .snapshot
            .current_step
            .as_deref()
            .and_then(|id| plan.step(id))
            .map(|s| s.action.clone());
        self
    }

    /// Plain-text block suitable for re-injection into a fresh session.
    pub fn render(&self) -> String {
        let s = &self.snapshot;
        let mut out = format!("Task {} [{}]\n", s.task_id, s.status);
        out.push_str(&format!("Goal: {}\n", s.goal));
        out.push_str(&format!(
            "Progress: {}/{} steps complete\n",
            s.completed_steps, s.total_steps
        ));
        match (&s.current_step, &self.current_action) {
            (Some(step), Some(action)) => {
                out.push_str(&format!("Current step: {} - {}\n", step, action))
            }
            (Some(step), None) => out.push_str(&format!("Current step: {}\n", step)),
            (None, _) => out.push_str("Current step: none\n"),
        }
        out.push_str(&format!("Last activity: {}\n", s.last_activity.to_rfc3339()));
        out.push_str("Options:\n");
        for option in &self.options {
            out.push_str(&format!("  - {}\n", option));
        }
        out
    }
}

pub struct RecoveryProtocol;

impl RecoveryProtocol {
    pub fn snapshot(state: &TaskState, plan: &Plan) -> RecoverySnapshot {
        RecoverySnapshot {
            task_id: state.task_id.clone(),
            goal: plan.goal.clone(),
            status: state.status,
            current_step: state.current_step.clone(),
            total_steps: plan.steps.len(),
            completed_steps: state.completed_steps(),
            last_activity: state.updated_at,
        }
    }

    /// Build the resumable context. Resuming is never automatic; the options list
    /// names the explicit choices available.
    pub fn restore(snapshot: &RecoverySnapshot) -> ResumableContext {
        let id = &snapshot.task_id;
        let mut options = match snapshot.status {
            TaskStatus::Halted => vec![
                format!("stepgate show {} to read the halt summary", id),
                format!("stepgate rollback {} <checkpoint> to retry from a verified point", id),
            ],
            TaskStatus::AwaitingQualityGate => {
                vec![format!("stepgate gate {} to run the quality gate", id)]
            }
            status if status.is_terminal() => Vec::new(),
            _ => vec![format!("stepgate next {} to continue", id)],
        };
        if !snapshot.status.is_terminal() {
            options.push(format!("stepgate abort {} to abandon the task", id));
            options.push("stepgate create <plan.json> to start fresh".to_string());
        }
        ResumableContext {
            snapshot: snapshot.clone(),
            current_action: None,
            options,
        }
    }

    /// Non-terminal snapshots, most recent activity first. Ties break on task id.
    pub fn rank(mut snapshots: Vec<RecoverySnapshot>) -> Vec<ResumeEntry> {
        snapshots.retain(|s| !s.status.is_terminal());
        snapshots.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        snapshots
    }
}
