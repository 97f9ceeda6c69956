//! Typed error hierarchy for the stepgate engine.
//!
//! `EngineError` is the single public error type returned by [`crate::engine::Engine`].
//! Internals that only do I/O or parsing use `anyhow` with context and are folded into
//! `EngineError::Store` at the engine boundary.

use crate::state::TaskStatus;
use thiserror::Error;

/// Errors surfaced by the plan execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The plan was rejected at creation time. No task state exists for it.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// A step's criteria did not hold. Surfaces as `Decision::Retry`; its message
    /// heads the retry record in the decision trail.
    #[error("Validation failed for step {step}: {summary}")]
    ValidationFailure { step: String, summary: String },

    /// A step used every attempt it was allowed. Surfaces as `Decision::Halted` or
    /// `Decision::Skipped`; its message heads the escalation summary.
    #[error("Step '{step}' failed after {attempts}/{max_attempts} attempts")]
    AttemptsExhausted {
        step: String,
        attempts: u32,
        max_attempts: u32,
    },

    /// The final gate failed one or more required checks.
    #[error("Quality gate blocked by required checks: {}", failing.join(", "))]
    QualityGateBlocked { failing: Vec<String> },

    /// Non-terminal steps remain but none can run. Always a planning defect.
    #[error("No runnable step in task {task_id}: {blocked} step(s) blocked on unmet dependencies")]
    NoRunnableStep { task_id: String, blocked: usize },

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Step {step} is not part of task {task_id}")]
    UnknownStep { task_id: String, step: String },

    #[error("Step {step} is not in progress (status: {status})")]
    StepNotInProgress { step: String, status: String },

    #[error("Checkpoint {name} has not been reached in task {task_id}")]
    UnknownCheckpoint { task_id: String, name: String },

    /// Rolling back would not clear the failure that stopped the task.
    #[error("Cannot roll back task {task_id} to checkpoint {name}: {reason}")]
    RollbackRejected {
        task_id: String,
        name: String,
        reason: String,
    },

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {task_id} is {status} and cannot advance")]
    TaskTerminal { task_id: String, status: TaskStatus },

    #[error("State store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl EngineError {
    /// Whether the caller can recover without changing the plan.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailure { .. }
                | Self::AttemptsExhausted { .. }
                | Self::QualityGateBlocked { .. }
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_plan_carries_reason() {
        let err = EngineError::InvalidPlan("cycle detected: a -> b -> a".into());
        assert!(err.to_string().contains("cycle detected"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn quality_gate_blocked_lists_failing_checks() {
        let err = EngineError::QualityGateBlocked {
            failing: vec!["tests".into(), "lint".into()],
        };
        assert_eq!(
            err.to_string(),
            "Quality gate blocked by required checks: tests, lint"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn attempts_exhausted_reports_the_budget() {
        let err = EngineError::AttemptsExhausted {
            step: "build".into(),
            attempts: 3,
            max_attempts: 3,
        };
        assert_eq!(err.to_string(), "Step 'build' failed after 3/3 attempts");
        assert!(err.is_recoverable());
    }

    #[test]
    fn illegal_transition_names_both_statuses() {
        let err = EngineError::IllegalTransition {
            from: TaskStatus::Complete,
            to: TaskStatus::Building,
        };
        let msg = err.to_string();
        assert!(msg.contains("COMPLETE"));
        assert!(msg.contains("BUILDING"));
    }

    #[test]
    fn store_error_keeps_source() {
        let err = EngineError::Store(anyhow::anyhow!("disk full"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn no_runnable_step_is_fatal() {
        let err = EngineError::NoRunnableStep {
            task_id: "t1".into(),
            blocked: 2,
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("2 step(s)"));
    }
}
