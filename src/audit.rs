//! Append-only decision trail.
//!
//! Every engine decision appends one `DecisionRecord` carrying the evidence behind it,
//! so the reasoning can be reconstructed after the fact.

use crate::state::TaskStatus;
use crate::validation::CriterionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    TaskCreated,
    StepIssued,
    StepPassed,
    StepRetry,
    StepSkipped,
    StepFailed,
    CheckpointReached,
    CheckpointFailed,
    QualityGate,
    RolledBack,
    Aborted,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionKind::TaskCreated => "task_created",
            DecisionKind::StepIssued => "step_issued",
            DecisionKind::StepPassed => "step_passed",
            DecisionKind::StepRetry => "step_retry",
            DecisionKind::StepSkipped => "step_skipped",
            DecisionKind::StepFailed => "step_failed",
            DecisionKind::CheckpointReached => "checkpoint_reached",
            DecisionKind::CheckpointFailed => "checkpoint_failed",
            DecisionKind::QualityGate => "quality_gate",
            DecisionKind::RolledBack => "rolled_back",
            DecisionKind::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    pub task_id: String,
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Task status after the decision
    pub status: TaskStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<CriterionResult>,
}

impl DecisionRecord {
    pub fn new(
        task_id: &str,
        kind: DecisionKind,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            task_id: task_id.to_string(),
            kind,
            step: None,
            attempt: None,
            status,
            message: message.into(),
            evidence: Vec::new(),
        }
    }

    pub fn for_step(mut self, step: &str, attempt: u32) -> Self {
        self.step = Some(step.to_string());
        self.attempt = Some(attempt);
        self
    }

    pub fn with_evidence(mut self, evidence: &[CriterionResult]) -> Self {
        self.evidence = evidence.to_vec();
        self
    }

    /// One line for `stepgate history`.
    pub fn display_line(&self) -> String {
        let mut line = format!(
            "{} {:<18} {:<22}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.kind.to_string(),
            self.status.to_string()
        );
        if let Some(step) = &self.step {
            match self.attempt {
                Some(attempt) => line.push_str(&format!(" [{} #{}]", step, attempt)),
                None => line.push_str(&format!(" [{}]", step)),
            }
        }
        line.push(' ');
        line.push_str(&self.message);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_compactly() {
        let record = DecisionRecord::new(
            "t1",
            DecisionKind::StepRetry,
            TaskStatus::Building,
            "retrying",
        )
        .for_step("compile", 2);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"step_retry\""));
        assert!(json.contains("\"status\":\"BUILDING\""));
        assert!(!json.contains("evidence"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_display_line_names_step_and_attempt() {
        let line = DecisionRecord::new(
            "t1",
            DecisionKind::StepFailed,
            TaskStatus::Halted,
            "gave up",
        )
        .for_step("deploy", 3)
        .display_line();
        assert!(line.contains("step_failed"));
        assert!(line.contains("HALTED"));
        assert!(line.contains("[deploy #3]"));
        assert!(line.ends_with("gave up"));
    }
}
