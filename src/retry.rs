//! Bounded retry and escalation.

use crate::errors::EngineError;
use crate::plan::{EscalationPolicy, Step};
use crate::validation::{CriterionResult, first_failure};
use serde::{Deserialize, Serialize};

/// What to do with a step whose validation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryDecision {
    /// Re-issue the same step as attempt `next_attempt`
    Retry {
        fix_hints: Vec<String>,
        next_attempt: u32,
    },
    /// Budget exhausted; fail the step and halt the task
    EscalateHalt { summary: String },
    /// Budget exhausted; skip the step and continue
    EscalateSkip { summary: String },
}

/// Decides retry vs. escalation from the attempt count and the step's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// `attempts_so_far` counts attempts started, including the one that just failed.
    pub fn decide(
        &self,
        step: &Step,
        attempts_so_far: u32,
        report: &[CriterionResult],
    ) -> RetryDecision {
        let max_attempts = step.retry.max_attempts;
        if attempts_so_far < max_attempts {
            return RetryDecision::Retry {
                fix_hints: step.retry.fix_hints.clone(),
                next_attempt: attempts_so_far + 1,
            };
        }

        let summary = exhaustion_summary(step, attempts_so_far, report);
        match step.retry.escalation {
            EscalationPolicy::SkipIfOptional => RetryDecision::EscalateSkip { summary },
            EscalationPolicy::HaltWithContext => RetryDecision::EscalateHalt { summary },
        }
    }
}

/// Human-readable account of an exhausted step: what failed and what was tried.
pub fn exhaustion_summary(step: &Step, attempts: u32, report: &[CriterionResult]) -> String {
    let exhausted = EngineError::AttemptsExhausted {
        step: step.id.clone(),
        attempts,
        max_attempts: step.retry.max_attempts,
    };
    let mut summary = format!("{}.", exhausted);
    match first_failure(report) {
        Some(failure) => {
            summary.push_str(" Failing criterion: ");
            summary.push_str(&failure.summary());
            summary.push('.');
        }
        None => summary.push_str(" No failing criterion was recorded."),
    }
    if step.retry.fix_hints.is_empty() {
        summary.push_str(" No fix hints were available.");
    } else {
        summary.push_str(" Hints already given: ");
        summary.push_str(&step.retry.fix_hints.join("; "));
        summary.push('.');
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::RetryBehavior;

    fn step(max: u32, escalation: EscalationPolicy) -> Step {
        Step::new("compile", "Make it compile").with_retry(
            RetryBehavior::new(max, escalation).with_hints(&["run cargo check", "read errors"]),
        )
    }

    fn failing_report() -> Vec<CriterionResult> {
        vec![CriterionResult {
            criterion_id: "compile#1".into(),
            description: "builds".into(),
            passed: false,
            observed: "exit 101".into(),
            expected: "`cargo build` exits with 0".into(),
        }]
    }

    #[test]
    fn test_retry_while_budget_remains() {
        let policy = RetryPolicy::new();
        let s = step(3, EscalationPolicy::HaltWithContext);
        for attempts in 1..3 {
            match policy.decide(&s, attempts, &failing_report()) {
                RetryDecision::Retry {
                    fix_hints,
                    next_attempt,
                } => {
                    assert_eq!(next_attempt, attempts + 1);
                    assert_eq!(fix_hints, vec!["run cargo check", "read errors"]);
                }
                other => panic!("expected retry, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_exhaustion_halts_by_default() {
        let decision = RetryPolicy::new().decide(
            &step(3, EscalationPolicy::HaltWithContext),
            3,
            &failing_report(),
        );
        match decision {
            RetryDecision::EscalateHalt { summary } => {
                assert!(summary.contains("3/3 attempts"));
                assert!(summary.contains("exit 101"));
                assert!(summary.contains("run cargo check; read errors"));
            }
            other => panic!("expected halt, got {:?}", other),
        }
    }

    #[test]
    fn test_exhaustion_skips_optional_steps() {
        let decision = RetryPolicy::new().decide(
            &step(2, EscalationPolicy::SkipIfOptional),
            2,
            &failing_report(),
        );
        assert!(matches!(decision, RetryDecision::EscalateSkip { .. }));
    }

    #[test]
    fn test_single_attempt_budget_escalates_immediately() {
        let decision = RetryPolicy::new().decide(
            &step(1, EscalationPolicy::HaltWithContext),
            1,
            &failing_report(),
        );
        assert!(matches!(decision, RetryDecision::EscalateHalt { .. }));
    }

    #[test]
    fn test_summary_without_hints_or_failure() {
        let s = Step::new("x", "X");
        let summary = exhaustion_summary(&s, 3, &[]);
        assert!(summary.contains("No failing criterion"));
        assert!(summary.contains("No fix hints"));
    }
}
