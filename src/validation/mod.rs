//! Step validation against success criteria.
//!
//! - `predicate` - the predicate/expectation vocabulary used by plans
//! - `shell` - the default evaluator (shell commands, filesystem)
//! - [`ValidationRunner`] - ordered, fail-fast evaluation of a step's criteria
//!
//! The runner never touches task state. It only observes the environment through a
//! [`PredicateEvaluator`], which callers can replace (tests inject scripted ones).

mod predicate;
mod shell;

pub use predicate::{Check, CommandOutput, Expectation, Predicate};
pub use shell::ShellEvaluator;

use crate::plan::{Step, SuccessCriterion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Observes the environment to decide whether a predicate holds.
#[async_trait]
pub trait PredicateEvaluator: Send + Sync {
    /// Evaluate one predicate. Failures to observe (spawn errors, timeouts)
    /// are reported as failed checks, never as errors.
    async fn evaluate(&self, predicate: &Predicate) -> Check;
}

/// Result of one success criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion_id: String,
    pub description: String,
    pub passed: bool,
    pub observed: String,
    pub expected: String,
}

impl CriterionResult {
    fn from_check(criterion_id: String, description: &str, check: Check) -> Self {
        Self {
            criterion_id,
            description: description.to_string(),
            passed: check.passed,
            observed: check.observed,
            expected: check.expected,
        }
    }

    /// Synthetic failure for an action the caller itself reported as failed.
    pub fn reported_failure(step_id: &str, evidence: &str) -> Self {
        Self {
            criterion_id: format!("{}#reported", step_id),
            description: "caller-reported outcome".to_string(),
            passed: false,
            observed: if evidence.trim().is_empty() {
                "action reported as failed".to_string()
            } else {
                evidence.trim().to_string()
            },
            expected: "action reported as successful".to_string(),
        }
    }

    /// One-line summary, used in decisions and halt messages.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}): expected {}, observed {}",
            self.criterion_id, self.description, self.expected, self.observed
        )
    }
}

/// Whether every result passed. An empty list passes.
pub fn all_passed(results: &[CriterionResult]) -> bool {
    results.iter().all(|r| r.passed)
}

/// The first failing result, if any.
pub fn first_failure(results: &[CriterionResult]) -> Option<&CriterionResult> {
    results.iter().find(|r| !r.passed)
}

/// Evaluates success criteria in order, stopping at the first failure.
#[derive(Clone)]
pub struct ValidationRunner {
    evaluator: Arc<dyn PredicateEvaluator>,
}

impl ValidationRunner {
    pub fn new(evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Evaluate a step's criteria.
    ///
    /// Returns the passes that preceded the first failure plus that failure. A step
    /// without criteria returns an empty list and is therefore trivially valid.
    pub async fn evaluate(&self, step: &Step) -> Vec<CriterionResult> {
        if step.criteria.is_empty() {
            tracing::debug!(step = %step.id, "step has no success criteria; treating as valid");
        }
        self.evaluate_criteria(&step.id, &step.criteria).await
    }

    /// Fail-fast evaluation of an arbitrary criteria list owned by `owner`.
    pub async fn evaluate_criteria(
        &self,
        owner: &str,
        criteria: &[SuccessCriterion],
    ) -> Vec<CriterionResult> {
        let mut results = Vec::with_capacity(criteria.len());
        for (index, criterion) in criteria.iter().enumerate() {
            let check = self.evaluator.evaluate(&criterion.check).await;
            let result = CriterionResult::from_check(
                criterion.id_for(owner, index),
                &criterion.description,
                check,
            );
            let passed = result.passed;
            tracing::debug!(
                criterion = %result.criterion_id,
                passed,
                observed = %result.observed,
                "criterion evaluated"
            );
            results.push(result);
            if !passed {
                break;
            }
        }
        results
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedEvaluator;
    use super::*;
    use crate::plan::Step;

    fn step_with(commands: &[&str]) -> Step {
        let mut step = Step::new("build", "Build the project");
        for cmd in commands {
            step.criteria
                .push(SuccessCriterion::new(format!("runs {}", cmd), Predicate::command(*cmd)));
        }
        step
    }

    #[tokio::test]
    async fn test_all_criteria_pass() {
        let runner = ValidationRunner::new(Arc::new(ScriptedEvaluator::new()));
        let results = runner.evaluate(&step_with(&["a", "b", "c"])).await;
        assert_eq!(results.len(), 3);
        assert!(all_passed(&results));
        assert_eq!(results[0].criterion_id, "build#1");
        assert_eq!(results[2].criterion_id, "build#3");
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let evaluator = Arc::new(ScriptedEvaluator::new().script("b", &[false]));
        let runner = ValidationRunner::new(evaluator.clone());
        let results = runner.evaluate(&step_with(&["a", "b", "c"])).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(first_failure(&results).unwrap().criterion_id, "build#2");
        assert_eq!(evaluator.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_step_without_criteria_is_trivially_valid() {
        let runner = ValidationRunner::new(Arc::new(ScriptedEvaluator::new()));
        let results = runner.evaluate(&step_with(&[])).await;
        assert!(results.is_empty());
        assert!(all_passed(&results));
    }

    #[test]
    fn test_reported_failure_uses_evidence() {
        let r = CriterionResult::reported_failure("deploy", "  permission denied ");
        assert!(!r.passed);
        assert_eq!(r.observed, "permission denied");
        assert!(r.summary().contains("deploy#reported"));
    }
}
