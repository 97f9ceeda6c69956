//! Final quality gate adjudication.

use crate::errors::{EngineError, EngineResult};
use crate::plan::QualityGateSpec;
use crate::validation::PredicateEvaluator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Every check passed
    Strong,
    /// Required checks passed, at least one optional check failed
    Sound,
    /// A required check failed
    Block,
}

impl Verdict {
    pub fn from_outcomes(outcomes: &[CheckOutcome]) -> Self {
        if outcomes.iter().any(|o| o.required && !o.passed) {
            Verdict::Block
        } else if outcomes.iter().any(|o| !o.passed) {
            Verdict::Sound
        } else {
            Verdict::Strong
        }
    }

    pub fn admits(&self) -> bool {
        !matches!(self, Verdict::Block)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Strong => write!(f, "STRONG"),
            Verdict::Sound => write!(f, "SOUND"),
            Verdict::Block => write!(f, "BLOCK"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub required: bool,
    pub passed: bool,
    pub observed: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub verdict: Verdict,
    pub checks: Vec<CheckOutcome>,
    pub ran_at: DateTime<Utc>,
}

impl QualityGateResult {
    /// Names of the failing required checks.
    pub fn blocking(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Convert a blocked result into `QualityGateBlocked`.
    pub fn into_result(self) -> EngineResult<Self> {
        if self.verdict.admits() {
            Ok(self)
        } else {
            Err(EngineError::QualityGateBlocked {
                failing: self.blocking(),
            })
        }
    }

    pub fn summary(&self) -> String {
        let failed: Vec<String> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| {
                let kind = if c.required { "required" } else { "optional" };
                format!("{} ({}): observed {}", c.name, kind, c.observed)
            })
            .collect();
        if failed.is_empty() {
            format!("Quality gate {}: all {} checks passed", self.verdict, self.checks.len())
        } else {
            format!("Quality gate {}: {}", self.verdict, failed.join("; "))
        }
    }
}

/// Runs every gate check in order. Checks never short-circuit so the caller sees
/// all failures at once.
pub struct QualityGate {
    evaluator: Arc<dyn PredicateEvaluator>,
}

impl QualityGate {
    pub fn new(evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        Self { evaluator }
    }

    pub async fn run(&self, spec: &QualityGateSpec) -> QualityGateResult {
        let mut checks = Vec::with_capacity(spec.checks.len());
        for check in &spec.checks {
            let outcome = self.evaluator.evaluate(&check.check).await;
            tracing::debug!(check = %check.name, required = check.required, passed = outcome.passed, "quality check evaluated");
            checks.push(CheckOutcome {
                name: check.name.clone(),
                required: check.required,
                passed: outcome.passed,
                observed: outcome.observed,
                expected: outcome.expected,
            });
        }
        let verdict = Verdict::from_outcomes(&checks);
        tracing::info!(verdict = %verdict, checks = checks.len(), "quality gate adjudicated");
        QualityGateResult {
            verdict,
            checks,
            ran_at: Utc::now(),
        }
    }
}
