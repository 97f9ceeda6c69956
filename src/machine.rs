//! Pure task transitions.
//!
//! Nothing here performs I/O. The engine validates, persists and audits around these
//! functions; given the same state, plan and outcome they always produce the same
//! result.

use crate::errors::{EngineError, EngineResult};
use crate::plan::{Plan, Step};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{StepStatus, TaskState, TaskStatus};
use crate::validation::{CriterionResult, all_passed};

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Perform this step
    Run(String),
    AwaitQualityGate,
    Complete,
    Halted { summary: String },
    Aborted,
    Failed { summary: String },
}

/// A validated step outcome with the retry policy's verdict applied.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedOutcome {
    Passed {
        step: String,
        results: Vec<CriterionResult>,
    },
    Retry {
        step: String,
        results: Vec<CriterionResult>,
        next_attempt: u32,
        fix_hints: Vec<String>,
    },
    Skip {
        step: String,
        results: Vec<CriterionResult>,
        summary: String,
    },
    Halt {
        step: String,
        results: Vec<CriterionResult>,
        summary: String,
    },
}

impl AppliedOutcome {
    pub fn step(&self) -> &str {
        match self {
            AppliedOutcome::Passed { step, .. }
            | AppliedOutcome::Retry { step, .. }
            | AppliedOutcome::Skip { step, .. }
            | AppliedOutcome::Halt { step, .. } => step,
        }
    }

    pub fn results(&self) -> &[CriterionResult] {
        match self {
            AppliedOutcome::Passed { results, .. }
            | AppliedOutcome::Retry { results, .. }
            | AppliedOutcome::Skip { results, .. }
            | AppliedOutcome::Halt { results, .. } => results,
        }
    }
}

/// Combine validation results with the retry policy.
pub fn judge(
    step: &Step,
    attempts: u32,
    results: Vec<CriterionResult>,
    policy: &RetryPolicy,
) -> AppliedOutcome {
    let id = step.id.clone();
    if all_passed(&results) {
        return AppliedOutcome::Passed { step: id, results };
    }
    match policy.decide(step, attempts, &results) {
        RetryDecision::Retry {
            fix_hints,
            next_attempt,
        } => AppliedOutcome::Retry {
            step: id,
            results,
            next_attempt,
            fix_hints,
        },
        RetryDecision::EscalateSkip { summary } => AppliedOutcome::Skip {
            step: id,
            results,
            summary,
        },
        RetryDecision::EscalateHalt { summary } => AppliedOutcome::Halt {
            step: id,
            results,
            summary,
        },
    }
}

/// Action implied by a status that no longer issues steps.
fn status_action(state: &TaskState) -> Option<NextAction> {
    let summary = || state.halt_summary.clone().unwrap_or_default();
    match state.status {
        TaskStatus::Complete => Some(NextAction::Complete),
        TaskStatus::Aborted => Some(NextAction::Aborted),
        TaskStatus::Failed => Some(NextAction::Failed { summary: summary() }),
        TaskStatus::Halted => Some(NextAction::Halted { summary: summary() }),
        TaskStatus::AwaitingQualityGate => Some(NextAction::AwaitQualityGate),
        _ => None,
    }
}

fn dependencies_met(state: &TaskState, step: &Step) -> bool {
    step.depends_on.iter().all(|dep| {
        state
            .step(dep)
            .is_some_and(|s| s.status.satisfies_dependents())
    })
}

/// Decide the next action without changing anything.
///
/// An in-progress step is returned as-is; otherwise the earliest pending step (plan
/// order) whose dependencies are satisfied. Fails with `NoRunnableStep` when steps
/// remain but none can start.
pub fn select_next(state: &TaskState, plan: &Plan) -> EngineResult<NextAction> {
    if let Some(action) = status_action(state) {
        return Ok(action);
    }
    if let Some(step) = state.in_progress_step() {
        return Ok(NextAction::Run(step.id.clone()));
    }

    let runnable = plan.steps.iter().find(|step| {
        state
            .step(&step.id)
            .is_some_and(|s| s.status == StepStatus::Pending)
            && dependencies_met(state, step)
    });
    if let Some(step) = runnable {
        return Ok(NextAction::Run(step.id.clone()));
    }

    if state.all_steps_terminal() {
        return Ok(NextAction::AwaitQualityGate);
    }
    let blocked = state
        .steps
        .iter()
        .filter(|s| !s.status.is_terminal())
        .count();
    Err(EngineError::NoRunnableStep {
        task_id: state.task_id.clone(),
        blocked,
    })
}

/// Apply an outcome (if any) and move the task forward.
///
/// With an outcome, the reported step is updated and the next action is previewed
/// (the cursor moves, nothing new is issued). Without one, the selected step is issued:
/// a pending step becomes `in_progress` with its first attempt counted.
pub fn advance(
    mut state: TaskState,
    plan: &Plan,
    outcome: Option<&AppliedOutcome>,
) -> EngineResult<(NextAction, TaskState)> {
    if let Some(outcome) = outcome {
        apply_outcome(&mut state, outcome)?;
    }

    let action = select_next(&state, plan)?;
    match &action {
        NextAction::Run(id) => {
            state.current_step = Some(id.clone());
            if outcome.is_none() {
                issue(&mut state, id)?;
            }
        }
        NextAction::AwaitQualityGate => {
            state.current_step = None;
            if state.status != TaskStatus::AwaitingQualityGate {
                state.transition(TaskStatus::AwaitingQualityGate)?;
            }
        }
        _ => {}
    }
    Ok((action, state))
}

fn issue(state: &mut TaskState, step_id: &str) -> EngineResult<()> {
    let task_id = state.task_id.clone();
    let step = state
        .step_mut(step_id)
        .ok_or_else(|| EngineError::UnknownStep {
            task_id,
            step: step_id.to_string(),
        })?;
    if step.status == StepStatus::Pending {
        step.status = StepStatus::InProgress;
        step.attempts = 1;
        tracing::debug!(step = %step_id, "step issued");
    }
    if matches!(state.status, TaskStatus::Planning | TaskStatus::ReadyToBuild) {
        state.transition(TaskStatus::Building)?;
    }
    Ok(())
}

fn apply_outcome(state: &mut TaskState, outcome: &AppliedOutcome) -> EngineResult<()> {
    if !state.status.can_advance() {
        return Err(EngineError::TaskTerminal {
            task_id: state.task_id.clone(),
            status: state.status,
        });
    }
    let task_id = state.task_id.clone();
    let step = state
        .step_mut(outcome.step())
        .ok_or_else(|| EngineError::UnknownStep {
            task_id,
            step: outcome.step().to_string(),
        })?;
    if step.status != StepStatus::InProgress {
        return Err(EngineError::StepNotInProgress {
            step: step.id.clone(),
            status: step.status.to_string(),
        });
    }
    step.last_results = outcome.results().to_vec();

    match outcome {
        AppliedOutcome::Passed { .. } => step.status = StepStatus::Success,
        AppliedOutcome::Retry {
            next_attempt,
            fix_hints,
            ..
        } => {
            step.attempts = (*next_attempt).min(step.max_attempts);
            for hint in fix_hints {
                if !step.hints_given.contains(hint) {
                    step.hints_given.push(hint.clone());
                }
            }
        }
        AppliedOutcome::Skip { summary, .. } => {
            step.status = StepStatus::Skipped;
            tracing::warn!(step = %step.id, "{}", summary);
        }
        AppliedOutcome::Halt { summary, .. } => {
            step.status = StepStatus::Failed;
            state.halt_summary = Some(summary.clone());
            state.transition(TaskStatus::Halted)?;
        }
    }
    Ok(())
}

/// Stop the task for manual intervention.
pub fn halt(state: &mut TaskState, summary: String) -> EngineResult<()> {
    state.transition(TaskStatus::Halted)?;
    state.halt_summary = Some(summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{EscalationPolicy, RetryBehavior};

    fn plan() -> Plan {
        Plan::new(
            "p",
            "goal",
            vec![
                Step::new("a", "A"),
                Step::new("b", "B").depends_on(&["a"]),
                Step::new("c", "C"),
            ],
        )
    }

    fn ready(plan: &Plan) -> TaskState {
        let mut state = TaskState::new("t1", plan);
        state.status = TaskStatus::ReadyToBuild;
        state
    }

    fn fail(step: &str) -> Vec<CriterionResult> {
        vec![CriterionResult::reported_failure(step, "broken")]
    }

    fn passed(step: &str) -> AppliedOutcome {
        AppliedOutcome::Passed {
            step: step.into(),
            results: vec![],
        }
    }

    #[test]
    fn test_first_issue_enters_building() {
        let plan = plan();
        let (action, state) = advance(ready(&plan), &plan, None).unwrap();
        assert_eq!(action, NextAction::Run("a".into()));
        assert_eq!(state.status, TaskStatus::Building);
        let a = state.step("a").unwrap();
        assert_eq!(a.status, StepStatus::InProgress);
        assert_eq!(a.attempts, 1);
    }

    #[test]
    fn test_issue_is_idempotent() {
        let plan = plan();
        let (_, once) = advance(ready(&plan), &plan, None).unwrap();
        let (action, twice) = advance(once.clone(), &plan, None).unwrap();
        assert_eq!(action, NextAction::Run("a".into()));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dependencies_gate_selection() {
        let plan = plan();
        let (_, state) = advance(ready(&plan), &plan, None).unwrap();
        let (preview, state) = advance(state, &plan, Some(&passed("a"))).unwrap();
        assert_eq!(preview, NextAction::Run("b".into()));
        assert_eq!(state.step("b").unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_blocked_step_waits_for_later_dependency() {
        let plan = Plan::new(
            "p",
            "goal",
            vec![Step::new("x", "X").depends_on(&["y"]), Step::new("y", "Y")],
        );
        let (action, _) = advance(ready(&plan), &plan, None).unwrap();
        assert_eq!(action, NextAction::Run("y".into()));
    }

    #[test]
    fn test_blocked_steps_are_a_fatal_error() {
        let plan = plan();
        let mut state = ready(&plan);
        state.step_mut("a").unwrap().status = StepStatus::Failed;
        state.step_mut("c").unwrap().status = StepStatus::Success;
        let err = select_next(&state, &plan).unwrap_err();
        assert!(matches!(err, EngineError::NoRunnableStep { blocked: 1, .. }));
    }

    #[test]
    fn test_last_step_moves_to_quality_gate() {
        let plan = Plan::new("p", "goal", vec![Step::new("only", "Only")]);
        let (_, state) = advance(ready(&plan), &plan, None).unwrap();
        let (action, state) = advance(state, &plan, Some(&passed("only"))).unwrap();
        assert_eq!(action, NextAction::AwaitQualityGate);
        assert_eq!(state.status, TaskStatus::AwaitingQualityGate);
        assert_eq!(state.current_step, None);
    }

    #[test]
    fn test_retry_keeps_step_in_progress() {
        let plan = plan();
        let step = plan.step("a").unwrap();
        let (_, state) = advance(ready(&plan), &plan, None).unwrap();
        let outcome = judge(step, 1, fail("a"), &RetryPolicy::new());
        assert!(matches!(outcome, AppliedOutcome::Retry { next_attempt: 2, .. }));

        let (action, state) = advance(state, &plan, Some(&outcome)).unwrap();
        assert_eq!(action, NextAction::Run("a".into()));
        let a = state.step("a").unwrap();
        assert_eq!(a.status, StepStatus::InProgress);
        assert_eq!(a.attempts, 2);
        assert_eq!(a.last_results.len(), 1);
    }

    #[test]
    fn test_exhaustion_halts_task() {
        let plan = Plan::new(
            "p",
            "goal",
            vec![Step::new("a", "A").with_retry(RetryBehavior::new(
                1,
                EscalationPolicy::HaltWithContext,
            ))],
        );
        let (_, state) = advance(ready(&plan), &plan, None).unwrap();
        let outcome = judge(&plan.steps[0], 1, fail("a"), &RetryPolicy::new());
        let (action, state) = advance(state, &plan, Some(&outcome)).unwrap();

        assert!(matches!(action, NextAction::Halted { ref summary } if summary.contains("1/1")));
        assert_eq!(state.status, TaskStatus::Halted);
        assert_eq!(state.step("a").unwrap().status, StepStatus::Failed);
        assert!(advance(state, &plan, Some(&passed("a"))).is_err());
    }

    #[test]
    fn test_reporting_a_step_not_in_progress_fails() {
        let plan = plan();
        let (_, state) = advance(ready(&plan), &plan, None).unwrap();
        let err = advance(state.clone(), &plan, Some(&passed("c"))).unwrap_err();
        assert!(matches!(err, EngineError::StepNotInProgress { .. }));
        let err = advance(state, &plan, Some(&passed("zzz"))).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStep { .. }));
    }

    #[test]
    fn test_terminal_status_short_circuits() {
        let plan = plan();
        let mut state = ready(&plan);
        state.status = TaskStatus::Aborted;
        assert_eq!(select_next(&state, &plan).unwrap(), NextAction::Aborted);
    }
}
