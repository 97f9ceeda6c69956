//! The external interface: one `Engine` per store.
//!
//! Every operation loads the task record, computes the new state with the pure
//! functions in `machine`, `checkpoint` and `gate`, and persists it before returning.
//! A crash after a call returns therefore always resumes into the decided state.

use crate::audit::{DecisionKind, DecisionRecord};
use crate::checkpoint::{self, CheckpointManager, CheckpointOutcome};
use crate::errors::{EngineError, EngineResult};
use crate::gate::{QualityGate, QualityGateResult};
use crate::machine::{self, AppliedOutcome, NextAction};
use crate::plan::{BlockBehavior, Plan, Step, StepGraph};
use crate::recovery::{RecoveryProtocol, RecoverySnapshot, ResumableContext, ResumeEntry};
use crate::retry::RetryPolicy;
use crate::state::{StepStatus, TaskState, TaskStatus};
use crate::store::StateStore;
use crate::validation::{CriterionResult, PredicateEvaluator, ValidationRunner, first_failure};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Engine-wide policy knobs, normally taken from `stepgate.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// What a blocked gate does when the plan does not say
    pub on_block: BlockBehavior,
    /// Whether checkpoints without an explicit flag halt the task on failure
    pub mandatory_checkpoints: bool,
    pub max_attempts_ceiling: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            on_block: BlockBehavior::Remain,
            mandatory_checkpoints: false,
            max_attempts_ceiling: 10,
        }
    }
}

/// What the caller says happened when it performed a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Success,
    Failure,
}

/// Answer to `next_step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextStep {
    Step {
        step: Step,
        attempt: u32,
        max_attempts: u32,
        /// Hints handed out on earlier attempts
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fix_hints: Vec<String>,
    },
    AwaitingQualityGate,
    TaskComplete,
    TaskHalted {
        summary: String,
    },
    TaskAborted,
    TaskFailed {
        summary: String,
    },
}

/// Answer to `report_outcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Continue,
    Retry { fix_hints: Vec<String>, attempt: u32 },
    Skipped { summary: String },
    Halted { summary: String },
}

pub struct Engine<S: StateStore> {
    store: S,
    runner: ValidationRunner,
    gate: QualityGate,
    checkpoints: CheckpointManager,
    retry: RetryPolicy,
    settings: EngineSettings,
}

impl<S: StateStore> Engine<S> {
    pub fn new(store: S, evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        Self::with_settings(store, evaluator, EngineSettings::default())
    }

    pub fn with_settings(
        store: S,
        evaluator: Arc<dyn PredicateEvaluator>,
        settings: EngineSettings,
    ) -> Self {
        let runner = ValidationRunner::new(evaluator.clone());
        Self {
            store,
            checkpoints: CheckpointManager::new(runner.clone(), settings.mandatory_checkpoints),
            gate: QualityGate::new(evaluator),
            runner,
            retry: RetryPolicy::new(),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate `plan` and start a task for it in READY_TO_BUILD.
    pub fn create_task(&self, plan: Plan) -> EngineResult<String> {
        StepGraph::build(&plan)?;
        if let Some(step) = plan
            .steps
            .iter()
            .find(|s| s.retry.max_attempts > self.settings.max_attempts_ceiling)
        {
            return Err(EngineError::InvalidPlan(format!(
                "step '{}' asks for {} attempts; the configured ceiling is {}",
                step.id, step.retry.max_attempts, self.settings.max_attempts_ceiling
            )));
        }

        let task_id = new_task_id(&plan.id);
        let mut state = TaskState::new(&task_id, &plan);
        state.transition(TaskStatus::Planning)?;
        state.transition(TaskStatus::ReadyToBuild)?;

        self.store.create(&state, &plan).map_err(EngineError::Store)?;
        self.record(DecisionRecord::new(
            &task_id,
            DecisionKind::TaskCreated,
            state.status,
            format!(
                "Task created for plan '{}' with {} steps",
                plan.id,
                plan.steps.len()
            ),
        ))?;
        tracing::info!(task = %task_id, plan = %plan.id, steps = plan.steps.len(), "task created");
        Ok(task_id)
    }

    /// The step to perform now. Calling it again before reporting returns the same step.
    pub fn next_step(&self, task_id: &str) -> EngineResult<NextStep> {
        let (state, plan) = self.load(task_id)?;
        let before = state.clone();
        let (action, after) = machine::advance(state, &plan, None)?;

        let mut records = Vec::new();
        if let NextAction::Run(id) = &action
            && before
                .step(id)
                .is_some_and(|s| s.status == StepStatus::Pending)
        {
            records.push(
                DecisionRecord::new(task_id, DecisionKind::StepIssued, after.status, "step issued")
                    .for_step(id, 1),
            );
        }
        let state = self.commit(&before, after, records)?;
        self.describe(action, &state, &plan)
    }

    /// Validate the caller's work on `step_id` and decide what happens next.
    pub async fn report_outcome(
        &self,
        task_id: &str,
        step_id: &str,
        result: StepResult,
        evidence: &str,
    ) -> EngineResult<Decision> {
        let (state, plan) = self.load(task_id)?;
        if !state.status.can_advance() {
            return Err(EngineError::TaskTerminal {
                task_id: task_id.to_string(),
                status: state.status,
            });
        }
        let step = plan.step(step_id).ok_or_else(|| EngineError::UnknownStep {
            task_id: task_id.to_string(),
            step: step_id.to_string(),
        })?;
        let attempts = match state.step(step_id) {
            Some(s) if s.status == StepStatus::InProgress => s.attempts,
            Some(s) => {
                return Err(EngineError::StepNotInProgress {
                    step: step_id.to_string(),
                    status: s.status.to_string(),
                });
            }
            None => {
                return Err(EngineError::UnknownStep {
                    task_id: task_id.to_string(),
                    step: step_id.to_string(),
                });
            }
        };

        let results = match result {
            StepResult::Failure => vec![CriterionResult::reported_failure(step_id, evidence)],
            StepResult::Success => self.runner.evaluate(step).await,
        };
        let outcome = machine::judge(step, attempts, results, &self.retry);

        let before = state.clone();
        let (_, mut after) = machine::advance(state, &plan, Some(&outcome))?;
        let mut records = vec![outcome_record(task_id, &after, &outcome, attempts, evidence)];

        let mut checkpoint_halt = None;
        if matches!(outcome, AppliedOutcome::Passed { .. }) {
            for spec in plan.checkpoints_anchored_at(step_id) {
                match self.checkpoints.try_checkpoint(&mut after, spec).await {
                    CheckpointOutcome::Passed(_) => records.push(DecisionRecord::new(
                        task_id,
                        DecisionKind::CheckpointReached,
                        after.status,
                        format!("Checkpoint '{}' verified", spec.name),
                    )),
                    CheckpointOutcome::Failed { mandatory, summary } => {
                        let message = if mandatory {
                            format!("Mandatory checkpoint '{}' failed: {}", spec.name, summary)
                        } else {
                            format!("Advisory checkpoint '{}' failed: {}", spec.name, summary)
                        };
                        if mandatory {
                            machine::halt(&mut after, message.clone())?;
                            checkpoint_halt = Some(message.clone());
                        }
                        records.push(DecisionRecord::new(
                            task_id,
                            DecisionKind::CheckpointFailed,
                            after.status,
                            message,
                        ));
                        if mandatory {
                            break;
                        }
                    }
                    CheckpointOutcome::NotEligible => {}
                }
            }
        }

        self.commit(&before, after, records)?;

        let decision = match (checkpoint_halt, outcome) {
            (Some(summary), _) => Decision::Halted { summary },
            (None, AppliedOutcome::Passed { .. }) => Decision::Continue,
            (
                None,
                AppliedOutcome::Retry {
                    fix_hints,
                    next_attempt,
                    ..
                },
            ) => Decision::Retry {
                fix_hints,
                attempt: next_attempt,
            },
            (None, AppliedOutcome::Skip { summary, .. }) => Decision::Skipped { summary },
            (None, AppliedOutcome::Halt { summary, .. }) => Decision::Halted { summary },
        };
        tracing::info!(task = %task_id, step = %step_id, decision = ?decision, "outcome decided");
        Ok(decision)
    }

    /// Adjudicate the final quality gate. Never retried automatically.
    ///
    /// A task the gate already decided (COMPLETE, or FAILED by a blocked gate) returns
    /// the stored result unchanged.
    pub async fn run_quality_gate(&self, task_id: &str) -> EngineResult<QualityGateResult> {
        let (state, plan) = self.load(task_id)?;
        if matches!(state.status, TaskStatus::Complete | TaskStatus::Failed)
            && let Some(result) = &state.gate_result
        {
            return Ok(result.clone());
        }
        match state.status {
            TaskStatus::AwaitingQualityGate => {}
            status if status.is_terminal() => {
                return Err(EngineError::TaskTerminal {
                    task_id: task_id.to_string(),
                    status,
                });
            }
            status => {
                return Err(EngineError::IllegalTransition {
                    from: status,
                    to: TaskStatus::Complete,
                });
            }
        }

        self.save_snapshot(&state, &plan)?;
        let result = self.gate.run(&plan.quality_gate).await;

        let before = state.clone();
        let mut after = state;
        after.gate_result = Some(result.clone());
        if result.verdict.admits() {
            after.transition(TaskStatus::Complete)?;
        } else {
            let on_block = plan.quality_gate.on_block.unwrap_or(self.settings.on_block);
            tracing::warn!(task = %task_id, failing = ?result.blocking(), on_block = ?on_block, "quality gate blocked");
            if on_block == BlockBehavior::Fail {
                after.halt_summary = Some(result.summary());
                after.transition(TaskStatus::Failed)?;
            }
        }

        let evidence: Vec<CriterionResult> = result
            .checks
            .iter()
            .map(|c| CriterionResult {
                criterion_id: format!("gate:{}", c.name),
                description: if c.required { "required" } else { "optional" }.to_string(),
                passed: c.passed,
                observed: c.observed.clone(),
                expected: c.expected.clone(),
            })
            .collect();
        let record = DecisionRecord::new(
            task_id,
            DecisionKind::QualityGate,
            after.status,
            result.summary(),
        )
        .with_evidence(&evidence);
        self.commit(&before, after, vec![record])?;
        Ok(result)
    }

    /// Non-terminal tasks, most recent activity first.
    pub fn resume_list(&self) -> EngineResult<Vec<ResumeEntry>> {
        let mut snapshots = Vec::new();
        for state in self.store.list_active().map_err(EngineError::Store)? {
            match self
                .store
                .load_plan(&state.task_id)
                .map_err(EngineError::Store)?
            {
                Some(plan) => snapshots.push(RecoveryProtocol::snapshot(&state, &plan)),
                None => tracing::warn!(task = %state.task_id, "task has no stored plan; not resumable"),
            }
        }
        Ok(RecoveryProtocol::rank(snapshots))
    }

    /// The task a fresh session should offer to resume, if any.
    pub fn resume_candidate(&self) -> EngineResult<Option<ResumeEntry>> {
        Ok(self.resume_list()?.into_iter().next())
    }

    /// Return to a verified checkpoint, discarding progress after its anchor.
    pub fn rollback(&self, task_id: &str, checkpoint_name: &str) -> EngineResult<TaskState> {
        let (state, plan) = self.load(task_id)?;
        let before = state.clone();
        let mut after = state;
        checkpoint::rollback(&mut after, &plan, checkpoint_name)?;
        self.save_snapshot(&before, &plan)?;

        let record = DecisionRecord::new(
            task_id,
            DecisionKind::RolledBack,
            after.status,
            format!(
                "Rolled back to checkpoint '{}'; resuming at {}",
                checkpoint_name,
                after.current_step.as_deref().unwrap_or("the quality gate")
            ),
        );
        self.commit(&before, after, vec![record])
    }

    /// Cancel the task. Terminal.
    pub fn abort(&self, task_id: &str, reason: &str) -> EngineResult<TaskState> {
        let (state, _) = self.load(task_id)?;
        if state.status.is_terminal() {
            return Err(EngineError::TaskTerminal {
                task_id: task_id.to_string(),
                status: state.status,
            });
        }
        let before = state.clone();
        let mut after = state;
        after.transition(TaskStatus::Aborted)?;
        let reason = if reason.trim().is_empty() {
            "aborted by caller".to_string()
        } else {
            reason.trim().to_string()
        };
        after.halt_summary = Some(reason.clone());
        let record = DecisionRecord::new(task_id, DecisionKind::Aborted, after.status, reason);
        self.commit(&before, after, vec![record])
    }

    /// Persist and return a recovery snapshot of the task.
    pub fn snapshot(&self, task_id: &str) -> EngineResult<RecoverySnapshot> {
        let (state, plan) = self.load(task_id)?;
        self.save_snapshot(&state, &plan)
    }

    /// Resumable context for the task as it stands.
    pub fn restore(&self, task_id: &str) -> EngineResult<ResumableContext> {
        let (state, plan) = self.load(task_id)?;
        let snapshot = RecoveryProtocol::snapshot(&state, &plan);
        Ok(RecoveryProtocol::restore(&snapshot).with_plan(&plan))
    }

    pub fn task(&self, task_id: &str) -> EngineResult<TaskState> {
        Ok(self.load(task_id)?.0)
    }

    pub fn plan(&self, task_id: &str) -> EngineResult<Plan> {
        Ok(self.load(task_id)?.1)
    }

    pub fn history(&self, task_id: &str) -> EngineResult<Vec<DecisionRecord>> {
        self.load(task_id)?;
        self.store.decisions(task_id).map_err(EngineError::Store)
    }

    fn load(&self, task_id: &str) -> EngineResult<(TaskState, Plan)> {
        let state = self
            .store
            .load(task_id)
            .map_err(EngineError::Store)?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        let plan = self
            .store
            .load_plan(task_id)
            .map_err(EngineError::Store)?
            .ok_or_else(|| {
                EngineError::Store(anyhow::anyhow!("plan record for task {} is missing", task_id))
            })?;
        Ok((state, plan))
    }

    fn save_snapshot(&self, state: &TaskState, plan: &Plan) -> EngineResult<RecoverySnapshot> {
        let snapshot = RecoveryProtocol::snapshot(state, plan);
        self.store
            .save_snapshot(&snapshot)
            .map_err(EngineError::Store)?;
        Ok(snapshot)
    }

    fn record(&self, record: DecisionRecord) -> EngineResult<()> {
        self.store
            .append_decision(&record)
            .map_err(EngineError::Store)
    }

    /// Persist `after` if it differs from `before`, then the decision records.
    /// Terminal tasks are archived.
    fn commit(
        &self,
        before: &TaskState,
        mut after: TaskState,
        records: Vec<DecisionRecord>,
    ) -> EngineResult<TaskState> {
        if after != *before {
            after.touch();
            self.store.save(&after).map_err(EngineError::Store)?;
        }
        for record in records {
            self.record(record)?;
        }
        if after.status.is_terminal() && !before.status.is_terminal() {
            self.store
                .archive(&after.task_id)
                .map_err(EngineError::Store)?;
        }
        Ok(after)
    }

    fn describe(
        &self,
        action: NextAction,
        state: &TaskState,
        plan: &Plan,
    ) -> EngineResult<NextStep> {
        Ok(match action {
            NextAction::Run(id) => {
                let unknown = || EngineError::UnknownStep {
                    task_id: state.task_id.clone(),
                    step: id.clone(),
                };
                let step = plan.step(&id).ok_or_else(unknown)?;
                let step_state = state.step(&id).ok_or_else(unknown)?;
                NextStep::Step {
                    step: step.clone(),
                    attempt: step_state.attempts,
                    max_attempts: step_state.max_attempts,
                    fix_hints: step_state.hints_given.clone(),
                }
            }
            NextAction::AwaitQualityGate => NextStep::AwaitingQualityGate,
            NextAction::Complete => NextStep::TaskComplete,
            NextAction::Halted { summary } => NextStep::TaskHalted { summary },
            NextAction::Aborted => NextStep::TaskAborted,
            NextAction::Failed { summary } => NextStep::TaskFailed { summary },
        })
    }
}

fn outcome_record(
    task_id: &str,
    state: &TaskState,
    outcome: &AppliedOutcome,
    attempt: u32,
    evidence: &str,
) -> DecisionRecord {
    let step = outcome.step();
    let failure = || {
        first_failure(outcome.results())
            .map(|f| f.summary())
            .unwrap_or_default()
    };
    let (kind, message) = match outcome {
        AppliedOutcome::Passed { results, .. } if results.is_empty() => (
            DecisionKind::StepPassed,
            "No success criteria; step accepted".to_string(),
        ),
        AppliedOutcome::Passed { results, .. } => (
            DecisionKind::StepPassed,
            format!("All {} criteria passed", results.len()),
        ),
        AppliedOutcome::Retry { next_attempt, .. } => {
            let failed = EngineError::ValidationFailure {
                step: step.to_string(),
                summary: failure(),
            };
            (
                DecisionKind::StepRetry,
                format!("{}; retrying as attempt {}", failed, next_attempt),
            )
        }
        AppliedOutcome::Skip { summary, .. } => (DecisionKind::StepSkipped, summary.clone()),
        AppliedOutcome::Halt { summary, .. } => (DecisionKind::StepFailed, summary.clone()),
    };
    let mut message = message;
    if matches!(outcome, AppliedOutcome::Passed { .. }) && !evidence.trim().is_empty() {
        message.push_str(&format!(" (caller evidence: {})", evidence.trim()));
    }
    DecisionRecord::new(task_id, kind, state.status, message)
        .for_step(step, attempt)
        .with_evidence(outcome.results())
}

/// `<plan-slug>-<8 hex>`; always a valid store key.
fn new_task_id(plan_id: &str) -> String {
    let slug: String = plan_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(40)
        .collect();
    let slug = slug.trim_matches('-');
    let suffix = Uuid::new_v4().simple().to_string();
    if slug.is_empty() {
        format!("task-{}", &suffix[..8])
    } else {
        format!("{}-{}", slug, &suffix[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{
        CheckpointSpec, EscalationPolicy, QualityCheck, QualityGateSpec, RetryBehavior,
        SuccessCriterion,
    };
    use crate::store::{FileStateStore, MemoryStateStore, is_valid_task_id};
    use crate::validation::Predicate;
    use crate::validation::testing::ScriptedEvaluator;
    use tempfile::tempdir;

    fn criterion(cmd: &str) -> SuccessCriterion {
        SuccessCriterion::new(format!("{} succeeds", cmd), Predicate::command(cmd))
    }

    fn three_steps() -> Plan {
        Plan::new(
            "demo",
            "Build the thing",
            vec![
                Step::new("a", "Do A").with_criterion(criterion("check-a")),
                Step::new("b", "Do B").with_criterion(criterion("check-b")),
                Step::new("c", "Do C").with_criterion(criterion("check-c")),
            ],
        )
    }

    fn engine(evaluator: ScriptedEvaluator) -> Engine<MemoryStateStore> {
        Engine::new(MemoryStateStore::new(), Arc::new(evaluator))
    }

    fn issued_id(next: NextStep) -> String {
        match next {
            NextStep::Step { step, .. } => step.id,
            other => panic!("expected a step, got {:?}", other),
        }
    }

    #[test]
    fn test_task_ids_are_store_safe() {
        let id = new_task_id("Auth Service / v2");
        assert!(id.starts_with("auth-service---v2-"));
        assert!(is_valid_task_id(&id));
        assert!(new_task_id("...").starts_with("task-"));
    }

    #[test]
    fn test_create_task_lands_in_ready_to_build() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        let state = engine.task(&id).unwrap();
        assert_eq!(state.status, TaskStatus::ReadyToBuild);
        assert_eq!(engine.history(&id).unwrap()[0].kind, DecisionKind::TaskCreated);
    }

    #[test]
    fn test_cyclic_plan_creates_nothing() {
        let engine = engine(ScriptedEvaluator::new());
        let plan = Plan::new(
            "cyclic",
            "never",
            vec![
                Step::new("a", "A").depends_on(&["b"]),
                Step::new("b", "B").depends_on(&["a"]),
            ],
        );
        assert!(matches!(engine.create_task(plan), Err(EngineError::InvalidPlan(_))));
        assert!(engine.resume_list().unwrap().is_empty());
    }

    #[test]
    fn test_attempt_ceiling_rejects_plan() {
        let engine = engine(ScriptedEvaluator::new());
        let plan = Plan::new(
            "greedy",
            "retry forever",
            vec![Step::new("a", "A").with_retry(RetryBehavior::new(
                50,
                EscalationPolicy::HaltWithContext,
            ))],
        );
        let err = engine.create_task(plan).unwrap_err();
        assert!(err.to_string().contains("ceiling"));
    }

    #[tokio::test]
    async fn test_happy_path_reaches_gate() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        for expected in ["a", "b", "c"] {
            assert_eq!(issued_id(engine.next_step(&id).unwrap()), expected);
            let decision = engine
                .report_outcome(&id, expected, StepResult::Success, "")
                .await
                .unwrap();
            assert_eq!(decision, Decision::Continue);
        }
        assert_eq!(engine.next_step(&id).unwrap(), NextStep::AwaitingQualityGate);
        let result = engine.run_quality_gate(&id).await.unwrap();
        assert!(result.verdict.admits());
        assert_eq!(engine.task(&id).unwrap().status, TaskStatus::Complete);
        assert_eq!(engine.next_step(&id).unwrap(), NextStep::TaskComplete);
    }

    #[tokio::test]
    async fn test_reported_failure_skips_validation() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let engine = Engine::new(MemoryStateStore::new(), evaluator.clone());
        let id = engine.create_task(three_steps()).unwrap();
        engine.next_step(&id).unwrap();
        let decision = engine
            .report_outcome(&id, "a", StepResult::Failure, "tool crashed")
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Retry { attempt: 2, .. }));
        assert!(evaluator.calls().is_empty());

        let state = engine.task(&id).unwrap();
        assert_eq!(state.step("a").unwrap().last_results[0].observed, "tool crashed");

        let retry = engine.history(&id).unwrap().pop().unwrap();
        assert_eq!(retry.kind, DecisionKind::StepRetry);
        assert!(retry.message.starts_with("Validation failed for step a:"));
        assert!(retry.message.ends_with("retrying as attempt 2"));
    }

    #[tokio::test]
    async fn test_report_for_wrong_step_is_rejected() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        engine.next_step(&id).unwrap();
        let err = engine
            .report_outcome(&id, "b", StepResult::Success, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StepNotInProgress { .. }));
        let err = engine
            .report_outcome(&id, "nope", StepResult::Success, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownStep { .. }));
    }

    #[tokio::test]
    async fn test_gate_before_steps_finish_is_illegal() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        engine.next_step(&id).unwrap();
        let err = engine.run_quality_gate(&id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::IllegalTransition {
                from: TaskStatus::Building,
                to: TaskStatus::Complete
            }
        ));
    }

    #[tokio::test]
    async fn test_blocked_gate_remains_then_passes_on_rerun() {
        let evaluator = ScriptedEvaluator::new().script("tests", &[false, true]);
        let engine = engine(evaluator);
        let plan = Plan::new("g", "gate", vec![Step::new("only", "Only")]).with_quality_gate(
            QualityGateSpec::new(vec![QualityCheck::required("tests", Predicate::command("tests"))]),
        );
        let id = engine.create_task(plan).unwrap();
        engine.next_step(&id).unwrap();
        engine
            .report_outcome(&id, "only", StepResult::Success, "")
            .await
            .unwrap();

        let blocked = engine.run_quality_gate(&id).await.unwrap();
        assert_eq!(blocked.blocking(), vec!["tests"]);
        assert_eq!(engine.task(&id).unwrap().status, TaskStatus::AwaitingQualityGate);

        let passed = engine.run_quality_gate(&id).await.unwrap();
        assert!(passed.verdict.admits());
        assert_eq!(engine.task(&id).unwrap().status, TaskStatus::Complete);
        assert_eq!(engine.run_quality_gate(&id).await.unwrap(), passed);
    }

    #[tokio::test]
    async fn test_blocked_gate_can_fail_task() {
        let evaluator = ScriptedEvaluator::new().script("tests", &[false]);
        let engine = Engine::with_settings(
            MemoryStateStore::new(),
            Arc::new(evaluator),
            EngineSettings {
                on_block: BlockBehavior::Fail,
                ..EngineSettings::default()
            },
        );
        let plan = Plan::new("g", "gate", vec![Step::new("only", "Only")]).with_quality_gate(
            QualityGateSpec::new(vec![QualityCheck::required("tests", Predicate::command("tests"))]),
        );
        let id = engine.create_task(plan).unwrap();
        engine.next_step(&id).unwrap();
        engine
            .report_outcome(&id, "only", StepResult::Success, "")
            .await
            .unwrap();
        let blocked = engine.run_quality_gate(&id).await.unwrap();

        let state = engine.task(&id).unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state.halt_summary.unwrap().contains("tests"));
        assert!(matches!(engine.next_step(&id).unwrap(), NextStep::TaskFailed { .. }));
        assert!(engine.resume_list().unwrap().is_empty());

        // The gate already decided this task; asking again returns the same verdict.
        let trail = engine.history(&id).unwrap().len();
        assert_eq!(engine.run_quality_gate(&id).await.unwrap(), blocked);
        assert_eq!(engine.history(&id).unwrap().len(), trail);
        assert_eq!(engine.task(&id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_aborted_task_has_no_gate_to_return() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        engine.abort(&id, "stop").unwrap();
        assert!(matches!(
            engine.run_quality_gate(&id).await,
            Err(EngineError::TaskTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_mandatory_checkpoint_failure_halts() {
        let evaluator = ScriptedEvaluator::new().script("verify-a", &[false]);
        let engine = engine(evaluator);
        let plan = three_steps().with_checkpoint(
            CheckpointSpec::new("after-a", "a")
                .with_verify(criterion("verify-a"))
                .mandatory(true),
        );
        let id = engine.create_task(plan).unwrap();
        engine.next_step(&id).unwrap();
        let decision = engine
            .report_outcome(&id, "a", StepResult::Success, "")
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Halted { ref summary } if summary.contains("after-a")));
        assert_eq!(engine.task(&id).unwrap().status, TaskStatus::Halted);
        assert!(matches!(engine.next_step(&id).unwrap(), NextStep::TaskHalted { .. }));
    }

    #[tokio::test]
    async fn test_advisory_checkpoint_failure_continues() {
        let evaluator = ScriptedEvaluator::new().script("verify-a", &[false]);
        let engine = engine(evaluator);
        let plan = three_steps().with_checkpoint(
            CheckpointSpec::new("after-a", "a").with_verify(criterion("verify-a")),
        );
        let id = engine.create_task(plan).unwrap();
        engine.next_step(&id).unwrap();
        let decision = engine
            .report_outcome(&id, "a", StepResult::Success, "")
            .await
            .unwrap();
        assert_eq!(decision, Decision::Continue);
        let state = engine.task(&id).unwrap();
        assert_eq!(state.status, TaskStatus::Building);
        assert_eq!(state.checkpoint_failures.len(), 1);
        assert_eq!(issued_id(engine.next_step(&id).unwrap()), "b");
    }

    #[tokio::test]
    async fn test_abort_is_terminal_and_archived() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        engine.next_step(&id).unwrap();
        let state = engine.abort(&id, "changed my mind").unwrap();
        assert_eq!(state.status, TaskStatus::Aborted);

        assert_eq!(engine.next_step(&id).unwrap(), NextStep::TaskAborted);
        let err = engine
            .report_outcome(&id, "a", StepResult::Success, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskTerminal { .. }));
        assert!(matches!(engine.abort(&id, ""), Err(EngineError::TaskTerminal { .. })));
        assert!(engine.resume_list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_engine_resumes_decided_state() {
        let dir = tempdir().unwrap();
        let id = {
            let engine = Engine::new(
                FileStateStore::open(dir.path()).unwrap(),
                Arc::new(ScriptedEvaluator::new().script("check-a", &[false])),
            );
            let id = engine.create_task(three_steps()).unwrap();
            engine.next_step(&id).unwrap();
            engine
                .report_outcome(&id, "a", StepResult::Success, "")
                .await
                .unwrap();
            id
        };

        let engine = Engine::new(
            FileStateStore::open(dir.path()).unwrap(),
            Arc::new(ScriptedEvaluator::new()),
        );
        match engine.next_step(&id).unwrap() {
            NextStep::Step { step, attempt, .. } => {
                assert_eq!(step.id, "a");
                assert_eq!(attempt, 2);
            }
            other => panic!("expected retry of a, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_task() {
        let engine = engine(ScriptedEvaluator::new());
        assert!(matches!(engine.next_step("ghost"), Err(EngineError::TaskNotFound(_))));
        assert!(matches!(engine.history("ghost"), Err(EngineError::TaskNotFound(_))));
    }

    #[test]
    fn test_restore_describes_current_step() {
        let engine = engine(ScriptedEvaluator::new());
        let id = engine.create_task(three_steps()).unwrap();
        engine.next_step(&id).unwrap();
        let snapshot = engine.snapshot(&id).unwrap();
        let ctx = engine.restore(&id).unwrap();
        assert_eq!(ctx.snapshot, snapshot);
        assert_eq!(ctx.current_action.as_deref(), Some("Do A"));
        assert_eq!(engine.store().load_snapshot(&id).unwrap(), Some(snapshot));
    }
}
