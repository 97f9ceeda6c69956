//! Task lifecycle commands: create, next, report, gate, rollback, abort.

use anyhow::Result;
use std::path::Path;

use super::{open_engine, styled_status};
use crate::Cli;

pub fn cmd_create(cli: &Cli, project_dir: &Path, plan_path: &Path) -> Result<()> {
    use stepgate::plan::Plan;

    let plan = Plan::load(plan_path)?;
    let engine = open_engine(cli, project_dir)?;
    let steps = plan.steps.len();
    let checkpoints = plan.checkpoints.len();
    let task_id = engine.create_task(plan)?;

    println!("Created task {}", console::style(&task_id).bold());
    println!("  {} step(s), {} checkpoint(s)", steps, checkpoints);
    println!();
    println!("Run `stepgate next {}` to get the first step.", task_id);
    Ok(())
}

pub fn cmd_next(cli: &Cli, project_dir: &Path, task_id: &str) -> Result<()> {
    use stepgate::engine::NextStep;

    let engine = open_engine(cli, project_dir)?;
    match engine.next_step(task_id)? {
        NextStep::Step {
            step,
            attempt,
            max_attempts,
            fix_hints,
        } => {
            println!(
                "Step {} (attempt {}/{})",
                console::style(&step.id).bold(),
                attempt,
                max_attempts
            );
            println!("  {}", step.action);
            if !step.criteria.is_empty() {
                println!();
                println!("Success criteria:");
                for criterion in &step.criteria {
                    println!("  - {}", criterion.description);
                }
            }
            if !fix_hints.is_empty() {
                println!();
                println!("{}", console::style("Hints from earlier attempts:").yellow());
                for hint in &fix_hints {
                    println!("  - {}", hint);
                }
            }
            println!();
            println!(
                "When done: stepgate report {} {} --pass (or --fail)",
                task_id, step.id
            );
        }
        NextStep::AwaitingQualityGate => {
            println!("All steps are done.");
            println!("Run `stepgate gate {}` to run the quality gate.", task_id);
        }
        NextStep::TaskComplete => {
            println!("Task {} is {}.", task_id, console::style("COMPLETE").green());
        }
        NextStep::TaskHalted { summary } => {
            println!("Task {} is {}.", task_id, console::style("HALTED").yellow());
            println!("  {}", summary);
            println!();
            println!("Roll back with `stepgate rollback {} <checkpoint>`", task_id);
            println!("or cancel with `stepgate abort {}`.", task_id);
        }
        NextStep::TaskAborted => {
            println!("Task {} was {}.", task_id, console::style("ABORTED").red());
        }
        NextStep::TaskFailed { summary } => {
            println!("Task {} {}.", task_id, console::style("FAILED").red());
            println!("  {}", summary);
        }
    }
    Ok(())
}

pub async fn cmd_report(
    cli: &Cli,
    project_dir: &Path,
    task_id: &str,
    step_id: &str,
    passed: bool,
    evidence: &str,
) -> Result<()> {
    use stepgate::engine::{Decision, StepResult};

    let engine = open_engine(cli, project_dir)?;
    let result = if passed {
        StepResult::Success
    } else {
        StepResult::Failure
    };

    match engine
        .report_outcome(task_id, step_id, result, evidence)
        .await?
    {
        Decision::Continue => {
            println!("{} Step {} passed.", console::style("✓").green(), step_id);
            println!("Run `stepgate next {}` to continue.", task_id);
        }
        Decision::Retry { fix_hints, attempt } => {
            println!(
                "{} Step {} did not pass. Retry as attempt {}.",
                console::style("↻").yellow(),
                step_id,
                attempt
            );
            for hint in &fix_hints {
                println!("  - {}", hint);
            }
        }
        Decision::Skipped { summary } => {
            println!("{} Step {} skipped.", console::style("→").yellow(), step_id);
            println!("  {}", summary);
        }
        Decision::Halted { summary } => {
            println!("{} Task halted.", console::style("✗").red());
            println!("  {}", summary);
        }
    }

    // Detail of every evaluated criterion, for the caller's remediation.
    if cli.verbose {
        let state = engine.task(task_id)?;
        if let Some(step) = state.step(step_id) {
            for result in &step.last_results {
                println!("  {}", result.summary());
            }
        }
    }
    Ok(())
}

pub async fn cmd_gate(cli: &Cli, project_dir: &Path, task_id: &str) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let result = engine.run_quality_gate(task_id).await?;

    println!("Quality gate: {}", console::style(&result.verdict).bold());
    for check in &result.checks {
        let mark = if check.passed {
            console::style("✓").green()
        } else if check.required {
            console::style("✗").red()
        } else {
            console::style("!").yellow()
        };
        println!("  {} {}", mark, check.name);
        if !check.passed {
            println!("      expected {}", check.expected);
            println!("      observed {}", check.observed);
        }
    }

    let state = engine.task(task_id)?;
    println!();
    println!("Task status: {}", styled_status(state.status));

    if let Err(err) = result.into_result() {
        if err.is_recoverable() && !state.status.is_terminal() {
            println!("Fix the failing checks and run `stepgate gate {}` again.", task_id);
        }
        return Err(err.into());
    }
    Ok(())
}

pub fn cmd_rollback(cli: &Cli, project_dir: &Path, task_id: &str, checkpoint: &str) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let state = engine.rollback(task_id, checkpoint)?;

    println!(
        "Rolled back task {} to checkpoint {}",
        task_id,
        console::style(checkpoint).bold()
    );
    println!("  status: {}", styled_status(state.status));
    if let Some(step) = &state.current_step {
        println!("  next step: {}", step);
    }
    Ok(())
}

pub fn cmd_abort(cli: &Cli, project_dir: &Path, task_id: &str, reason: &str) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let state = engine.abort(task_id, reason)?;
    println!("Task {} is {}.", task_id, styled_status(state.status));
    Ok(())
}
