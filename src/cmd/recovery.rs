//! Inspection and recovery commands: resume, snapshot, show, history.

use anyhow::Result;
use std::path::Path;

use super::{open_engine, styled_status};
use crate::Cli;

pub fn cmd_resume(cli: &Cli, project_dir: &Path, with_context: bool) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let entries = engine.resume_list()?;

    if entries.is_empty() {
        println!("No resumable tasks.");
        println!("Run `stepgate create <plan.json>` to start one.");
        return Ok(());
    }

    println!("Resumable tasks (most recent first):");
    println!();
    for entry in &entries {
        println!(
            "  {}  {:<24} {}/{} steps  {}",
            entry.last_activity.format("%Y-%m-%d %H:%M:%S"),
            styled_status(entry.status).to_string(),
            entry.completed_steps,
            entry.total_steps,
            console::style(&entry.task_id).bold()
        );
        println!("      {}", console::style(&entry.goal).dim());
    }

    if with_context {
        let top = &entries[0];
        let context = engine.restore(&top.task_id)?;
        println!();
        print!("{}", context.render());
    }
    Ok(())
}

pub fn cmd_snapshot(cli: &Cli, project_dir: &Path, task_id: &str) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let snapshot = engine.snapshot(task_id)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub fn cmd_show(cli: &Cli, project_dir: &Path, task_id: &str) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let state = engine.task(task_id)?;
    let plan = engine.plan(task_id)?;

    println!("Task {}", console::style(&state.task_id).bold());
    println!("  goal:   {}", state.goal);
    println!("  plan:   {}", state.plan_id);
    println!("  status: {}", styled_status(state.status));
    if let Some(summary) = &state.halt_summary {
        println!("  note:   {}", summary);
    }
    println!();

    println!("Steps:");
    for step in &state.steps {
        let marker = if state.current_step.as_deref() == Some(step.id.as_str()) {
            "▸"
        } else {
            " "
        };
        let action = plan.step(&step.id).map(|s| s.action.as_str()).unwrap_or("");
        println!(
            "  {} {:<20} {:<12} {}/{}  {}",
            marker,
            step.id,
            step.status.to_string(),
            step.attempts,
            step.max_attempts,
            console::style(action).dim()
        );
    }

    if !state.checkpoints_reached.is_empty() {
        println!();
        println!("Checkpoints reached:");
        for record in &state.checkpoints_reached {
            println!(
                "  {} (after {}) at {}",
                record.name,
                record.anchor_step,
                record.reached_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if !state.checkpoint_failures.is_empty() {
        println!();
        println!("Checkpoint failures:");
        for failure in &state.checkpoint_failures {
            let kind = if failure.mandatory {
                "mandatory"
            } else {
                "advisory"
            };
            println!("  {} ({}): {}", failure.name, kind, failure.failure);
        }
    }

    if let Some(gate) = &state.gate_result {
        println!();
        println!("{}", gate.summary());
    }
    Ok(())
}

pub fn cmd_history(cli: &Cli, project_dir: &Path, task_id: &str) -> Result<()> {
    let engine = open_engine(cli, project_dir)?;
    let records = engine.history(task_id)?;

    if records.is_empty() {
        println!("No decisions recorded for {}.", task_id);
        return Ok(());
    }
    for record in &records {
        println!("{}", record.display_line());
        for evidence in &record.evidence {
            println!("      {}", console::style(evidence.summary()).dim());
        }
    }
    Ok(())
}
