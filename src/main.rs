use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "stepgate")]
#[command(
    version,
    about = "Drive multi-step plans through validated, resumable steps"
)]
pub struct Cli {
    /// Debug diagnostics on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .stepgate/ with a default stepgate.toml
    Init,
    /// Validate a plan file and start a task for it
    Create {
        /// Path to the plan (JSON)
        plan: PathBuf,
    },
    /// Show the step to perform now
    Next { task: String },
    /// Report the outcome of the current step
    Report {
        task: String,
        step: String,
        /// The action succeeded; success criteria are checked
        #[arg(long, conflicts_with = "fail", required_unless_present = "fail")]
        pass: bool,
        /// The action failed; counts as a failed attempt
        #[arg(long)]
        fail: bool,
        /// What happened, recorded with the decision
        #[arg(long, default_value = "")]
        evidence: String,
    },
    /// Run the final quality gate
    Gate { task: String },
    /// List tasks that can be resumed, most recent first
    Resume {
        /// Print the resumable context of the top task
        #[arg(long)]
        context: bool,
    },
    /// Return a task to a verified checkpoint
    Rollback { task: String, checkpoint: String },
    /// Cancel a task
    Abort {
        task: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Show a task's state
    Show { task: String },
    /// Save and print a recovery snapshot
    Snapshot { task: String },
    /// Show a task's decision trail
    History { task: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default stepgate.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    stepgate::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Create { plan } => cmd::cmd_create(&cli, &project_dir, plan)?,
        Commands::Next { task } => cmd::cmd_next(&cli, &project_dir, task)?,
        Commands::Report {
            task,
            step,
            pass,
            fail,
            evidence,
        } => {
            let passed = *pass && !*fail;
            cmd::cmd_report(&cli, &project_dir, task, step, passed, evidence).await?
        }
        Commands::Gate { task } => cmd::cmd_gate(&cli, &project_dir, task).await?,
        Commands::Resume { context } => cmd::cmd_resume(&cli, &project_dir, *context)?,
        Commands::Rollback { task, checkpoint } => {
            cmd::cmd_rollback(&cli, &project_dir, task, checkpoint)?
        }
        Commands::Abort { task, reason } => cmd::cmd_abort(&cli, &project_dir, task, reason)?,
        Commands::Show { task } => cmd::cmd_show(&cli, &project_dir, task)?,
        Commands::Snapshot { task } => cmd::cmd_snapshot(&cli, &project_dir, task)?,
        Commands::History { task } => cmd::cmd_history(&cli, &project_dir, task)?,
    }

    Ok(())
}
