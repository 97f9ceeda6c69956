//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                          |
//! |-----------------|-----------------------------------------------------------|
//! | `project`       | `Init`                                                    |
//! | `task`          | `Create`, `Next`, `Report`, `Gate`, `Rollback`, `Abort`    |
//! | `recovery`      | `Resume`, `Snapshot`, `Show`, `History`                   |
//! | `config`        | `Config`                                                  |

pub mod config;
pub mod project;
pub mod recovery;
pub mod task;

pub use config::cmd_config;
pub use project::cmd_init;
pub use recovery::{cmd_history, cmd_resume, cmd_show, cmd_snapshot};
pub use task::{cmd_abort, cmd_create, cmd_gate, cmd_next, cmd_report, cmd_rollback};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use stepgate::config::Config;
use stepgate::engine::Engine;
use stepgate::state::TaskStatus;
use stepgate::store::FileStateStore;

/// Resolve configuration and open the engine over the file store.
pub(crate) fn open_engine(
    cli: &crate::Cli,
    project_dir: &Path,
) -> Result<Engine<FileStateStore>> {
    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose)?;
    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }

    let store_dir = config.store_dir();
    let store = FileStateStore::open(&store_dir)
        .with_context(|| format!("Failed to open state store at {}", store_dir.display()))?;
    tracing::debug!(store = %store.root().display(), "opened state store");

    Ok(Engine::with_settings(
        store,
        Arc::new(config.evaluator()),
        config.engine_settings(),
    ))
}

pub(crate) fn styled_status(status: TaskStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        TaskStatus::Complete => console::style(text).green(),
        TaskStatus::Failed | TaskStatus::Aborted => console::style(text).red(),
        TaskStatus::Halted | TaskStatus::AwaitingQualityGate => console::style(text).yellow(),
        _ => console::style(text).cyan(),
    }
}
