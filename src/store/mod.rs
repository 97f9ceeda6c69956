//! Durable task storage with pluggable backends.
//!
//! - `file`: one JSON record per task under the project directory (default)
//! - `memory`: non-persistent, for tests and embedding
//!
//! Every write is complete before it returns. The engine relies on this to persist a
//! decision before reporting it.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::audit::DecisionRecord;
use crate::plan::Plan;
use crate::recovery::RecoverySnapshot;
use crate::state::TaskState;
use anyhow::Result;

pub trait StateStore: Send + Sync {
    /// Store a new task together with the plan it executes. Fails if the id is taken.
    fn create(&self, state: &TaskState, plan: &Plan) -> Result<()>;

    /// Overwrite the task record. Last writer wins.
    fn save(&self, state: &TaskState) -> Result<()>;

    /// Load a task, active or archived.
    fn load(&self, task_id: &str) -> Result<Option<TaskState>>;

    fn load_plan(&self, task_id: &str) -> Result<Option<Plan>>;

    /// Tasks not yet archived, most recently updated first.
    fn list_active(&self) -> Result<Vec<TaskState>>;

    /// Move a terminal task out of the active set.
    fn archive(&self, task_id: &str) -> Result<()>;

    fn append_decision(&self, record: &DecisionRecord) -> Result<()>;

    /// Decision trail in append order.
    fn decisions(&self, task_id: &str) -> Result<Vec<DecisionRecord>>;

    fn save_snapshot(&self, snapshot: &RecoverySnapshot) -> Result<()>;

    fn load_snapshot(&self, task_id: &str) -> Result<Option<RecoverySnapshot>>;
}

/// Task ids double as file names.
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && !task_id.starts_with('.')
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn sort_recent_first(states: &mut [TaskState]) {
    states.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
}
