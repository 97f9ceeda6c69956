//! JSON file store.
//!
//! Layout under the store root:
//! ```text
//! tasks/<id>.json       active task records
//! archive/<id>.json     terminal task records
//! plans/<id>.json       the plan each task executes
//! audit/<id>.jsonl      decision trail, one record per line
//! snapshots/<id>.json   latest recovery snapshot
//! ```

use super::{StateStore, is_valid_task_id, sort_recent_first};
use crate::audit::DecisionRecord;
use crate::plan::Plan;
use crate::recovery::RecoverySnapshot;
use crate::state::TaskState;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TASKS_DIR: &str = "tasks";
const ARCHIVE_DIR: &str = "archive";
const PLANS_DIR: &str = "plans";
const AUDIT_DIR: &str = "audit";
const SNAPSHOTS_DIR: &str = "snapshots";

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        for dir in [TASKS_DIR, ARCHIVE_DIR, PLANS_DIR, AUDIT_DIR, SNAPSHOTS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create store directory: {}", path.display()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, dir: &str, task_id: &str, ext: &str) -> Result<PathBuf> {
        if !is_valid_task_id(task_id) {
            bail!("Invalid task id '{}'", task_id);
        }
        Ok(self.root.join(dir).join(format!("{}.{}", task_id, ext)))
    }

    /// `None` for ids that cannot name a record.
    fn lookup(&self, dir: &str, task_id: &str, ext: &str) -> Option<PathBuf> {
        self.path(dir, task_id, ext).ok()
    }
}

/// Write to a temp file, flush it to disk, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to finalize {}", path.display()))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize record")?;
    write_atomic(path, &json)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

impl StateStore for FileStateStore {
    fn create(&self, state: &TaskState, plan: &Plan) -> Result<()> {
        let task_path = self.path(TASKS_DIR, &state.task_id, "json")?;
        let archived = self.path(ARCHIVE_DIR, &state.task_id, "json")?;
        if task_path.exists() || archived.exists() {
            bail!("Task {} already exists", state.task_id);
        }
        write_json(&self.path(PLANS_DIR, &state.task_id, "json")?, plan)?;
        write_json(&task_path, state)
    }

    fn save(&self, state: &TaskState) -> Result<()> {
        write_json(&self.path(TASKS_DIR, &state.task_id, "json")?, state)
    }

    fn load(&self, task_id: &str) -> Result<Option<TaskState>> {
        for dir in [TASKS_DIR, ARCHIVE_DIR] {
            if let Some(path) = self.lookup(dir, task_id, "json")
                && let Some(state) = read_json(&path)?
            {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    fn load_plan(&self, task_id: &str) -> Result<Option<Plan>> {
        match self.lookup(PLANS_DIR, task_id, "json") {
            Some(path) => read_json(&path),
            None => Ok(None),
        }
    }

    fn list_active(&self) -> Result<Vec<TaskState>> {
        let dir = self.root.join(TASKS_DIR);
        let mut states = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match read_json::<TaskState>(&path) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable task record {}: {:#}", path.display(), e),
            }
        }
        sort_recent_first(&mut states);
        Ok(states)
    }

    fn archive(&self, task_id: &str) -> Result<()> {
        let from = self.path(TASKS_DIR, task_id, "json")?;
        if !from.exists() {
            return Ok(());
        }
        let to = self.path(ARCHIVE_DIR, task_id, "json")?;
        fs::rename(&from, &to)
            .with_context(|| format!("Failed to archive task {}", task_id))?;
        tracing::debug!(task = %task_id, "task archived");
        Ok(())
    }

    fn append_decision(&self, record: &DecisionRecord) -> Result<()> {
        let path = self.path(AUDIT_DIR, &record.task_id, "jsonl")?;
        let mut line = serde_json::to_string(record).context("Failed to serialize decision")?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .context("Failed to write decision record")?;
        file.sync_data().context("Failed to sync audit log")?;
        Ok(())
    }

    fn decisions(&self, task_id: &str) -> Result<Vec<DecisionRecord>> {
        let Some(path) = self.lookup(AUDIT_DIR, task_id, "jsonl") else {
            return Ok(Vec::new());
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("Failed to parse decision {} in {}", i + 1, path.display())
                })
            })
            .collect()
    }

    fn save_snapshot(&self, snapshot: &RecoverySnapshot) -> Result<()> {
        write_json(&self.path(SNAPSHOTS_DIR, &snapshot.task_id, "json")?, snapshot)
    }

    fn load_snapshot(&self, task_id: &str) -> Result<Option<RecoverySnapshot>> {
        match self.lookup(SNAPSHOTS_DIR, task_id, "json") {
            Some(path) => read_json(&path),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use crate::plan::Step;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_contract() {
        let dir = tempdir().unwrap();
        contract::create_load_and_save(&FileStateStore::open(&dir.path().join("a")).unwrap());
        contract::list_orders_by_recency_and_archive_hides(
            &FileStateStore::open(&dir.path().join("b")).unwrap(),
        );
        contract::decisions_and_snapshots(&FileStateStore::open(&dir.path().join("c")).unwrap());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let plan = Plan::new("p", "goal", vec![Step::new("a", "A")]);
        let state = TaskState::new("t1", &plan);
        FileStateStore::open(dir.path())
            .unwrap()
            .create(&state, &plan)
            .unwrap();

        let reopened = FileStateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load("t1").unwrap(), Some(state));
        assert!(dir.path().join("tasks/t1.json").exists());
        assert!(!dir.path().join("tasks/t1.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_record_is_skipped_in_listing() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("tasks/broken.json"), "{ not json").unwrap();
        assert!(store.list_active().unwrap().is_empty());
        assert!(store.load("broken").is_err());
    }

    #[test]
    fn test_invalid_ids_are_not_found() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        assert_eq!(store.load("../escape").unwrap(), None);
        assert!(store.decisions("../escape").unwrap().is_empty());
    }
}
