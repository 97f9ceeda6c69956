//! In-memory state store (non-persistent).

use super::{StateStore, sort_recent_first};
use crate::audit::DecisionRecord;
use crate::plan::Plan;
use crate::recovery::RecoverySnapshot;
use crate::state::TaskState;
use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    active: HashMap<String, TaskState>,
    archived: HashMap<String, TaskState>,
    plans: HashMap<String, Plan>,
    decisions: HashMap<String, Vec<DecisionRecord>>,
    snapshots: HashMap<String, RecoverySnapshot>,
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl StateStore for MemoryStateStore {
    fn create(&self, state: &TaskState, plan: &Plan) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.active.contains_key(&state.task_id) || inner.archived.contains_key(&state.task_id)
        {
            bail!("Task {} already exists", state.task_id);
        }
        inner.plans.insert(state.task_id.clone(), plan.clone());
        inner.active.insert(state.task_id.clone(), state.clone());
        Ok(())
    }

    fn save(&self, state: &TaskState) -> Result<()> {
        self.lock()?
            .active
            .insert(state.task_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Option<TaskState>> {
        let inner = self.lock()?;
        Ok(inner
            .active
            .get(task_id)
            .or_else(|| inner.archived.get(task_id))
            .cloned())
    }

    fn load_plan(&self, task_id: &str) -> Result<Option<Plan>> {
        Ok(self.lock()?.plans.get(task_id).cloned())
    }

    fn list_active(&self) -> Result<Vec<TaskState>> {
        let mut states: Vec<TaskState> = self.lock()?.active.values().cloned().collect();
        sort_recent_first(&mut states);
        Ok(states)
    }

    fn archive(&self, task_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(state) = inner.active.remove(task_id) {
            inner.archived.insert(task_id.to_string(), state);
        }
        Ok(())
    }

    fn append_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.lock()?
            .decisions
            .entry(record.task_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn decisions(&self, task_id: &str) -> Result<Vec<DecisionRecord>> {
        Ok(self
            .lock()?
            .decisions
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_snapshot(&self, snapshot: &RecoverySnapshot) -> Result<()> {
        self.lock()?
            .snapshots
            .insert(snapshot.task_id.clone(), snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self, task_id: &str) -> Result<Option<RecoverySnapshot>> {
        Ok(self.lock()?.snapshots.get(task_id).cloned())
    }
}
