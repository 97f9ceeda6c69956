//! Structural validation of a plan's step graph.
//!
//! `StepGraph::build` is the admission check for `create_task`: it rejects empty
//! plans, duplicate or unknown ids, zero retry budgets, bad predicates, dangling
//! checkpoints and dependency cycles.

use super::Plan;
use crate::errors::{EngineError, EngineResult};
use std::collections::{HashMap, HashSet};

/// Index into the plan's step list.
pub type StepIndex = usize;

/// Dependency graph of a validated plan.
#[derive(Debug)]
pub struct StepGraph {
    index_map: HashMap<String, StepIndex>,
    /// index -> steps that depend on it
    forward_edges: Vec<Vec<StepIndex>>,
    /// index -> steps it depends on
    reverse_edges: Vec<Vec<StepIndex>>,
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidPlan(message)
}

impl StepGraph {
    fn len(&self) -> usize {
        self.forward_edges.len()
    }

    pub fn get_index(&self, id: &str) -> Option<StepIndex> {
        self.index_map.get(id).copied()
    }

    /// Steps that depend on the given step.
    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Steps the given step depends on.
    pub fn dependencies(&self, index: StepIndex) -> &[StepIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// `roots` plus everything they transitively depend on.
    pub fn dependency_closure(
        &self,
        roots: impl IntoIterator<Item = StepIndex>,
    ) -> HashSet<StepIndex> {
        let mut closure = HashSet::new();
        let mut stack: Vec<StepIndex> = roots.into_iter().collect();
        while let Some(index) = stack.pop() {
            if closure.insert(index) {
                stack.extend_from_slice(self.dependencies(index));
            }
        }
        closure
    }

    /// Validate `plan` and build its dependency graph.
    pub fn build(plan: &Plan) -> EngineResult<Self> {
        if plan.id.trim().is_empty() {
            return Err(invalid("plan id is empty".to_string()));
        }
        if plan.steps.is_empty() {
            return Err(invalid(format!("plan '{}' has no steps", plan.id)));
        }

        let mut index_map = HashMap::new();
        for (i, step) in plan.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(invalid(format!("step at position {} has an empty id", i + 1)));
            }
            if index_map.insert(step.id.clone(), i).is_some() {
                return Err(invalid(format!("duplicate step id: {}", step.id)));
            }
            if step.retry.max_attempts == 0 {
                return Err(invalid(format!(
                    "step '{}' has max_attempts = 0; at least one attempt is required",
                    step.id
                )));
            }
            for criterion in &step.criteria {
                criterion
                    .check
                    .validate()
                    .map_err(|e| invalid(format!("step '{}': {}", step.id, e)))?;
            }
        }

        let mut forward_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); plan.steps.len()];
        let mut reverse_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); plan.steps.len()];

        for (to_idx, step) in plan.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let from_idx = *index_map.get(dep).ok_or_else(|| {
                    invalid(format!(
                        "unknown dependency '{}' in step '{}': no step with that id exists",
                        dep, step.id
                    ))
                })?;
                if from_idx == to_idx {
                    return Err(invalid(format!("step '{}' depends on itself", step.id)));
                }
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = StepGraph {
            index_map,
            forward_edges,
            reverse_edges,
        };
        graph.validate_no_cycles(plan)?;
        graph.validate_checkpoints(plan)?;

        for check in &plan.quality_gate.checks {
            check
                .check
                .validate()
                .map_err(|e| invalid(format!("quality check '{}': {}", check.name, e)))?;
        }

        Ok(graph)
    }

    /// Kahn's algorithm; leftover nodes with in-degree > 0 sit on a cycle.
    fn validate_no_cycles(&self, plan: &Plan) -> EngineResult<()> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut queue: Vec<StepIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != self.len() {
            let cycle_steps: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| plan.steps[i].id.as_str())
                .collect();
            return Err(invalid(format!(
                "cycle detected in step dependencies; involved steps: {:?}",
                cycle_steps
            )));
        }
        Ok(())
    }

    fn validate_checkpoints(&self, plan: &Plan) -> EngineResult<()> {
        let mut names = HashSet::new();
        for checkpoint in &plan.checkpoints {
            if !names.insert(checkpoint.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate checkpoint name: {}",
                    checkpoint.name
                )));
            }
            if self.get_index(&checkpoint.anchor_step).is_none() {
                return Err(invalid(format!(
                    "checkpoint '{}' is anchored on unknown step '{}'",
                    checkpoint.name, checkpoint.anchor_step
                )));
            }
            if let Some(target) = &checkpoint.rollback_target
                && self.get_index(target).is_none()
            {
                return Err(invalid(format!(
                    "checkpoint '{}' rolls back to unknown step '{}'",
                    checkpoint.name, target
                )));
            }
            for criterion in &checkpoint.verify {
                criterion
                    .check
                    .validate()
                    .map_err(|e| invalid(format!("checkpoint '{}': {}", checkpoint.name, e)))?;
            }
        }
        Ok(())
    }
}
