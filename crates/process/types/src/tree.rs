//! Execution trees: arena storage for one process instance
//!
//! Executions are addressed by id and link to each other through ids,
//! so cascading removal and consistency checks never chase live
//! references. The tree is exclusively owned by the command processing
//! its instance.

use crate::{
    as_i64, ActivityBehavior, ActivityId, Execution, ExecutionId, ProcessDefinitionId,
    ProcessError, ProcessInstanceId, ProcessResult, VariableMap, VariableValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// The calling side of a sub process instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperExecution {
    pub process_instance_id: ProcessInstanceId,
    pub execution_id: ExecutionId,
}

/// Per-instance replacement of an activity's behavior or properties
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<ActivityBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_type: Option<String>,
}

/// The runtime tree of one process instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTree {
    pub process_instance_id: ProcessInstanceId,
    pub process_definition_id: ProcessDefinitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_execution: Option<SuperExecution>,
    executions: BTreeMap<ExecutionId, Execution>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    overlays: BTreeMap<ActivityId, ActivityOverlay>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionTree {
    /// Create a tree holding only the process instance root
    pub fn new(process_definition_id: ProcessDefinitionId, initial: Option<ActivityId>) -> Self {
        let instance_id = ProcessInstanceId::generate();
        let root_id = instance_id.root_execution();
        let mut root = Execution::new(root_id.clone(), instance_id.clone(), None);
        root.is_scope = true;
        root.activity = initial;

        let mut executions = BTreeMap::new();
        executions.insert(root_id, root);

        Self {
            process_instance_id: instance_id,
            process_definition_id,
            business_key: None,
            super_execution: None,
            executions,
            overlays: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn with_business_key(mut self, business_key: impl Into<String>) -> Self {
        let key = business_key.into();
        let root_id = self.root_id();
        if let Some(root) = self.executions.get_mut(&root_id) {
            root.business_key = Some(key.clone());
        }
        self.business_key = Some(key);
        self
    }

    pub fn with_super_execution(mut self, super_execution: SuperExecution) -> Self {
        self.super_execution = Some(super_execution);
        self
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn root_id(&self) -> ExecutionId {
        self.process_instance_id.root_execution()
    }

    pub fn root(&self) -> ProcessResult<&Execution> {
        self.get(&self.root_id())
    }

    pub fn get(&self, id: &ExecutionId) -> ProcessResult<&Execution> {
        self.executions
            .get(id)
            .ok_or_else(|| ProcessError::ExecutionNotFound(id.clone()))
    }

    pub fn get_mut(&mut self, id: &ExecutionId) -> ProcessResult<&mut Execution> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| ProcessError::ExecutionNotFound(id.clone()))
    }

    pub fn find(&self, id: &ExecutionId) -> Option<&Execution> {
        self.executions.get(id)
    }

    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.executions.contains_key(id)
    }

    pub fn parent_of(&self, id: &ExecutionId) -> ProcessResult<Option<ExecutionId>> {
        Ok(self.get(id)?.parent.clone())
    }

    /// The parent of an execution that must have one
    pub fn require_parent(&self, id: &ExecutionId) -> ProcessResult<ExecutionId> {
        self.parent_of(id)?
            .ok_or_else(|| ProcessError::MissingParent(id.clone()))
    }

    pub fn children_of(&self, id: &ExecutionId) -> ProcessResult<Vec<ExecutionId>> {
        Ok(self.get(id)?.children.clone())
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Execution> {
        self.executions.values()
    }

    /// Executions currently sitting at an activity
    pub fn executions_at(&self, activity: &ActivityId) -> Vec<&Execution> {
        self.executions
            .values()
            .filter(|e| e.is_at(activity))
            .collect()
    }

    /// Active executions without children, i.e. the current tokens
    pub fn active_leaves(&self) -> Vec<&Execution> {
        self.executions
            .values()
            .filter(|e| e.is_live() && e.children.is_empty())
            .collect()
    }

    /// Whether the process instance has ended
    pub fn is_ended(&self) -> bool {
        self.root().map(|r| r.is_ended).unwrap_or(true)
    }

    // ── Structure ────────────────────────────────────────────────────

    /// Create an active, non-concurrent, non-scope child at the parent's activity
    pub fn create_child(&mut self, parent: &ExecutionId) -> ProcessResult<ExecutionId> {
        let (instance, activity) = {
            let p = self.get(parent)?;
            if p.is_ended {
                return Err(ProcessError::TreeConsistency(format!(
                    "cannot create a child of ended execution {}",
                    parent
                )));
            }
            (p.process_instance_id.clone(), p.activity.clone())
        };

        let id = ExecutionId::generate();
        let mut child = Execution::new(id.clone(), instance, Some(parent.clone()));
        child.activity = activity;
        self.executions.insert(id.clone(), child);
        self.get_mut(parent)?.children.push(id.clone());
        Ok(id)
    }

    /// Create an active concurrent branch under the parent
    pub fn create_concurrent_child(&mut self, parent: &ExecutionId) -> ProcessResult<ExecutionId> {
        let id = self.create_child(parent)?;
        self.get_mut(&id)?.is_concurrent = true;
        Ok(id)
    }

    /// Create an active scope child under the parent
    pub fn create_scope_child(&mut self, parent: &ExecutionId) -> ProcessResult<ExecutionId> {
        let id = self.create_child(parent)?;
        self.get_mut(&id)?.is_scope = true;
        Ok(id)
    }

    pub fn set_activity(&mut self, id: &ExecutionId, activity: ActivityId) -> ProcessResult<()> {
        self.get_mut(id)?.activity = Some(activity);
        Ok(())
    }

    pub fn set_active(&mut self, id: &ExecutionId, active: bool) -> ProcessResult<()> {
        self.get_mut(id)?.is_active = active;
        Ok(())
    }

    pub fn inactivate(&mut self, id: &ExecutionId) -> ProcessResult<()> {
        self.set_active(id, false)
    }

    /// Mark an execution ended without removing it
    pub fn end(&mut self, id: &ExecutionId) -> ProcessResult<()> {
        let exec = self.get_mut(id)?;
        exec.is_ended = true;
        exec.is_active = false;
        if exec.parent.is_none() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Remove an execution and all its descendants
    ///
    /// Removing an execution that is already gone is a no-op and returns
    /// an empty list. The root cannot be removed.
    pub fn remove(&mut self, id: &ExecutionId) -> ProcessResult<Vec<ExecutionId>> {
        let Some(exec) = self.executions.get(id) else {
            return Ok(Vec::new());
        };
        let parent = exec.parent.clone().ok_or_else(|| {
            ProcessError::TreeConsistency(format!("cannot remove root execution {}", id))
        })?;

        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(mut exec) = self.executions.remove(&current) {
                exec.is_ended = true;
                exec.is_active = false;
                stack.extend(exec.children.drain(..));
                removed.push(current);
            }
        }

        if let Some(p) = self.executions.get_mut(&parent) {
            p.children.retain(|c| c != id);
        }
        Ok(removed)
    }

    /// Inactivate and cascade-delete a branch; idempotent
    pub fn prune(&mut self, id: &ExecutionId) -> ProcessResult<Vec<ExecutionId>> {
        if !self.contains(id) {
            return Ok(Vec::new());
        }
        self.inactivate(id)?;
        self.remove(id)
    }

    /// Inactive executions waiting at an activity under the same concurrent root
    pub fn find_inactive_concurrent_executions(
        &self,
        id: &ExecutionId,
        activity: &ActivityId,
    ) -> ProcessResult<Vec<ExecutionId>> {
        let exec = self.get(id)?;
        if !exec.is_concurrent {
            return Ok(if exec.is_active {
                Vec::new()
            } else {
                vec![id.clone()]
            });
        }

        let parent = self.require_parent(id)?;
        Ok(self
            .get(&parent)?
            .children
            .iter()
            .filter_map(|c| self.executions.get(c))
            .filter(|c| c.is_concurrent && !c.is_active && !c.is_ended && c.is_at(activity))
            .map(|c| c.id.clone())
            .collect())
    }

    /// The execution that owns the concurrent branches an execution belongs to
    pub fn concurrent_root(&self, id: &ExecutionId) -> ProcessResult<ExecutionId> {
        let exec = self.get(id)?;
        if exec.is_concurrent && !exec.is_scope {
            self.require_parent(id)
        } else {
            Ok(id.clone())
        }
    }

    // ── Variables ────────────────────────────────────────────────────

    /// Look up a variable, walking up through parents
    pub fn variable(&self, id: &ExecutionId, name: &str) -> Option<&VariableValue> {
        let mut current = self.executions.get(id);
        while let Some(exec) = current {
            if let Some(value) = exec.variables.get(name) {
                return Some(value);
            }
            current = exec.parent.as_ref().and_then(|p| self.executions.get(p));
        }
        None
    }

    pub fn variable_local(&self, id: &ExecutionId, name: &str) -> Option<&VariableValue> {
        self.executions.get(id).and_then(|e| e.variables.get(name))
    }

    pub fn set_variable_local(
        &mut self,
        id: &ExecutionId,
        name: impl Into<String>,
        value: VariableValue,
    ) -> ProcessResult<()> {
        self.get_mut(id)?.variables.set(name, value);
        Ok(())
    }

    /// Write a variable where it is already defined, or on the root
    ///
    /// Walks up from the execution to the nearest scope holding the name.
    pub fn set_variable(
        &mut self,
        id: &ExecutionId,
        name: impl Into<String>,
        value: VariableValue,
    ) -> ProcessResult<()> {
        let name = name.into();
        let mut target = self.root_id();
        let mut current = Some(self.get(id)?);
        while let Some(exec) = current {
            if exec.variables.contains(&name) {
                target = exec.id.clone();
                break;
            }
            current = exec.parent.as_ref().and_then(|p| self.executions.get(p));
        }
        self.set_variable_local(&target, name, value)
    }

    /// Write a variable on the process instance root
    pub fn set_variable_global(
        &mut self,
        name: impl Into<String>,
        value: VariableValue,
    ) -> ProcessResult<()> {
        let root = self.root_id();
        self.set_variable_local(&root, name, value)
    }

    pub fn remove_variable_local(
        &mut self,
        id: &ExecutionId,
        name: &str,
    ) -> ProcessResult<Option<VariableValue>> {
        Ok(self.get_mut(id)?.variables.remove(name))
    }

    /// Every variable visible from an execution; nearer scopes shadow outer ones
    pub fn visible_variables(&self, id: &ExecutionId) -> VariableMap {
        let mut chain = Vec::new();
        let mut current = self.executions.get(id);
        while let Some(exec) = current {
            chain.push(exec);
            current = exec.parent.as_ref().and_then(|p| self.executions.get(p));
        }

        let mut merged = VariableMap::new();
        for exec in chain.into_iter().rev() {
            for (name, value) in exec.variables.iter() {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }

    /// Integer loop variable found walking up the tree, zero when absent
    pub fn loop_variable(&self, id: &ExecutionId, name: &str) -> i64 {
        self.variable(id, name).and_then(as_i64).unwrap_or(0)
    }

    // ── Overlays ─────────────────────────────────────────────────────

    pub fn overlay(&self, activity: &ActivityId) -> Option<&ActivityOverlay> {
        self.overlays.get(activity)
    }

    pub fn set_overlay(&mut self, activity: ActivityId, overlay: ActivityOverlay) {
        self.overlays.insert(activity, overlay);
    }

    // ── Consistency ──────────────────────────────────────────────────

    /// Check the tree invariants: one root, matching parent and child
    /// links, no cycles, every execution reachable from the root
    pub fn check_consistency(&self) -> ProcessResult<()> {
        let roots: Vec<_> = self.executions.values().filter(|e| e.is_root()).collect();
        if roots.len() != 1 || roots[0].id != self.root_id() {
            return Err(ProcessError::TreeConsistency(format!(
                "expected exactly one root, found {}",
                roots.len()
            )));
        }

        for exec in self.executions.values() {
            if let Some(parent) = &exec.parent {
                let p = self.get(parent)?;
                if !p.children.contains(&exec.id) {
                    return Err(ProcessError::TreeConsistency(format!(
                        "{} is not listed as a child of its parent {}",
                        exec.id, parent
                    )));
                }
            }
            for child in &exec.children {
                if self.get(child)?.parent.as_ref() != Some(&exec.id) {
                    return Err(ProcessError::TreeConsistency(format!(
                        "child {} does not point back to {}",
                        child, exec.id
                    )));
                }
            }
        }

        let mut visited = HashSet::new();
        let mut stack = vec![self.root_id()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                return Err(ProcessError::TreeConsistency(format!(
                    "cycle through {}",
                    current
                )));
            }
            stack.extend(self.get(&current)?.children.iter().cloned());
        }
        if visited.len() != self.executions.len() {
            return Err(ProcessError::TreeConsistency(
                "executions unreachable from the root".into(),
            ));
        }
        Ok(())
    }
}
