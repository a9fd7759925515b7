//! Process engine: the command surface over the core
//!
//! Every public operation is one command. A command loads the trees it
//! touches into a [`CommandContext`], runs its steps until the agenda is
//! empty and commits the working copies only when nothing failed.
//!
//! The engine never waits on anything. Wait states simply stop the
//! agenda, and a later command (a signal or a task completion) picks the
//! execution up again.

use crate::behavior;
use crate::collaborators::Collaborators;
use crate::context::{CommandContext, ExecutionRef};
use crate::executor::run_agenda;
use crate::repository::{InMemoryRepository, ProcessRepository};
use crate::routing::{CommandRouting, RoutingOverride};
use process_types::{
    ActivityId, EngineConfig, ExecutionId, ExecutionTree, ProcessDefinition, ProcessDefinitionId,
    ProcessError, ProcessInstanceId, ProcessResult, VariableMap, VariableValue,
};
use std::sync::Arc;

/// Signal sent when a task is completed through [`ProcessEngine::complete_task`]
pub const COMPLETE_SIGNAL: &str = "complete";

/// Entry point for deploying definitions and driving process instances
#[derive(Clone)]
pub struct ProcessEngine {
    config: EngineConfig,
    collaborators: Collaborators,
    repository: Arc<dyn ProcessRepository>,
}

impl ProcessEngine {
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        repository: Arc<dyn ProcessRepository>,
    ) -> ProcessResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            repository,
        })
    }

    /// Default configuration, default collaborators, in-memory storage
    pub fn in_memory() -> Self {
        Self {
            config: EngineConfig::default(),
            collaborators: Collaborators::default(),
            repository: Arc::new(InMemoryRepository::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn repository(&self) -> &Arc<dyn ProcessRepository> {
        &self.repository
    }

    // ── Definitions ──────────────────────────────────────────────────

    pub fn deploy(&self, definition: ProcessDefinition) -> ProcessResult<ProcessDefinitionId> {
        self.repository.deploy(definition)
    }

    // ── Instance lifecycle ───────────────────────────────────────────

    /// Start the latest version of a definition
    pub fn start_process_instance_by_key(
        &self,
        key: &str,
        variables: VariableMap,
        business_key: Option<String>,
    ) -> ProcessResult<ProcessInstanceId> {
        self.start_process_instance_with_routing(
            key,
            variables,
            business_key,
            &CommandRouting::none(),
        )
    }

    /// Start an instance, choosing the first task when the start event
    /// leads to several user tasks
    pub fn start_process_instance_with_routing(
        &self,
        key: &str,
        variables: VariableMap,
        business_key: Option<String>,
        routing: &CommandRouting,
    ) -> ProcessResult<ProcessInstanceId> {
        self.run_command("start", routing, |ctx| {
            let definition = ctx.latest_definition(key)?;
            if definition.suspended {
                return Err(ProcessError::DefinitionSuspended(definition.id.clone()));
            }
            let initial = definition.initial.clone().ok_or_else(|| {
                ProcessError::Validation(format!(
                    "process definition '{}' has no initial activity",
                    definition.key
                ))
            })?;

            let mut tree = ExecutionTree::new(definition.id.clone(), Some(initial));
            if let Some(business_key) = business_key {
                tree = tree.with_business_key(business_key);
            }
            for (name, value) in variables {
                tree.set_variable_global(name, value)?;
            }
            let instance = tree.process_instance_id.clone();
            behavior::start_instance(ctx, tree)?;
            Ok(instance)
        })
    }

    /// Deliver a signal to a waiting execution
    pub fn signal(
        &self,
        instance: &ProcessInstanceId,
        execution: &ExecutionId,
        signal_name: &str,
        signal_data: Option<VariableValue>,
    ) -> ProcessResult<()> {
        self.run_command("signal", &CommandRouting::none(), |ctx| {
            let at = ExecutionRef::new(instance.clone(), execution.clone());
            ensure_waiting(ctx, &at)?;
            behavior::signal(ctx, &at, signal_name, signal_data)
        })
    }

    /// Complete the task an execution waits in
    ///
    /// Variables are written locally on the completing execution, so each
    /// parallel branch keeps its own values until the join. The routing
    /// decides where a user task goes next when it names a destination.
    pub fn complete_task(
        &self,
        instance: &ProcessInstanceId,
        execution: &ExecutionId,
        variables: VariableMap,
        routing: &CommandRouting,
    ) -> ProcessResult<()> {
        self.run_command("complete_task", routing, |ctx| {
            let at = ExecutionRef::new(instance.clone(), execution.clone());
            ensure_waiting(ctx, &at)?;
            let tree = ctx.tree_mut(instance)?;
            for (name, value) in variables {
                tree.set_variable_local(execution, name, value)?;
            }
            behavior::signal(ctx, &at, COMPLETE_SIGNAL, None)
        })
    }

    /// The persisted tree of an instance
    pub fn instance(&self, instance: &ProcessInstanceId) -> ProcessResult<ExecutionTree> {
        self.repository.load(instance)
    }

    /// Executions currently waiting at an activity, ready for `complete_task`
    pub fn waiting_executions(
        &self,
        instance: &ProcessInstanceId,
        activity: &ActivityId,
    ) -> ProcessResult<Vec<ExecutionId>> {
        let tree = self.repository.load(instance)?;
        Ok(tree
            .active_leaves()
            .into_iter()
            .filter(|e| e.is_at(activity))
            .map(|e| e.id.clone())
            .collect())
    }

    pub fn delete_process_instance(&self, instance: &ProcessInstanceId) -> ProcessResult<()> {
        self.repository.delete(instance)?;
        tracing::info!(instance_id = %instance, "Process instance deleted");
        Ok(())
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn run_command<T>(
        &self,
        name: &'static str,
        routing: &dyn RoutingOverride,
        command: impl FnOnce(&mut CommandContext<'_>) -> ProcessResult<T>,
    ) -> ProcessResult<T> {
        let mut ctx = CommandContext::new(
            &self.config,
            &self.collaborators,
            self.repository.as_ref(),
            routing,
        );
        let result = command(&mut ctx).and_then(|value| {
            run_agenda(&mut ctx)?;
            Ok(value)
        });

        match result {
            Ok(value) => {
                let trees = ctx.into_trees();
                tracing::debug!(command = name, trees = trees.len(), "Committing command");
                self.repository.commit(trees)?;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(command = name, error = %e, "Command failed, changes discarded");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("config", &self.config)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

/// The execution exists in a running instance and has not ended
fn ensure_waiting(ctx: &mut CommandContext<'_>, at: &ExecutionRef) -> ProcessResult<()> {
    let tree = ctx.tree(&at.instance)?;
    if tree.is_ended() {
        return Err(ProcessError::InstanceEnded(at.instance.clone()));
    }
    if tree.get(&at.execution)?.is_ended {
        return Err(ProcessError::TreeConsistency(format!(
            "execution {} has already ended",
            at
        )));
    }
    Ok(())
}
