//! Shared fixtures for the engine's unit tests

use crate::collaborators::Collaborators;
use crate::context::CommandContext;
use crate::events::RecordingEventDispatcher;
use crate::history::InMemoryHistory;
use crate::repository::{InMemoryRepository, ProcessRepository};
use crate::routing::CommandRouting;
use process_types::{
    ActivityId, EngineConfig, ExecutionTree, ProcessDefinition, ProcessDefinitionId,
    ProcessInstanceId, VariableValue,
};
use std::sync::Arc;

/// Repository, configuration and recording collaborators for one test
pub(crate) struct Harness {
    pub repository: InMemoryRepository,
    pub config: EngineConfig,
    pub collaborators: Collaborators,
    pub routing: CommandRouting,
    pub history: Arc<InMemoryHistory>,
    pub events: Arc<RecordingEventDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        let history = Arc::new(InMemoryHistory::new());
        let events = Arc::new(RecordingEventDispatcher::new());
        let collaborators = Collaborators::new()
            .with_history(history.clone())
            .with_events(events.clone());
        Self {
            repository: InMemoryRepository::new(),
            config: EngineConfig::default(),
            collaborators,
            routing: CommandRouting::none(),
            history,
            events,
        }
    }

    pub fn with_routing(mut self, routing: CommandRouting) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_collaborators(mut self, f: impl FnOnce(Collaborators) -> Collaborators) -> Self {
        self.collaborators = f(self.collaborators);
        self
    }

    pub fn deploy(&self, definition: ProcessDefinition) -> ProcessDefinitionId {
        self.repository.deploy(definition).unwrap()
    }

    /// Store an instance whose root sits at `activity` with root variables
    pub fn instance_at(
        &self,
        definition: &ProcessDefinitionId,
        activity: &str,
        variables: &[(&str, VariableValue)],
    ) -> ProcessInstanceId {
        let mut tree = ExecutionTree::new(definition.clone(), Some(ActivityId::new(activity)));
        for (name, value) in variables {
            tree.set_variable_global(*name, value.clone()).unwrap();
        }
        let instance = tree.process_instance_id.clone();
        self.repository.save(tree).unwrap();
        instance
    }

    pub fn context(&self) -> CommandContext<'_> {
        CommandContext::new(
            &self.config,
            &self.collaborators,
            &self.repository,
            &self.routing,
        )
    }
}
