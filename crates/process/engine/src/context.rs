//! Command context: the unit of work one command runs against
//!
//! Trees are loaded from the repository as working copies the first time
//! a command touches them. Nothing is written back until the command has
//! finished without error, so a failed command leaves storage untouched.

use crate::collaborators::Collaborators;
use crate::events::{ProcessEvent, ProcessEventKind};
use crate::history::{HistoryKind, HistoryRecord};
use crate::repository::ProcessRepository;
use crate::routing::RoutingOverride;
use process_types::{
    ActivityBehavior, ActivityId, EngineConfig, ExecutionId, ExecutionTree, ProcessDefinition,
    ProcessDefinitionId, ProcessError, ProcessInstanceId, ProcessResult,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Address of one execution in one process instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionRef {
    pub instance: ProcessInstanceId,
    pub execution: ExecutionId,
}

impl ExecutionRef {
    pub fn new(instance: ProcessInstanceId, execution: ExecutionId) -> Self {
        Self {
            instance,
            execution,
        }
    }

    /// The root execution of an instance
    pub fn root(instance: &ProcessInstanceId) -> Self {
        Self::new(instance.clone(), instance.root_execution())
    }

    /// Another execution of the same instance
    pub fn sibling(&self, execution: ExecutionId) -> Self {
        Self::new(self.instance.clone(), execution)
    }
}

impl std::fmt::Display for ExecutionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instance.short(), self.execution.short())
    }
}

/// An execution waiting to run the activity it was moved to
#[derive(Clone, Debug)]
struct Scheduled {
    at: ExecutionRef,
    activity: Option<ActivityId>,
}

/// State of a single command
pub struct CommandContext<'a> {
    config: &'a EngineConfig,
    collaborators: &'a Collaborators,
    repository: &'a dyn ProcessRepository,
    routing: &'a dyn RoutingOverride,
    trees: BTreeMap<ProcessInstanceId, ExecutionTree>,
    definitions: HashMap<ProcessDefinitionId, Arc<ProcessDefinition>>,
    agenda: VecDeque<Scheduled>,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        config: &'a EngineConfig,
        collaborators: &'a Collaborators,
        repository: &'a dyn ProcessRepository,
        routing: &'a dyn RoutingOverride,
    ) -> Self {
        Self {
            config,
            collaborators,
            repository,
            routing,
            trees: BTreeMap::new(),
            definitions: HashMap::new(),
            agenda: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    pub fn collaborators(&self) -> &'a Collaborators {
        self.collaborators
    }

    pub fn routing(&self) -> &'a dyn RoutingOverride {
        self.routing
    }

    // ── Trees ────────────────────────────────────────────────────────

    pub fn tree(&mut self, instance: &ProcessInstanceId) -> ProcessResult<&ExecutionTree> {
        self.ensure_loaded(instance)?;
        self.trees
            .get(instance)
            .ok_or_else(|| ProcessError::InstanceNotFound(instance.clone()))
    }

    pub fn tree_mut(&mut self, instance: &ProcessInstanceId) -> ProcessResult<&mut ExecutionTree> {
        self.ensure_loaded(instance)?;
        self.trees
            .get_mut(instance)
            .ok_or_else(|| ProcessError::InstanceNotFound(instance.clone()))
    }

    fn ensure_loaded(&mut self, instance: &ProcessInstanceId) -> ProcessResult<()> {
        if !self.trees.contains_key(instance) {
            let tree = self.repository.load(instance)?;
            self.trees.insert(instance.clone(), tree);
        }
        Ok(())
    }

    /// Take ownership of a tree created during this command
    pub fn insert_tree(&mut self, tree: ExecutionTree) {
        self.trees.insert(tree.process_instance_id.clone(), tree);
    }

    /// Every tree touched by the command
    pub fn into_trees(self) -> Vec<ExecutionTree> {
        self.trees.into_values().collect()
    }

    // ── Definitions ──────────────────────────────────────────────────

    pub fn definition(
        &mut self,
        id: &ProcessDefinitionId,
    ) -> ProcessResult<Arc<ProcessDefinition>> {
        if let Some(def) = self.definitions.get(id) {
            return Ok(Arc::clone(def));
        }
        let def = self.repository.definition(id)?;
        self.definitions.insert(id.clone(), Arc::clone(&def));
        Ok(def)
    }

    pub fn latest_definition(&mut self, key: &str) -> ProcessResult<Arc<ProcessDefinition>> {
        let def = self.repository.latest_definition_by_key(key)?;
        self.definitions.insert(def.id.clone(), Arc::clone(&def));
        Ok(def)
    }

    /// The definition an instance runs
    pub fn definition_for(
        &mut self,
        instance: &ProcessInstanceId,
    ) -> ProcessResult<Arc<ProcessDefinition>> {
        let id = self.tree(instance)?.process_definition_id.clone();
        self.definition(&id)
    }

    /// The activity an execution sits at
    pub fn current_activity(&mut self, at: &ExecutionRef) -> ProcessResult<ActivityId> {
        self.tree(&at.instance)?
            .get(&at.execution)?
            .activity
            .clone()
            .ok_or_else(|| {
                ProcessError::TreeConsistency(format!("execution {} has no current activity", at))
            })
    }

    /// The behavior in effect for an activity of this instance
    ///
    /// A per-instance overlay wins over the behavior bound in the graph.
    pub fn effective_behavior(
        &mut self,
        instance: &ProcessInstanceId,
        definition: &ProcessDefinition,
        activity: &ActivityId,
    ) -> ProcessResult<ActivityBehavior> {
        let overlay = self
            .tree(instance)?
            .overlay(activity)
            .and_then(|o| o.behavior.clone());
        match overlay {
            Some(behavior) => Ok(behavior),
            None => Ok(definition.require_activity(activity)?.behavior.clone()),
        }
    }

    /// Deal type in effect for an activity of this instance
    pub fn deal_type(
        &mut self,
        instance: &ProcessInstanceId,
        definition: &ProcessDefinition,
        activity: &ActivityId,
    ) -> Option<String> {
        let overlay = self
            .tree(instance)
            .ok()
            .and_then(|t| t.overlay(activity))
            .and_then(|o| o.deal_type.clone());
        overlay.or_else(|| {
            definition
                .activity(activity)
                .and_then(|a| a.properties.deal_type.clone())
        })
    }

    // ── Agenda ───────────────────────────────────────────────────────

    /// Queue an execution to run the activity it currently sits at
    pub fn schedule(&mut self, at: ExecutionRef) -> ProcessResult<()> {
        let activity = self.tree(&at.instance)?.get(&at.execution)?.activity.clone();
        tracing::trace!(execution = %at, activity = ?activity, "Execution scheduled");
        self.agenda.push_back(Scheduled { at, activity });
        Ok(())
    }

    /// Next queued execution that still exists, is live and has not moved
    pub fn next_runnable(&mut self) -> ProcessResult<Option<ExecutionRef>> {
        while let Some(entry) = self.agenda.pop_front() {
            let tree = self.tree(&entry.at.instance)?;
            let runnable = tree
                .find(&entry.at.execution)
                .is_some_and(|e| e.is_live() && e.activity == entry.activity);
            if runnable {
                return Ok(Some(entry.at));
            }
            tracing::trace!(execution = %entry.at, "Skipping stale agenda entry");
        }
        Ok(None)
    }

    // ── History and events ───────────────────────────────────────────

    /// Record a history notification; recorder failures are logged and dropped
    pub fn record(&mut self, at: &ExecutionRef, activity: Option<ActivityId>, kind: HistoryKind) {
        if !self.config.history_enabled {
            return;
        }
        let deal_type = match (&activity, self.definition_for(&at.instance)) {
            (Some(activity), Ok(def)) => self.deal_type(&at.instance, &def, activity),
            _ => None,
        };
        let record = HistoryRecord::new(
            at.instance.clone(),
            at.execution.clone(),
            activity,
            kind,
        )
        .with_deal_type(deal_type);

        if let Err(e) = self.collaborators.history.record(record) {
            tracing::warn!(execution = %at, error = %e, "History recorder failed");
        }
    }

    /// Publish a lifecycle event; dispatcher failures are logged and dropped
    pub fn dispatch(&mut self, at: &ExecutionRef, kind: ProcessEventKind) {
        let collaborators = self.collaborators;
        if !self.config.events_enabled || !collaborators.events.is_enabled() {
            return;
        }
        let Ok(tree) = self.tree(&at.instance) else {
            return;
        };
        let event = ProcessEvent {
            process_instance_id: at.instance.clone(),
            process_definition_id: tree.process_definition_id.clone(),
            execution_id: at.execution.clone(),
            kind,
        };
        if let Err(e) = collaborators.events.dispatch(event) {
            tracing::warn!(execution = %at, error = %e, "Event dispatcher failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::routing::CommandRouting;
    use process_types::{
        Activity, ActivityOverlay, MultiInstanceConfig, MultiInstanceMode, Transition,
    };

    fn make_repository() -> (InMemoryRepository, ProcessInstanceId) {
        let repo = InMemoryRepository::new();
        let mut def = ProcessDefinition::new("simple", "Simple");
        def.add_activity(Activity::start_event("start")).unwrap();
        def.add_activity(
            Activity::user_task("sign")
                .with_deal_type("joint")
                .with_multi_instance(MultiInstanceConfig::parallel().with_loop_cardinality("2")),
        )
        .unwrap();
        def.add_transition(Transition::new("t1", "start", "sign"))
            .unwrap();
        let def_id = repo.deploy(def).unwrap();
        let tree = ExecutionTree::new(def_id, Some(ActivityId::new("start")));
        let instance = tree.process_instance_id.clone();
        repo.save(tree).unwrap();
        (repo, instance)
    }

    #[test]
    fn test_trees_load_lazily_as_copies() {
        let (repo, instance) = make_repository();
        let config = EngineConfig::default();
        let collaborators = Collaborators::default();
        let routing = CommandRouting::none();
        let mut ctx = CommandContext::new(&config, &collaborators, &repo, &routing);

        let root = ctx.tree(&instance).unwrap().root_id();
        ctx.tree_mut(&instance)
            .unwrap()
            .set_variable_local(&root, "x", serde_json::json!(1))
            .unwrap();

        assert!(repo.load(&instance).unwrap().variable_local(&root, "x").is_none());
        let trees = ctx.into_trees();
        assert_eq!(trees.len(), 1);
        assert!(trees[0].variable_local(&root, "x").is_some());
    }

    #[test]
    fn test_overlay_wins_over_graph() {
        let (repo, instance) = make_repository();
        let config = EngineConfig::default();
        let collaborators = Collaborators::default();
        let routing = CommandRouting::none();
        let mut ctx = CommandContext::new(&config, &collaborators, &repo, &routing);
        let def = ctx.definition_for(&instance).unwrap();
        let sign = ActivityId::new("sign");

        let behavior = ctx.effective_behavior(&instance, &def, &sign).unwrap();
        assert_eq!(behavior.kind_name(), "parallelMultiInstance");
        assert_eq!(ctx.deal_type(&instance, &def, &sign).as_deref(), Some("joint"));

        let sequential = behavior
            .multi_instance()
            .unwrap()
            .with_mode(MultiInstanceMode::Sequential);
        ctx.tree_mut(&instance).unwrap().set_overlay(
            sign.clone(),
            ActivityOverlay {
                behavior: Some(ActivityBehavior::MultiInstance(sequential)),
                deal_type: Some("ordered".into()),
            },
        );
        let behavior = ctx.effective_behavior(&instance, &def, &sign).unwrap();
        assert_eq!(behavior.kind_name(), "sequentialMultiInstance");
        assert_eq!(ctx.deal_type(&instance, &def, &sign).as_deref(), Some("ordered"));
    }

    #[test]
    fn test_agenda_skips_stale_entries() {
        let (repo, instance) = make_repository();
        let config = EngineConfig::default();
        let collaborators = Collaborators::default();
        let routing = CommandRouting::none();
        let mut ctx = CommandContext::new(&config, &collaborators, &repo, &routing);
        let root = ExecutionRef::root(&instance);

        ctx.schedule(root.clone()).unwrap();
        ctx.tree_mut(&instance)
            .unwrap()
            .set_activity(&root.execution, ActivityId::new("sign"))
            .unwrap();
        assert!(ctx.next_runnable().unwrap().is_none());

        ctx.schedule(root.clone()).unwrap();
        assert_eq!(ctx.next_runnable().unwrap(), Some(root));
    }

    #[test]
    fn test_unknown_instance() {
        let (repo, _) = make_repository();
        let config = EngineConfig::default();
        let collaborators = Collaborators::default();
        let routing = CommandRouting::none();
        let mut ctx = CommandContext::new(&config, &collaborators, &repo, &routing);
        assert!(matches!(
            ctx.tree(&ProcessInstanceId::new("missing")),
            Err(ProcessError::InstanceNotFound(_))
        ));
    }
}
