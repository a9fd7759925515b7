//! Process definitions: the immutable activity graph
//!
//! A ProcessDefinition is a directed graph where:
//! - Activities are units of work with a bound behavior
//! - Transitions are guarded sequence flows between activities
//!
//! Definitions are shared by every instance started from them and are
//! never mutated at runtime. Per-instance behavior changes are recorded
//! as overlays on the execution tree instead.

use crate::{
    ActivityBehavior, ActivityId, MultiInstanceConfig, ProcessDefinitionId, ProcessError,
    ProcessResult, Transition, TransitionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ── Process Definition ───────────────────────────────────────────────

/// A deployable process graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: ProcessDefinitionId,
    /// Key shared by all versions of this process
    pub key: String,
    pub name: String,
    pub version: u32,
    /// Workflow category, e.g. the bulk-share category that disables auto-decisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Suspended definitions cannot be started or called
    #[serde(default)]
    pub suspended: bool,
    /// The activity a new instance starts at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<ActivityId>,
    pub activities: Vec<Activity>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ProcessDefinition {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ProcessDefinitionId::generate(),
            key: key.into(),
            name: name.into(),
            version: 1,
            category: None,
            suspended: false,
            initial: None,
            activities: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_initial(mut self, activity: impl Into<String>) -> Self {
        self.initial = Some(ActivityId::new(activity));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Add an activity to the graph
    ///
    /// The first top-level start event becomes the initial activity unless
    /// one was set explicitly.
    pub fn add_activity(&mut self, activity: Activity) -> ProcessResult<()> {
        if self.activities.iter().any(|a| a.id == activity.id) {
            return Err(ProcessError::Validation(format!(
                "Duplicate activity id: {}",
                activity.id
            )));
        }
        if self.initial.is_none()
            && activity.parent.is_none()
            && activity.activity_type == ActivityType::StartEvent
        {
            self.initial = Some(activity.id.clone());
        }
        self.activities.push(activity);
        Ok(())
    }

    /// Add a transition, appending it to its source's outgoing list
    pub fn add_transition(&mut self, transition: Transition) -> ProcessResult<()> {
        if self.transitions.iter().any(|t| t.id == transition.id) {
            return Err(ProcessError::Validation(format!(
                "Duplicate transition id: {}",
                transition.id
            )));
        }
        if self.activity(&transition.destination).is_none() {
            return Err(ProcessError::ActivityNotFound(transition.destination));
        }
        let source = self
            .activities
            .iter_mut()
            .find(|a| a.id == transition.source)
            .ok_or_else(|| ProcessError::ActivityNotFound(transition.source.clone()))?;
        source.outgoing.push(transition.id.clone());
        self.transitions.push(transition);
        Ok(())
    }

    pub fn activity(&self, id: &ActivityId) -> Option<&Activity> {
        self.activities.iter().find(|a| &a.id == id)
    }

    /// Look up an activity, failing with a configuration fault when absent
    pub fn require_activity(&self, id: &ActivityId) -> ProcessResult<&Activity> {
        self.activity(id)
            .ok_or_else(|| ProcessError::ActivityNotFound(id.clone()))
    }

    pub fn transition(&self, id: &TransitionId) -> Option<&Transition> {
        self.transitions.iter().find(|t| &t.id == id)
    }

    /// Outgoing transitions of an activity in declaration order
    pub fn outgoing_transitions(&self, activity: &ActivityId) -> Vec<&Transition> {
        self.activity(activity)
            .map(|a| {
                a.outgoing
                    .iter()
                    .filter_map(|id| self.transition(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find one outgoing transition of an activity by id
    pub fn find_outgoing(&self, activity: &ActivityId, id: &TransitionId) -> Option<&Transition> {
        self.transition(id).filter(|t| &t.source == activity)
    }

    pub fn incoming_transitions(&self, activity: &ActivityId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| &t.destination == activity)
            .collect()
    }

    pub fn initial_activity(&self) -> Option<&Activity> {
        self.initial.as_ref().and_then(|id| self.activity(id))
    }

    /// Whether the activity is a user task directly after the initial start event
    pub fn is_start_user_task(&self, activity: &ActivityId) -> bool {
        let Some(initial) = &self.initial else {
            return false;
        };
        let is_user_task = self
            .activity(activity)
            .is_some_and(|a| a.activity_type == ActivityType::UserTask);
        is_user_task
            && self
                .outgoing_transitions(initial)
                .iter()
                .any(|t| &t.destination == activity)
    }

    /// Validate the definition for structural correctness
    pub fn validate(&self) -> ProcessResult<()> {
        if self.activities.is_empty() {
            return Err(ProcessError::Validation(
                "Process must have at least one activity".into(),
            ));
        }

        let initial = self
            .initial
            .as_ref()
            .ok_or_else(|| ProcessError::Validation("No initial activity defined".into()))?;
        self.require_activity(initial)?;

        let mut seen = HashSet::new();
        for transition in &self.transitions {
            if !seen.insert(&transition.id) {
                return Err(ProcessError::Validation(format!(
                    "Duplicate transition id: {}",
                    transition.id
                )));
            }
            self.require_activity(&transition.source)?;
            self.require_activity(&transition.destination)?;
        }

        for activity in &self.activities {
            if let Some(flow) = &activity.properties.default_flow {
                if self.find_outgoing(&activity.id, flow).is_none() {
                    return Err(ProcessError::DefaultFlowNotFound {
                        activity: activity.id.clone(),
                        flow: flow.clone(),
                    });
                }
            }
            if let Some(parent) = &activity.parent {
                self.require_activity(parent)?;
            }
            match &activity.behavior {
                ActivityBehavior::MultiInstance(config) => {
                    if !config.has_cardinality_source() {
                        return Err(ProcessError::CardinalityResolution {
                            activity: activity.id.clone(),
                            reason: "no loop cardinality, collection expression or collection variable"
                                .into(),
                        });
                    }
                    self.validate_sub_process(activity, &config.inner)?;
                }
                behavior => self.validate_sub_process(activity, behavior)?,
            }
        }

        let reachable = self.reachable_from(initial);
        for activity in &self.activities {
            if !activity.properties.is_for_compensation && !reachable.contains(&activity.id) {
                return Err(ProcessError::Validation(format!(
                    "Activity '{}' is unreachable from '{}'",
                    activity.id, initial
                )));
            }
        }

        Ok(())
    }

    fn validate_sub_process(
        &self,
        activity: &Activity,
        behavior: &ActivityBehavior,
    ) -> ProcessResult<()> {
        if let ActivityBehavior::SubProcess { initial } = behavior {
            let nested = self.require_activity(initial)?;
            if nested.parent.as_ref() != Some(&activity.id) {
                return Err(ProcessError::Validation(format!(
                    "Initial activity '{}' is not nested in sub-process '{}'",
                    initial, activity.id
                )));
            }
        }
        Ok(())
    }

    /// All activities reachable from a given one, following transitions
    /// and sub-process entry points
    fn reachable_from(&self, start: &ActivityId) -> HashSet<ActivityId> {
        let mut visited = HashSet::new();
        let mut queue = vec![start.clone()];

        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for transition in self.outgoing_transitions(&current) {
                if !visited.contains(&transition.destination) {
                    queue.push(transition.destination.clone());
                }
            }
            if let Some(activity) = self.activity(&current) {
                let behavior = match &activity.behavior {
                    ActivityBehavior::MultiInstance(config) => config.inner.as_ref(),
                    behavior => behavior,
                };
                if let ActivityBehavior::SubProcess { initial } = behavior {
                    queue.push(initial.clone());
                }
            }
        }

        visited
    }

    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }
}

// ── Activity ─────────────────────────────────────────────────────────

/// A node of the process graph with its bound behavior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub activity_type: ActivityType,
    /// Outgoing transition ids in declaration order
    #[serde(default)]
    pub outgoing: Vec<TransitionId>,
    /// Enclosing sub-process, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ActivityId>,
    #[serde(default)]
    pub properties: ActivityProperties,
    pub behavior: ActivityBehavior,
}

impl Activity {
    pub fn new(
        id: impl Into<String>,
        activity_type: ActivityType,
        behavior: ActivityBehavior,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: ActivityId::new(id),
            activity_type,
            outgoing: Vec::new(),
            parent: None,
            properties: ActivityProperties::default(),
            behavior,
        }
    }

    pub fn start_event(id: impl Into<String>) -> Self {
        Self::new(id, ActivityType::StartEvent, ActivityBehavior::Passthrough)
    }

    pub fn end_event(id: impl Into<String>) -> Self {
        Self::new(id, ActivityType::EndEvent, ActivityBehavior::NoneEnd)
    }

    pub fn user_task(id: impl Into<String>) -> Self {
        Self::new(id, ActivityType::UserTask, ActivityBehavior::WaitState)
    }

    pub fn service_task(id: impl Into<String>) -> Self {
        Self::new(id, ActivityType::ServiceTask, ActivityBehavior::Passthrough)
    }

    pub fn intermediate_catch(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityType::IntermediateCatchEvent,
            ActivityBehavior::IntermediateCatch,
        )
    }

    pub fn exclusive_gateway(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityType::ExclusiveGateway,
            ActivityBehavior::ExclusiveGateway,
        )
    }

    pub fn parallel_gateway(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityType::ParallelGateway,
            ActivityBehavior::ParallelGateway,
        )
    }

    pub fn inclusive_gateway(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityType::InclusiveGateway,
            ActivityBehavior::InclusiveGateway,
        )
    }

    pub fn sub_process(id: impl Into<String>, initial: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityType::SubProcess,
            ActivityBehavior::SubProcess {
                initial: ActivityId::new(initial),
            },
        )
    }

    pub fn call_activity(id: impl Into<String>, config: crate::CallActivityConfig) -> Self {
        Self::new(
            id,
            ActivityType::CallActivity,
            ActivityBehavior::CallActivity(config),
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_flow(mut self, transition: impl Into<String>) -> Self {
        self.properties.default_flow = Some(TransitionId::new(transition));
        self
    }

    pub fn for_compensation(mut self) -> Self {
        self.properties.is_for_compensation = true;
        self
    }

    pub fn with_deal_type(mut self, deal_type: impl Into<String>) -> Self {
        self.properties.deal_type = Some(deal_type.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.extensions.insert(key.into(), value);
        self
    }

    /// Nest this activity inside a sub-process
    pub fn within(mut self, sub_process: impl Into<String>) -> Self {
        self.parent = Some(ActivityId::new(sub_process));
        self
    }

    /// Wrap the current behavior in a multi-instance loop
    pub fn with_multi_instance(mut self, config: MultiInstanceConfig) -> Self {
        let inner = std::mem::replace(&mut self.behavior, ActivityBehavior::Passthrough);
        self.behavior = ActivityBehavior::MultiInstance(config.with_inner(inner));
        self
    }

    pub fn is_multi_instance(&self) -> bool {
        self.behavior.is_multi_instance()
    }
}

/// Recognized activity properties
///
/// Everything the core interprets has its own field. `extensions` carries
/// values only meaningful to external collaborators.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityProperties {
    /// Transition taken when no other transition is eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_flow: Option<TransitionId>,
    /// Compensation handlers signal their parent instead of continuing
    #[serde(default)]
    pub is_for_compensation: bool,
    /// Audit handling mode consumed by history and multi-instance business keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

// ── Activity Type ────────────────────────────────────────────────────

/// The BPMN element type of an activity
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    StartEvent,
    EndEvent,
    UserTask,
    ServiceTask,
    ScriptTask,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    IntermediateCatchEvent,
    SubProcess,
    CallActivity,
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::StartEvent => "startEvent",
            ActivityType::EndEvent => "endEvent",
            ActivityType::UserTask => "userTask",
            ActivityType::ServiceTask => "serviceTask",
            ActivityType::ScriptTask => "scriptTask",
            ActivityType::ExclusiveGateway => "exclusiveGateway",
            ActivityType::ParallelGateway => "parallelGateway",
            ActivityType::InclusiveGateway => "inclusiveGateway",
            ActivityType::IntermediateCatchEvent => "intermediateCatchEvent",
            ActivityType::SubProcess => "subProcess",
            ActivityType::CallActivity => "callActivity",
            ActivityType::Other(name) => name,
        }
    }

    /// Start and end events are never subject to behavior overrides
    pub fn is_start_or_end_event(&self) -> bool {
        matches!(self, ActivityType::StartEvent | ActivityType::EndEvent)
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
