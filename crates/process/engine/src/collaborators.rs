//! The explicit set of collaborators handed to every command
//!
//! Nothing is looked up from a global container. Whoever builds the
//! engine decides which evaluator, policies and sinks it runs with.

use crate::events::{EventDispatcher, RecordingEventDispatcher};
use crate::expression::{ExpressionEvaluator, SimpleEvaluator};
use crate::history::{HistoryRecorder, InMemoryHistory};
use crate::override_hook::BehaviorOverrideHook;
use crate::policy::{AutoDecisionPolicy, CompletionConditionPolicy, ExpressionCompletionCondition};
use std::sync::Arc;

/// Collaborators consulted by the core
#[derive(Clone)]
pub struct Collaborators {
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub completion: Arc<dyn CompletionConditionPolicy>,
    pub auto_decision: Option<Arc<dyn AutoDecisionPolicy>>,
    pub behavior_override: Option<Arc<dyn BehaviorOverrideHook>>,
    pub history: Arc<dyn HistoryRecorder>,
    pub events: Arc<dyn EventDispatcher>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            evaluator: Arc::new(SimpleEvaluator::new()),
            completion: Arc::new(ExpressionCompletionCondition),
            auto_decision: None,
            behavior_override: None,
            history: Arc::new(InMemoryHistory::new()),
            events: Arc::new(RecordingEventDispatcher::new()),
        }
    }
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_completion_condition(mut self, policy: Arc<dyn CompletionConditionPolicy>) -> Self {
        self.completion = policy;
        self
    }

    pub fn with_auto_decision(mut self, policy: Arc<dyn AutoDecisionPolicy>) -> Self {
        self.auto_decision = Some(policy);
        self
    }

    pub fn with_behavior_override(mut self, hook: Arc<dyn BehaviorOverrideHook>) -> Self {
        self.behavior_override = Some(hook);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventDispatcher>) -> Self {
        self.events = events;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("auto_decision", &self.auto_decision.is_some())
            .field("behavior_override", &self.behavior_override.is_some())
            .finish_non_exhaustive()
    }
}
