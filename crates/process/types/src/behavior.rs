//! Activity behavior configuration
//!
//! Behaviors are a closed set of variants. The runtime dispatches on the
//! variant; this crate only carries the configuration each variant needs.

use crate::ActivityId;
use serde::{Deserialize, Serialize};

/// The unit of work bound to an activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityBehavior {
    /// Completes immediately and follows its outgoing transitions
    Passthrough,
    /// Suspends the command until the execution is signaled
    WaitState,
    /// Suspends like a wait state but keeps pending jobs when leaving
    IntermediateCatch,
    /// Ends the execution that reaches it
    NoneEnd,
    /// Takes the first eligible transition
    ExclusiveGateway,
    /// Joins all incoming branches, then forks on every outgoing transition
    ParallelGateway,
    /// Forks on every eligible transition, fatal when none is eligible
    InclusiveGateway,
    /// Embedded sub-process starting at a nested activity
    SubProcess { initial: ActivityId },
    /// Spawns a separate process instance and waits for it
    CallActivity(CallActivityConfig),
    /// Repeats an inner behavior in parallel or in sequence
    MultiInstance(MultiInstanceConfig),
}

impl ActivityBehavior {
    /// Stable name of the variant, used in events and error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            ActivityBehavior::Passthrough => "passthrough",
            ActivityBehavior::WaitState => "waitState",
            ActivityBehavior::IntermediateCatch => "intermediateCatch",
            ActivityBehavior::NoneEnd => "noneEnd",
            ActivityBehavior::ExclusiveGateway => "exclusiveGateway",
            ActivityBehavior::ParallelGateway => "parallelGateway",
            ActivityBehavior::InclusiveGateway => "inclusiveGateway",
            ActivityBehavior::SubProcess { .. } => "subProcess",
            ActivityBehavior::CallActivity(_) => "callActivity",
            ActivityBehavior::MultiInstance(config) => match config.mode {
                MultiInstanceMode::Parallel => "parallelMultiInstance",
                MultiInstanceMode::Sequential => "sequentialMultiInstance",
            },
        }
    }

    pub fn is_multi_instance(&self) -> bool {
        matches!(self, ActivityBehavior::MultiInstance(_))
    }

    pub fn multi_instance(&self) -> Option<&MultiInstanceConfig> {
        match self {
            ActivityBehavior::MultiInstance(config) => Some(config),
            _ => None,
        }
    }

    /// Whether a multi-instance branch running this behavior needs its own scope
    pub fn needs_extra_scope(&self) -> bool {
        matches!(self, ActivityBehavior::SubProcess { .. })
    }
}

// ── Multi-instance ───────────────────────────────────────────────────

/// How a multi-instance activity repeats its inner behavior
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiInstanceMode {
    Parallel,
    Sequential,
}

/// Configuration of a multi-instance activity
///
/// Exactly one cardinality source is used, in precedence order:
/// `loop_cardinality`, `collection_expression`, `collection_variable`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiInstanceConfig {
    pub mode: MultiInstanceMode,
    pub inner: Box<ActivityBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_cardinality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_element_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_condition: Option<String>,
    /// Overrides the engine-wide loop index variable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index_variable: Option<String>,
}

impl MultiInstanceConfig {
    pub fn new(mode: MultiInstanceMode) -> Self {
        Self {
            mode,
            inner: Box::new(ActivityBehavior::Passthrough),
            loop_cardinality: None,
            collection_expression: None,
            collection_variable: None,
            collection_element_variable: None,
            completion_condition: None,
            element_index_variable: None,
        }
    }

    pub fn parallel() -> Self {
        Self::new(MultiInstanceMode::Parallel)
    }

    pub fn sequential() -> Self {
        Self::new(MultiInstanceMode::Sequential)
    }

    pub fn with_inner(mut self, inner: ActivityBehavior) -> Self {
        self.inner = Box::new(inner);
        self
    }

    pub fn with_loop_cardinality(mut self, expression: impl Into<String>) -> Self {
        self.loop_cardinality = Some(expression.into());
        self
    }

    pub fn with_collection_expression(mut self, expression: impl Into<String>) -> Self {
        self.collection_expression = Some(expression.into());
        self
    }

    pub fn with_collection_variable(mut self, name: impl Into<String>) -> Self {
        self.collection_variable = Some(name.into());
        self
    }

    pub fn with_element_variable(mut self, name: impl Into<String>) -> Self {
        self.collection_element_variable = Some(name.into());
        self
    }

    pub fn with_completion_condition(mut self, expression: impl Into<String>) -> Self {
        self.completion_condition = Some(expression.into());
        self
    }

    pub fn with_element_index_variable(mut self, name: impl Into<String>) -> Self {
        self.element_index_variable = Some(name.into());
        self
    }

    /// The same configuration repeated in the given mode
    pub fn with_mode(&self, mode: MultiInstanceMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn has_cardinality_source(&self) -> bool {
        self.loop_cardinality.is_some()
            || self.collection_expression.is_some()
            || self.collection_variable.is_some()
    }

    /// Whether iterations draw their element from a collection
    pub fn uses_collection(&self) -> bool {
        self.loop_cardinality.is_none()
            && (self.collection_expression.is_some() || self.collection_variable.is_some())
    }
}

// ── Call activity ────────────────────────────────────────────────────

/// Configuration of a call activity
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallActivityConfig {
    /// Static key of the called process definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_element: Option<String>,
    /// Expression resolving to the key, used when no static key is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_element_expression: Option<String>,
    /// Copy every visible caller variable into the sub instance
    #[serde(default)]
    pub inherit_variables: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<DataAssociation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<DataAssociation>,
}

impl CallActivityConfig {
    pub fn calling(key: impl Into<String>) -> Self {
        Self {
            called_element: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn calling_expression(expression: impl Into<String>) -> Self {
        Self {
            called_element_expression: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn inheriting_variables(mut self) -> Self {
        self.inherit_variables = true;
        self
    }

    pub fn with_input(mut self, association: DataAssociation) -> Self {
        self.inputs.push(association);
        self
    }

    pub fn with_output(mut self, association: DataAssociation) -> Self {
        self.outputs.push(association);
        self
    }
}

/// Copies one value between caller and callee scopes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAssociation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_expression: Option<String>,
    pub target: String,
}

impl DataAssociation {
    pub fn variable(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            source_expression: None,
            target: target.into(),
        }
    }

    pub fn expression(expression: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: None,
            source_expression: Some(expression.into()),
            target: target.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let parallel = ActivityBehavior::MultiInstance(
            MultiInstanceConfig::parallel().with_inner(ActivityBehavior::WaitState),
        );
        assert_eq!(parallel.kind_name(), "parallelMultiInstance");
        assert!(parallel.is_multi_instance());
        assert_eq!(ActivityBehavior::WaitState.kind_name(), "waitState");
    }

    #[test]
    fn test_with_mode_copies_configuration() {
        let parallel = MultiInstanceConfig::parallel()
            .with_inner(ActivityBehavior::WaitState)
            .with_collection_variable("reviewers")
            .with_element_variable("reviewer")
            .with_completion_condition("approved >= 2");
        let sequential = parallel.with_mode(MultiInstanceMode::Sequential);
        assert_eq!(sequential.mode, MultiInstanceMode::Sequential);
        assert_eq!(sequential.collection_variable, parallel.collection_variable);
        assert_eq!(sequential.completion_condition, parallel.completion_condition);
        assert_eq!(sequential.inner, parallel.inner);
    }

    #[test]
    fn test_cardinality_sources() {
        let config = MultiInstanceConfig::parallel();
        assert!(!config.has_cardinality_source());
        assert!(!config.uses_collection());

        let config = config.with_collection_variable("items");
        assert!(config.has_cardinality_source());
        assert!(config.uses_collection());

        let config = config.with_loop_cardinality("3");
        assert!(!config.uses_collection());
    }

    #[test]
    fn test_extra_scope_only_for_sub_process() {
        let sub = ActivityBehavior::SubProcess {
            initial: ActivityId::new("inner_start"),
        };
        assert!(sub.needs_extra_scope());
        assert!(!ActivityBehavior::WaitState.needs_extra_scope());
    }

    #[test]
    fn test_serde_tagged() {
        let behavior = ActivityBehavior::CallActivity(
            CallActivityConfig::calling("payment")
                .inheriting_variables()
                .with_input(DataAssociation::variable("amount", "total")),
        );
        let json = serde_json::to_value(&behavior).unwrap();
        assert_eq!(json["kind"], "call_activity");
        let back: ActivityBehavior = serde_json::from_value(json).unwrap();
        assert_eq!(back, behavior);
    }
}
