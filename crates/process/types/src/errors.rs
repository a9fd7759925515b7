//! Error types for the process orchestration layer
//!
//! Errors fall into four families:
//! - configuration faults (bad graph or multi-instance setup), fatal to the command
//! - business faults raised by activity behaviors, propagated unchanged
//! - engine faults wrapping failures of a single activity step
//! - tree-consistency violations, programming-contract breaches
//!
//! Collaborator failures (history, events, override hooks) use
//! [`CollaboratorError`] and never escape the core.

use crate::{ActivityId, ExecutionId, ProcessDefinitionId, ProcessInstanceId, TransitionId};

/// Errors that can occur while driving a process instance
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    // ── Configuration faults ─────────────────────────────────────────
    #[error("Process definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Process definition suspended: {0}")]
    DefinitionSuspended(ProcessDefinitionId),

    #[error("Activity not found: {0}")]
    ActivityNotFound(ActivityId),

    #[error("Default sequence flow '{flow}' of activity '{activity}' could not be found")]
    DefaultFlowNotFound {
        activity: ActivityId,
        flow: TransitionId,
    },

    #[error("Cannot resolve multi-instance cardinality of '{activity}': {reason}")]
    CardinalityResolution { activity: ActivityId, reason: String },

    #[error("Condition '{expression}' on '{activity}' does not evaluate to a boolean value")]
    NonBooleanCondition {
        activity: ActivityId,
        expression: String,
    },

    #[error("Join at '{activity}' resolved {count} transitions, at most one is allowed")]
    AmbiguousJoin { activity: ActivityId, count: usize },

    #[error("Expression error in '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    #[error("Process validation error: {0}")]
    Validation(String),

    // ── Business faults ──────────────────────────────────────────────
    #[error("Business error '{error_code}': {message}")]
    Business { error_code: String, message: String },

    // ── Engine faults ────────────────────────────────────────────────
    #[error("Activity behavior failed: {0}")]
    BehaviorFailed(String),

    #[error("Couldn't execute activity <{activity_type} id=\"{activity_id}\">: {message}")]
    ActivityExecution {
        activity_id: ActivityId,
        activity_type: String,
        message: String,
    },

    #[error("Could not execute inner activity behavior '{behavior}' of multi instance '{activity}': {message}")]
    InnerBehavior {
        activity: ActivityId,
        behavior: String,
        message: String,
    },

    #[error("No outgoing sequence flow of '{0}' could be selected for continuing the process")]
    StuckExecution(ActivityId),

    #[error("Activity '{activity}' does not accept signal '{signal}'")]
    NotSignalable { activity: ActivityId, signal: String },

    #[error("Process instance not found: {0}")]
    InstanceNotFound(ProcessInstanceId),

    #[error("Process instance already ended: {0}")]
    InstanceEnded(ProcessInstanceId),

    #[error("Repository error: {0}")]
    Repository(String),

    // ── Tree consistency ─────────────────────────────────────────────
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Execution '{0}' has no parent")]
    MissingParent(ExecutionId),

    #[error("Execution tree violation: {0}")]
    TreeConsistency(String),
}

impl ProcessError {
    /// Whether this is a business fault that an error boundary may catch
    pub fn is_business(&self) -> bool {
        matches!(self, ProcessError::Business { .. })
    }

    /// Whether this is a configuration fault in the process graph or its setup
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProcessError::DefinitionNotFound(_)
                | ProcessError::DefinitionSuspended(_)
                | ProcessError::ActivityNotFound(_)
                | ProcessError::DefaultFlowNotFound { .. }
                | ProcessError::CardinalityResolution { .. }
                | ProcessError::NonBooleanCondition { .. }
                | ProcessError::AmbiguousJoin { .. }
                | ProcessError::Expression { .. }
                | ProcessError::Validation(_)
        )
    }

    /// Whether this is a tree-consistency violation
    pub fn is_tree_violation(&self) -> bool {
        matches!(
            self,
            ProcessError::ExecutionNotFound(_)
                | ProcessError::MissingParent(_)
                | ProcessError::TreeConsistency(_)
        )
    }

    /// Whether a behavior failure should be wrapped with its activity context
    pub fn is_checked(&self) -> bool {
        matches!(self, ProcessError::BehaviorFailed(_))
    }

    /// Create a business fault
    pub fn business(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessError::Business {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for process operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Failure reported by an external collaborator
///
/// Logged at the call site and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: String,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}
