//! Engine configuration.
//!
//! Names of the variables the core writes and limits on policy-driven
//! behavior. Every field has a default, so partial configuration files
//! deserialize.

use crate::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};

/// Multi-instance counter: total number of instances
pub const NUMBER_OF_INSTANCES: &str = "nrOfInstances";
/// Multi-instance counter: instances still running
pub const NUMBER_OF_ACTIVE_INSTANCES: &str = "nrOfActiveInstances";
/// Multi-instance counter: instances already completed
pub const NUMBER_OF_COMPLETED_INSTANCES: &str = "nrOfCompletedInstances";
/// Signal a compensation handler sends to its parent when it is done
pub const COMPENSATION_DONE: &str = "compensationDone";

/// Configuration for the process engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the multi-instance loop index variable.
    pub loop_counter_variable: String,

    /// Upper bound on chained automatic decisions within one step.
    pub max_auto_decision_steps: usize,

    /// Definition category for which automatic decisions never apply.
    pub bulk_share_category: String,

    /// Record history notifications.
    pub history_enabled: bool,

    /// Dispatch lifecycle events.
    pub events_enabled: bool,

    /// Variable set to `"true"` when a task is rejected automatically.
    pub auto_reject_variable: String,

    /// Variable carrying the overall audit outcome.
    pub audit_result_variable: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            loop_counter_variable: "loopCounter".into(),
            max_auto_decision_steps: 32,
            bulk_share_category: "share".into(),
            history_enabled: true,
            events_enabled: true,
            auto_reject_variable: "auto_reject".into(),
            audit_result_variable: "auditResult".into(),
        }
    }
}

impl EngineConfig {
    /// Configuration with automatic decisions disabled.
    pub fn strict() -> Self {
        Self {
            max_auto_decision_steps: 0,
            ..Self::default()
        }
    }

    pub fn with_loop_counter_variable(mut self, name: impl Into<String>) -> Self {
        self.loop_counter_variable = name.into();
        self
    }

    pub fn with_max_auto_decision_steps(mut self, steps: usize) -> Self {
        self.max_auto_decision_steps = steps;
        self
    }

    pub fn validate(&self) -> ProcessResult<()> {
        if self.loop_counter_variable.trim().is_empty() {
            return Err(ProcessError::Validation(
                "loop counter variable name must not be empty".into(),
            ));
        }
        if self.auto_reject_variable.trim().is_empty()
            || self.audit_result_variable.trim().is_empty()
        {
            return Err(ProcessError::Validation(
                "audit variable names must not be empty".into(),
            ));
        }
        Ok(())
    }
}
