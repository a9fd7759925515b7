//! Per-command routing override
//!
//! A caller completing a task may force the next step instead of
//! letting guards decide.

use process_types::ActivityId;
use serde::{Deserialize, Serialize};

/// Explicit destinations supplied with a command
pub trait RoutingOverride {
    /// Destination forced when leaving a user task
    fn next_activity(&self) -> Option<&ActivityId> {
        None
    }

    /// Destination chosen when a start event has several user-task successors
    fn start_next_activity(&self) -> Option<&ActivityId> {
        None
    }
}

/// Routing carried by a single command; the default forces nothing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRouting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_activity: Option<ActivityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_next_activity: Option<ActivityId>,
}

impl CommandRouting {
    pub fn none() -> Self {
        Self::default()
    }

    /// Force the destination of the task being completed
    pub fn to(activity: impl Into<String>) -> Self {
        Self {
            next_activity: Some(ActivityId::new(activity)),
            start_next_activity: None,
        }
    }

    pub fn with_start_next_activity(mut self, activity: impl Into<String>) -> Self {
        self.start_next_activity = Some(ActivityId::new(activity));
        self
    }
}

impl RoutingOverride for CommandRouting {
    fn next_activity(&self) -> Option<&ActivityId> {
        self.next_activity.as_ref()
    }

    fn start_next_activity(&self) -> Option<&ActivityId> {
        self.start_next_activity.as_ref()
    }
}
