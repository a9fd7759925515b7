//! Executions: the nodes of a process instance's runtime tree

use crate::{
    ActivityId, ExecutionId, JobId, ProcessInstanceId, VariableScope,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logical path through a process instance
///
/// Parent and child links are ids into the owning
/// [`ExecutionTree`](crate::ExecutionTree); the parent link is only used
/// for upward lookups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub process_instance_id: ProcessInstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ExecutionId>,
    /// Children in creation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExecutionId>,
    /// The activity this execution currently sits at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityId>,
    pub is_active: bool,
    pub is_concurrent: bool,
    pub is_scope: bool,
    pub is_ended: bool,
    #[serde(default)]
    pub variables: VariableScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    /// Pending jobs owned by an external scheduler
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobId>,
    /// Process instance spawned by a call activity at this execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_process_instance: Option<ProcessInstanceId>,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    pub fn new(
        id: ExecutionId,
        process_instance_id: ProcessInstanceId,
        parent: Option<ExecutionId>,
    ) -> Self {
        Self {
            id,
            process_instance_id,
            parent,
            children: Vec::new(),
            activity: None,
            is_active: true,
            is_concurrent: false,
            is_scope: false,
            is_ended: false,
            variables: VariableScope::new(),
            business_key: None,
            jobs: Vec::new(),
            sub_process_instance: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_at(&self, activity: &ActivityId) -> bool {
        self.activity.as_ref() == Some(activity)
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Active and not yet ended
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_ended
    }
}
