//! Lifecycle events published to an observability dispatcher

use process_types::{
    ActivityId, CollaboratorError, ExecutionId, JobId, ProcessDefinitionId, ProcessInstanceId,
    VariableValue,
};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// An event raised while driving a process instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub process_instance_id: ProcessInstanceId,
    pub process_definition_id: ProcessDefinitionId,
    pub execution_id: ExecutionId,
    pub kind: ProcessEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEventKind {
    ActivityStarted {
        activity_id: ActivityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        activity_name: Option<String>,
        activity_type: String,
        behavior: String,
    },
    ActivityCompleted {
        activity_id: ActivityId,
    },
    ActivitySignaled {
        activity_id: ActivityId,
        signal_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal_data: Option<VariableValue>,
    },
    JobCanceled {
        job_id: JobId,
    },
    ProcessCompleted,
}

impl ProcessEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessEventKind::ActivityStarted { .. } => "ACTIVITY_STARTED",
            ProcessEventKind::ActivityCompleted { .. } => "ACTIVITY_COMPLETED",
            ProcessEventKind::ActivitySignaled { .. } => "ACTIVITY_SIGNALED",
            ProcessEventKind::JobCanceled { .. } => "JOB_CANCELED",
            ProcessEventKind::ProcessCompleted => "PROCESS_COMPLETED",
        }
    }
}

/// Best-effort sink for [`ProcessEvent`]s
pub trait EventDispatcher: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn dispatch(&self, event: ProcessEvent) -> Result<(), CollaboratorError>;
}

/// Dispatcher that keeps every event, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingEventDispatcher {
    events: Mutex<Vec<ProcessEvent>>,
}

impl RecordingEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events whose kind has the given name
    pub fn named(&self, name: &str) -> Vec<ProcessEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.name() == name)
            .collect()
    }
}

impl EventDispatcher for RecordingEventDispatcher {
    fn dispatch(&self, event: ProcessEvent) -> Result<(), CollaboratorError> {
        tracing::trace!(
            instance = %event.process_instance_id,
            event = event.kind.name(),
            "Event dispatched"
        );
        self.events
            .lock()
            .map_err(|_| CollaboratorError::new("events", "event store poisoned"))?
            .push(event);
        Ok(())
    }
}
