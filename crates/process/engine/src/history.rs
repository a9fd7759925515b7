//! History recording: append-only notifications of activity lifecycle
//!
//! The core tells the [`HistoryRecorder`] when activities start and end,
//! when wait-state tasks are created and completed, and when branches are
//! pruned. Recording is fire-and-forget: a failing recorder is logged and
//! the command carries on.

use chrono::{DateTime, Utc};
use process_types::{ActivityId, CollaboratorError, ExecutionId, ProcessInstanceId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Receives history notifications from the core
pub trait HistoryRecorder: Send + Sync {
    fn record(&self, record: HistoryRecord) -> Result<(), CollaboratorError>;
}

/// A single history notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub process_instance_id: ProcessInstanceId,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<ActivityId>,
    pub kind: HistoryKind,
    /// Deal type in effect for the activity, if an override supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(
        process_instance_id: ProcessInstanceId,
        execution_id: ExecutionId,
        activity_id: Option<ActivityId>,
        kind: HistoryKind,
    ) -> Self {
        Self {
            process_instance_id,
            execution_id,
            activity_id,
            kind,
            deal_type: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_deal_type(mut self, deal_type: Option<String>) -> Self {
        self.deal_type = deal_type;
        self
    }
}

/// What happened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryKind {
    ProcessStarted,
    ProcessEnded,
    ActivityStarted,
    ActivityEnded,
    TaskCreated,
    TaskCompleted,
    /// A task skipped by an automatic decision
    AutoPassed,
    /// A branch removed before it completed
    ExecutionPruned { reason: String },
}

impl std::fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryKind::ProcessStarted => write!(f, "process_started"),
            HistoryKind::ProcessEnded => write!(f, "process_ended"),
            HistoryKind::ActivityStarted => write!(f, "activity_started"),
            HistoryKind::ActivityEnded => write!(f, "activity_ended"),
            HistoryKind::TaskCreated => write!(f, "task_created"),
            HistoryKind::TaskCompleted => write!(f, "task_completed"),
            HistoryKind::AutoPassed => write!(f, "auto_passed"),
            HistoryKind::ExecutionPruned { reason } => write!(f, "execution_pruned({})", reason),
        }
    }
}

/// History kept in memory, queryable by instance
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in the order they were written
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Records for one process instance
    pub fn for_instance(&self, instance_id: &ProcessInstanceId) -> Vec<HistoryRecord> {
        self.records()
            .into_iter()
            .filter(|r| &r.process_instance_id == instance_id)
            .collect()
    }

    /// Number of records matching a predicate on their kind
    pub fn count_where(&self, predicate: impl Fn(&HistoryKind) -> bool) -> usize {
        self.records().iter().filter(|r| predicate(&r.kind)).count()
    }

    /// Records of an activity, in order
    pub fn for_activity(&self, activity: &ActivityId) -> Vec<HistoryRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.activity_id.as_ref() == Some(activity))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryRecorder for InMemoryHistory {
    fn record(&self, record: HistoryRecord) -> Result<(), CollaboratorError> {
        tracing::trace!(
            instance = %record.process_instance_id,
            execution = %record.execution_id,
            kind = %record.kind,
            "History recorded"
        );
        self.records
            .lock()
            .map_err(|_| CollaboratorError::new("history", "record store poisoned"))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(kind: HistoryKind, activity: &str) -> HistoryRecord {
        let instance = ProcessInstanceId::new("pi-1");
        HistoryRecord::new(
            instance.clone(),
            instance.root_execution(),
            Some(ActivityId::new(activity)),
            kind,
        )
    }

    #[test]
    fn test_records_are_kept_in_order() {
        let history = InMemoryHistory::new();
        assert!(history.is_empty());
        history
            .record(make_record(HistoryKind::ActivityStarted, "a"))
            .unwrap();
        history
            .record(make_record(HistoryKind::ActivityEnded, "a"))
            .unwrap();
        history
            .record(make_record(HistoryKind::TaskCreated, "b"))
            .unwrap();

        let records = history.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, HistoryKind::ActivityStarted);
        assert_eq!(records[2].kind, HistoryKind::TaskCreated);
        assert_eq!(history.for_activity(&ActivityId::new("a")).len(), 2);
    }

    #[test]
    fn test_query_by_instance_and_kind() {
        let history = InMemoryHistory::new();
        history
            .record(make_record(
                HistoryKind::ExecutionPruned {
                    reason: "multi-delete".into(),
                },
                "review",
            ))
            .unwrap();
        let other = ProcessInstanceId::new("pi-2");
        history
            .record(HistoryRecord::new(
                other.clone(),
                other.root_execution(),
                None,
                HistoryKind::ProcessStarted,
            ))
            .unwrap();

        assert_eq!(history.for_instance(&other).len(), 1);
        assert_eq!(
            history.count_where(|k| matches!(k, HistoryKind::ExecutionPruned { .. })),
            1
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(HistoryKind::AutoPassed.to_string(), "auto_passed");
        assert_eq!(
            HistoryKind::ExecutionPruned {
                reason: "multi-delete".into()
            }
            .to_string(),
            "execution_pruned(multi-delete)"
        );
    }
}
