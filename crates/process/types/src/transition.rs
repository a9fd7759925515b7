//! Transitions: guarded sequence flows between activities

use crate::{ActivityId, TransitionId};
use serde::{Deserialize, Serialize};

/// A directed, optionally guarded edge of the process graph
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub source: ActivityId,
    pub destination: ActivityId,
    /// Boolean expression over the visible variables of the execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Built at runtime from a routing decision, not part of the graph
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl Transition {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            id: TransitionId::new(id),
            source: ActivityId::new(source),
            destination: ActivityId::new(destination),
            guard: None,
            synthetic: false,
        }
    }

    /// Create a guarded transition
    pub fn conditional(
        id: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        guard: impl Into<String>,
    ) -> Self {
        Self::new(id, source, destination).with_guard(guard)
    }

    /// A transition that does not exist in the graph, used to force routing
    pub fn synthetic(source: ActivityId, destination: ActivityId) -> Self {
        Self {
            id: TransitionId::new(format!("{}->{}", source, destination)),
            source,
            destination,
            guard: None,
            synthetic: true,
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_transition() {
        let t = Transition::conditional("t1", "a", "b", "x > 5");
        assert!(t.is_guarded());
        assert_eq!(t.guard.as_deref(), Some("x > 5"));
        assert!(!t.synthetic);
    }

    #[test]
    fn test_synthetic_transition() {
        let t = Transition::synthetic(ActivityId::new("a"), ActivityId::new("c"));
        assert!(t.synthetic);
        assert_eq!(t.id, TransitionId::new("a->c"));
        assert!(!t.is_guarded());
    }

    #[test]
    fn test_serde_omits_defaults() {
        let t = Transition::new("t1", "a", "b");
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("guard"));
        assert!(!json.contains("synthetic"));
        let back: Transition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
