//! Behavior override hook: per-instance replacement of activity behavior
//!
//! The hook is consulted before every activity step except start and end
//! events. Whatever it returns is stored as an overlay on the instance's
//! tree; the shared process graph is never touched.

use process_types::{
    Activity, ActivityBehavior, ActivityOverlay, CollaboratorError, ExecutionId,
    MultiInstanceMode, ProcessDefinition,
};
use std::collections::{BTreeMap, BTreeSet};

/// Input to a [`BehaviorOverrideHook`]
#[derive(Clone, Copy, Debug)]
pub struct OverrideRequest<'a> {
    pub definition: &'a ProcessDefinition,
    pub activity: &'a Activity,
    pub execution: &'a ExecutionId,
}

/// May replace an activity's bound behavior or properties
///
/// Implementations must be idempotent: they see the behavior bound in
/// the process graph, never a previously applied overlay.
pub trait BehaviorOverrideHook: Send + Sync {
    /// `Ok(None)` leaves the activity as it is
    fn resolve(
        &self,
        request: &OverrideRequest<'_>,
    ) -> Result<Option<ActivityOverlay>, CollaboratorError>;
}

/// Assigns deal types to activities
///
/// A deal type listed as sequential turns a parallel multi-instance
/// activity into a sequential one with the same configuration.
#[derive(Clone, Debug, Default)]
pub struct DealTypeOverride {
    deal_types: BTreeMap<String, String>,
    sequential: BTreeSet<String>,
}

impl DealTypeOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deal_type(
        mut self,
        activity: impl Into<String>,
        deal_type: impl Into<String>,
    ) -> Self {
        self.deal_types.insert(activity.into(), deal_type.into());
        self
    }

    /// Activities with this deal type iterate instead of forking
    pub fn with_sequential(mut self, deal_type: impl Into<String>) -> Self {
        self.sequential.insert(deal_type.into());
        self
    }
}

impl BehaviorOverrideHook for DealTypeOverride {
    fn resolve(
        &self,
        request: &OverrideRequest<'_>,
    ) -> Result<Option<ActivityOverlay>, CollaboratorError> {
        let Some(deal_type) = self.deal_types.get(request.activity.id.as_str()) else {
            return Ok(None);
        };

        let behavior = match &request.activity.behavior {
            ActivityBehavior::MultiInstance(config)
                if config.mode == MultiInstanceMode::Parallel
                    && self.sequential.contains(deal_type) =>
            {
                Some(ActivityBehavior::MultiInstance(
                    config.with_mode(MultiInstanceMode::Sequential),
                ))
            }
            _ => None,
        };

        Ok(Some(ActivityOverlay {
            behavior,
            deal_type: Some(deal_type.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_types::MultiInstanceConfig;

    fn make_definition() -> ProcessDefinition {
        let mut def = ProcessDefinition::new("countersign", "Countersign");
        def.add_activity(Activity::start_event("start")).unwrap();
        def.add_activity(
            Activity::user_task("sign")
                .with_multi_instance(MultiInstanceConfig::parallel().with_loop_cardinality("3")),
        )
        .unwrap();
        def.add_activity(Activity::user_task("review")).unwrap();
        def
    }

    fn resolve(
        hook: &DealTypeOverride,
        def: &ProcessDefinition,
        activity: &str,
    ) -> Option<ActivityOverlay> {
        let activity = def
            .activity(&process_types::ActivityId::new(activity))
            .unwrap();
        hook.resolve(&OverrideRequest {
            definition: def,
            activity,
            execution: &ExecutionId::new("e1"),
        })
        .unwrap()
    }

    #[test]
    fn test_unlisted_activity_is_untouched() {
        let def = make_definition();
        let hook = DealTypeOverride::new().with_deal_type("sign", "joint");
        assert!(resolve(&hook, &def, "review").is_none());
    }

    #[test]
    fn test_deal_type_without_mode_change() {
        let def = make_definition();
        let hook = DealTypeOverride::new().with_deal_type("sign", "joint");
        let overlay = resolve(&hook, &def, "sign").unwrap();
        assert_eq!(overlay.deal_type.as_deref(), Some("joint"));
        assert!(overlay.behavior.is_none());
    }

    #[test]
    fn test_sequential_deal_type_switches_mode() {
        let def = make_definition();
        let hook = DealTypeOverride::new()
            .with_deal_type("sign", "ordered")
            .with_sequential("ordered");
        let overlay = resolve(&hook, &def, "sign").unwrap();
        let Some(ActivityBehavior::MultiInstance(config)) = overlay.behavior else {
            panic!("expected a multi-instance overlay");
        };
        assert_eq!(config.mode, MultiInstanceMode::Sequential);
        assert_eq!(config.loop_cardinality.as_deref(), Some("3"));

        // Same answer on every call
        let again = resolve(&hook, &def, "sign").unwrap();
        assert!(matches!(again.behavior, Some(ActivityBehavior::MultiInstance(_))));
    }
}
