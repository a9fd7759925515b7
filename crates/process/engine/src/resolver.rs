//! Transition resolver: the "leave" protocol
//!
//! Decides which outgoing transitions an execution takes when it leaves
//! its activity, in priority order:
//! 1. an explicit destination from the command's routing override
//! 2. guard evaluation over every non-default transition
//! 3. one candidate moves the execution in place, several fork it
//! 4. no candidate falls back to the default flow, the compensation
//!    signal, or ends the branch
//!
//! [`take_all`] is the only place executions are forked or joined.

use crate::behavior;
use crate::context::{CommandContext, ExecutionRef};
use crate::events::ProcessEventKind;
use crate::history::HistoryKind;
use crate::policy::AutoDecisionRequest;
use process_types::{
    Activity, ActivityId, ActivityType, ExecutionId, ProcessDefinition, ProcessError,
    ProcessResult, Transition, COMPENSATION_DONE,
};

/// How outgoing transitions are selected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutgoingOptions {
    /// Evaluate guards; when false every transition is eligible
    pub check_conditions: bool,
    /// Fail instead of silently ending when nothing can be taken
    pub throw_if_stuck: bool,
}

impl OutgoingOptions {
    pub const DEFAULT: Self = Self {
        check_conditions: true,
        throw_if_stuck: false,
    };

    pub const IGNORE_CONDITIONS: Self = Self {
        check_conditions: false,
        throw_if_stuck: false,
    };

    pub const INCLUSIVE: Self = Self {
        check_conditions: true,
        throw_if_stuck: true,
    };
}

/// What leaving an activity did to the tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TakeResult {
    /// One execution moved to the destination
    Took { destination: ActivityId },
    /// Concurrent branches, one per taken transition
    Forked { branches: Vec<ExecutionId> },
    /// The branch ended without continuation
    Ended,
    /// A compensation handler finished and signaled its parent
    CompensationDone { parent: ExecutionId },
    /// A start event with several user-task successors and no chosen one
    AwaitingRoute,
}

enum Routed {
    Transition(Transition),
    Awaiting,
    Unrouted,
}

// ── Outgoing behaviors ───────────────────────────────────────────────

/// Leave with guard evaluation, cancelling the execution's pending jobs
///
/// Intermediate catch events keep their jobs.
pub fn perform_default_outgoing(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
) -> ProcessResult<TakeResult> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity_id = ctx.current_activity(at)?;
    let activity = definition.require_activity(&activity_id)?;

    if activity.activity_type != ActivityType::IntermediateCatchEvent {
        let jobs = std::mem::take(&mut ctx.tree_mut(&at.instance)?.get_mut(&at.execution)?.jobs);
        for job_id in jobs {
            ctx.dispatch(at, ProcessEventKind::JobCanceled { job_id });
        }
    }
    resolve_outgoing(ctx, at, OutgoingOptions::DEFAULT, None)
}

/// Leave taking every outgoing transition regardless of guards
pub fn perform_ignore_conditions_outgoing(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
) -> ProcessResult<TakeResult> {
    resolve_outgoing(ctx, at, OutgoingOptions::IGNORE_CONDITIONS, None)
}

/// Resolve and take the outgoing transitions of the execution's activity
///
/// `reusable` executions are recycled as branches when the execution
/// forks; by default only the execution itself is reused.
pub fn resolve_outgoing(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    options: OutgoingOptions,
    reusable: Option<Vec<ExecutionId>>,
) -> ProcessResult<TakeResult> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity_id = ctx.current_activity(at)?;
    let activity = definition.require_activity(&activity_id)?;

    tracing::debug!(activity = %activity_id, execution = %at, "Leaving activity");

    let (mut candidates, from_guards) = match routed_transition(ctx, &definition, activity)? {
        Routed::Transition(transition) => (vec![transition], false),
        Routed::Awaiting => {
            tracing::debug!(
                activity = %activity_id,
                "Start event has several user-task successors and no chosen one"
            );
            return Ok(TakeResult::AwaitingRoute);
        }
        Routed::Unrouted => (
            eligible_transitions(ctx, at, &definition, activity, options)?,
            true,
        ),
    };

    if candidates.len() == 1 {
        let mut transition = candidates.remove(0);
        if from_guards {
            if let Some(substitute) = apply_auto_decision(ctx, at, &definition, &transition)? {
                transition = substitute;
            }
        }
        take(ctx, at, &transition, true)?;
        return Ok(TakeResult::Took {
            destination: transition.destination,
        });
    }

    if candidates.len() > 1 {
        ctx.tree_mut(&at.instance)?.inactivate(&at.execution)?;
        let pool = reusable
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| vec![at.execution.clone()]);
        return take_all(ctx, at, &candidates, pool);
    }

    leave_without_candidates(ctx, at, &definition, activity, options)
}

fn routed_transition(
    ctx: &CommandContext<'_>,
    definition: &ProcessDefinition,
    activity: &Activity,
) -> ProcessResult<Routed> {
    let routing = ctx.routing();

    if activity.activity_type == ActivityType::StartEvent && routing.next_activity().is_none() {
        let user_task_successors = definition
            .outgoing_transitions(&activity.id)
            .iter()
            .filter(|t| {
                definition
                    .activity(&t.destination)
                    .is_some_and(|a| a.activity_type == ActivityType::UserTask)
            })
            .count();
        if user_task_successors > 1 {
            return match routing.start_next_activity() {
                Some(destination) => {
                    definition.require_activity(destination)?;
                    Ok(Routed::Transition(Transition::synthetic(
                        activity.id.clone(),
                        destination.clone(),
                    )))
                }
                None => Ok(Routed::Awaiting),
            };
        }
    }

    Ok(match user_task_override(ctx, definition, activity) {
        Some(transition) => Routed::Transition(transition),
        None => Routed::Unrouted,
    })
}

/// A synthetic transition to the destination the caller forced on a user task
pub(crate) fn user_task_override(
    ctx: &CommandContext<'_>,
    definition: &ProcessDefinition,
    activity: &Activity,
) -> Option<Transition> {
    if activity.activity_type != ActivityType::UserTask {
        return None;
    }
    let destination = ctx.routing().next_activity()?;
    if definition.activity(destination).is_none() {
        tracing::warn!(
            activity = %activity.id,
            destination = %destination,
            "Routing override names an unknown activity, evaluating guards"
        );
        return None;
    }
    Some(Transition::synthetic(activity.id.clone(), destination.clone()))
}

/// Non-default transitions whose guard passes, in declaration order
pub(crate) fn eligible_transitions(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    definition: &ProcessDefinition,
    activity: &Activity,
    options: OutgoingOptions,
) -> ProcessResult<Vec<Transition>> {
    let variables = ctx.tree(&at.instance)?.visible_variables(&at.execution);
    let evaluator = &ctx.collaborators().evaluator;
    let default_flow = activity.properties.default_flow.as_ref();

    let mut eligible = Vec::new();
    for transition in definition.outgoing_transitions(&activity.id) {
        if Some(&transition.id) == default_flow {
            continue;
        }
        let passes = match &transition.guard {
            None => true,
            Some(_) if !options.check_conditions => true,
            Some(guard) => evaluator.evaluate_condition(&activity.id, guard, &variables)?,
        };
        if passes {
            eligible.push(transition.clone());
        }
    }
    Ok(eligible)
}

fn leave_without_candidates(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    definition: &ProcessDefinition,
    activity: &Activity,
    options: OutgoingOptions,
) -> ProcessResult<TakeResult> {
    if let Some(flow) = &activity.properties.default_flow {
        let transition = definition
            .find_outgoing(&activity.id, flow)
            .cloned()
            .ok_or_else(|| ProcessError::DefaultFlowNotFound {
                activity: activity.id.clone(),
                flow: flow.clone(),
            })?;
        take(ctx, at, &transition, true)?;
        return Ok(TakeResult::Took {
            destination: transition.destination,
        });
    }

    if activity.properties.is_for_compensation {
        let parent = ctx.tree(&at.instance)?.require_parent(&at.execution)?;
        ctx.record(at, Some(activity.id.clone()), HistoryKind::ActivityEnded);
        ctx.tree_mut(&at.instance)?.remove(&at.execution)?;
        behavior::signal(ctx, &at.sibling(parent.clone()), COMPENSATION_DONE, None)?;
        return Ok(TakeResult::CompensationDone { parent });
    }

    if options.throw_if_stuck {
        return Err(ProcessError::StuckExecution(activity.id.clone()));
    }
    tracing::debug!(
        activity = %activity.id,
        execution = %at,
        "No outgoing sequence flow found, ending execution"
    );
    behavior::end_execution(ctx, at)?;
    Ok(TakeResult::Ended)
}

/// Let the auto-decision policy replace a guard-selected destination
///
/// Only applies outside the bulk-share category and only when the
/// destination is a user task right after the start event. Policy
/// failures leave the original destination in place.
pub(crate) fn apply_auto_decision(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    definition: &ProcessDefinition,
    transition: &Transition,
) -> ProcessResult<Option<Transition>> {
    let config = ctx.config();
    let Some(policy) = ctx.collaborators().auto_decision.as_ref() else {
        return Ok(None);
    };
    if config.max_auto_decision_steps == 0
        || definition.category.as_deref() == Some(config.bulk_share_category.as_str())
        || !definition.is_start_user_task(&transition.destination)
    {
        return Ok(None);
    }

    let variables = ctx.tree(&at.instance)?.visible_variables(&at.execution);
    let request = AutoDecisionRequest {
        definition,
        execution: &at.execution,
        variables: &variables,
        next_activity: &transition.destination,
        config,
    };
    let decision = match policy.decide(&request) {
        Ok(Some(decision)) => decision,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!(execution = %at, error = %e, "Auto-decision policy failed");
            return Ok(None);
        }
    };
    if definition.activity(&decision.destination).is_none() {
        tracing::warn!(
            destination = %decision.destination,
            "Auto-decision names an unknown activity, keeping guard result"
        );
        return Ok(None);
    }

    let tree = ctx.tree_mut(&at.instance)?;
    for (name, value) in decision.variables {
        tree.set_variable_global(name, value)?;
    }
    for passed in decision.passed {
        ctx.record(at, Some(passed), HistoryKind::AutoPassed);
    }
    if decision.destination == transition.destination {
        return Ok(None);
    }

    tracing::debug!(
        from = %transition.destination,
        to = %decision.destination,
        "Auto-decision redirected transition"
    );
    Ok(Some(Transition::synthetic(
        transition.source.clone(),
        decision.destination,
    )))
}

// ── Taking transitions ───────────────────────────────────────────────

/// Move an execution along a transition and queue it at the destination
pub fn take(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    transition: &Transition,
    fire_completion: bool,
) -> ProcessResult<()> {
    let source = ctx.current_activity(at)?;
    if fire_completion {
        ctx.record(at, Some(source.clone()), HistoryKind::ActivityEnded);
        ctx.dispatch(
            at,
            ProcessEventKind::ActivityCompleted {
                activity_id: source.clone(),
            },
        );
    }

    tracing::debug!(
        from = %source,
        to = %transition.destination,
        transition = %transition.id,
        execution = %at,
        "Taking transition"
    );

    let tree = ctx.tree_mut(&at.instance)?;
    tree.set_activity(&at.execution, transition.destination.clone())?;
    tree.set_active(&at.execution, true)?;
    ctx.schedule(at.clone())
}

/// Take several transitions at once, joining or forking as needed
///
/// When a single transition is taken and every branch under the
/// concurrent root is inactive at the same activity, the branches are
/// removed and the concurrent root continues alone. Otherwise each
/// transition gets a concurrent branch: reusable executions first, new
/// children of the concurrent root for the rest. Reusable executions
/// left over are removed.
pub fn take_all(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    transitions: &[Transition],
    reusable: Vec<ExecutionId>,
) -> ProcessResult<TakeResult> {
    let activity = ctx.current_activity(at)?;
    let tree = ctx.tree(&at.instance)?;

    if reusable.len() > 1 {
        let joins_scope = reusable
            .iter()
            .filter_map(|id| tree.find(id))
            .any(|e| e.is_scope);
        if joins_scope {
            return Err(ProcessError::TreeConsistency(
                "joining scope executions is not allowed".into(),
            ));
        }
    }

    let concurrent_root = tree.concurrent_root(&at.execution)?;
    let children: Vec<_> = tree
        .children_of(&concurrent_root)?
        .iter()
        .filter_map(|id| tree.find(id))
        .collect();
    let any_active = children.iter().any(|c| c.is_active);
    let mut inactive_activities = children.iter().filter(|c| !c.is_active).map(|c| &c.activity);
    let same_activity = match inactive_activities.next() {
        Some(first) => inactive_activities.all(|a| a == first),
        None => true,
    };

    let mut recyclable: Vec<ExecutionId> = reusable
        .into_iter()
        .filter(|id| id != &concurrent_root)
        .collect();

    if transitions.len() <= 1 && !any_active && same_activity {
        tracing::debug!(
            activity = %activity,
            joined = recyclable.len(),
            root = %concurrent_root,
            "Joining branches into concurrent root"
        );
        let tree = ctx.tree_mut(&at.instance)?;
        for id in &recyclable {
            tree.remove(id)?;
        }
        tree.set_activity(&concurrent_root, activity)?;
        tree.set_active(&concurrent_root, true)?;

        let root = at.sibling(concurrent_root);
        return match transitions.first() {
            Some(transition) => {
                take(ctx, &root, transition, false)?;
                Ok(TakeResult::Took {
                    destination: transition.destination.clone(),
                })
            }
            None => {
                behavior::end_execution(ctx, &root)?;
                Ok(TakeResult::Ended)
            }
        };
    }

    let tree = ctx.tree_mut(&at.instance)?;
    let mut branches = Vec::with_capacity(transitions.len());
    for _ in transitions {
        let id = if recyclable.is_empty() {
            tree.create_child(&concurrent_root)?
        } else {
            recyclable.remove(0)
        };
        let branch = tree.get_mut(&id)?;
        branch.is_active = true;
        branch.is_scope = false;
        branch.is_concurrent = true;
        branches.push(id);
    }
    for unused in &recyclable {
        tree.remove(unused)?;
    }

    tracing::debug!(
        activity = %activity,
        branches = branches.len(),
        root = %concurrent_root,
        "Forking execution"
    );
    for (id, transition) in branches.iter().zip(transitions) {
        take(ctx, &at.sibling(id.clone()), transition, true)?;
    }
    Ok(TakeResult::Forked { branches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::CommandRouting;
    use crate::testing::Harness;
    use process_types::ProcessDefinitionId;
    use serde_json::json;

    /// A → B (guard x > 5), A → C
    fn make_fork_definition(h: &Harness) -> ProcessDefinitionId {
        let mut def = ProcessDefinition::new("fork", "Fork").with_initial("A");
        for id in ["A", "B", "C"] {
            def.add_activity(Activity::service_task(id)).unwrap();
        }
        def.add_transition(Transition::conditional("ab", "A", "B", "x > 5"))
            .unwrap();
        def.add_transition(Transition::new("ac", "A", "C")).unwrap();
        h.deploy(def)
    }

    #[test]
    fn test_single_candidate_moves_execution_in_place() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[("x", json!(3))]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);

        let result = resolve_outgoing(&mut ctx, &root, OutgoingOptions::DEFAULT, None).unwrap();

        assert_eq!(
            result,
            TakeResult::Took {
                destination: ActivityId::new("C")
            }
        );
        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("C")));
        assert!(tree.root().unwrap().is_active);
    }

    #[test]
    fn test_several_candidates_fork_under_root() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[("x", json!(10))]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);

        let result = resolve_outgoing(&mut ctx, &root, OutgoingOptions::DEFAULT, None).unwrap();

        let TakeResult::Forked { branches } = result else {
            panic!("expected a fork");
        };
        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(branches.len(), 2);
        assert!(!tree.root().unwrap().is_active);
        let destinations: Vec<_> = branches
            .iter()
            .map(|b| tree.get(b).unwrap().activity.clone().unwrap())
            .collect();
        assert_eq!(destinations, vec![ActivityId::new("B"), ActivityId::new("C")]);
        for branch in &branches {
            let e = tree.get(branch).unwrap();
            assert!(e.is_concurrent && e.is_active && !e.is_scope);
            assert_eq!(e.parent.as_ref(), Some(&root.execution));
        }
        assert!(tree.check_consistency().is_ok());
    }

    #[test]
    fn test_fork_from_concurrent_branch_reuses_it() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[("x", json!(10))]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);
        let branch = {
            let tree = ctx.tree_mut(&instance).unwrap();
            tree.inactivate(&root.execution).unwrap();
            tree.create_concurrent_child(&root.execution).unwrap()
        };

        let at = root.sibling(branch.clone());
        let result = resolve_outgoing(&mut ctx, &at, OutgoingOptions::DEFAULT, None).unwrap();

        let TakeResult::Forked { branches } = result else {
            panic!("expected a fork");
        };
        assert_eq!(branches[0], branch);
        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.get(&branch).unwrap().activity, Some(ActivityId::new("B")));
        assert_eq!(tree.require_parent(&branches[1]).unwrap(), root.execution);
        assert_eq!(tree.children_of(&root.execution).unwrap().len(), 2);
    }

    #[test]
    fn test_ignore_conditions_takes_every_transition() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[("x", json!(0))]);
        let mut ctx = h.context();

        let result =
            perform_ignore_conditions_outgoing(&mut ctx, &ExecutionRef::root(&instance)).unwrap();
        assert!(matches!(result, TakeResult::Forked { branches } if branches.len() == 2));
    }

    #[test]
    fn test_default_flow_fallback() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("default", "Default").with_initial("A");
        def.add_activity(Activity::service_task("A").with_default_flow("ab"))
            .unwrap();
        def.add_activity(Activity::service_task("B")).unwrap();
        def.add_transition(Transition::conditional("ab", "A", "B", "x > 5"))
            .unwrap();
        let def = h.deploy(def);
        let instance = h.instance_at(&def, "A", &[("x", json!(3))]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);

        let result = resolve_outgoing(&mut ctx, &root, OutgoingOptions::DEFAULT, None).unwrap();

        assert_eq!(
            result,
            TakeResult::Took {
                destination: ActivityId::new("B")
            }
        );
        assert_eq!(
            ctx.tree(&instance).unwrap().root().unwrap().activity,
            Some(ActivityId::new("B"))
        );
    }

    #[test]
    fn test_inclusive_stuck_is_fatal() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("stuck", "Stuck").with_initial("A");
        def.add_activity(Activity::service_task("A")).unwrap();
        def.add_activity(Activity::service_task("B")).unwrap();
        def.add_transition(Transition::conditional("ab", "A", "B", "x > 5"))
            .unwrap();
        let def = h.deploy(def);
        let instance = h.instance_at(&def, "A", &[("x", json!(1))]);
        let mut ctx = h.context();

        let result = resolve_outgoing(
            &mut ctx,
            &ExecutionRef::root(&instance),
            OutgoingOptions::INCLUSIVE,
            None,
        );
        assert!(matches!(result, Err(ProcessError::StuckExecution(_))));
        // The tree is untouched by the failed leave
        assert_eq!(ctx.tree(&instance).unwrap().len(), 1);
    }

    #[test]
    fn test_nothing_eligible_ends_the_branch() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("stuck", "Stuck").with_initial("A");
        def.add_activity(Activity::service_task("A")).unwrap();
        def.add_activity(Activity::service_task("B")).unwrap();
        def.add_transition(Transition::conditional("ab", "A", "B", "x > 5"))
            .unwrap();
        let def = h.deploy(def);
        let instance = h.instance_at(&def, "A", &[("x", json!(1))]);
        let mut ctx = h.context();

        let result = resolve_outgoing(
            &mut ctx,
            &ExecutionRef::root(&instance),
            OutgoingOptions::DEFAULT,
            None,
        )
        .unwrap();
        assert_eq!(result, TakeResult::Ended);
        assert!(ctx.tree(&instance).unwrap().is_ended());
    }

    #[test]
    fn test_compensation_signals_parent_once() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("compensate", "Compensate").with_initial("throw");
        def.add_activity(Activity::intermediate_catch("throw")).unwrap();
        def.add_activity(Activity::service_task("undo").for_compensation())
            .unwrap();
        def.add_activity(Activity::end_event("end")).unwrap();
        def.add_transition(Transition::new("t1", "throw", "end"))
            .unwrap();
        let def = h.deploy(def);
        let instance = h.instance_at(&def, "throw", &[]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);
        let handler = {
            let tree = ctx.tree_mut(&instance).unwrap();
            tree.inactivate(&root.execution).unwrap();
            let child = tree.create_child(&root.execution).unwrap();
            tree.set_activity(&child, ActivityId::new("undo")).unwrap();
            child
        };

        let at = root.sibling(handler.clone());
        let result = resolve_outgoing(&mut ctx, &at, OutgoingOptions::DEFAULT, None).unwrap();

        assert_eq!(
            result,
            TakeResult::CompensationDone {
                parent: root.execution.clone()
            }
        );
        let tree = ctx.tree(&instance).unwrap();
        assert!(!tree.contains(&handler));
        assert_eq!(h.events.named("ACTIVITY_SIGNALED").len(), 1);
        // The parent has nothing left to wait for and moves on
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("end")));
    }

    #[test]
    fn test_compensation_without_parent_is_a_tree_violation() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("compensate", "Compensate").with_initial("undo");
        def.add_activity(Activity::service_task("undo").for_compensation())
            .unwrap();
        let def = h.deploy(def);
        let instance = h.instance_at(&def, "undo", &[]);
        let mut ctx = h.context();

        let result = resolve_outgoing(
            &mut ctx,
            &ExecutionRef::root(&instance),
            OutgoingOptions::DEFAULT,
            None,
        );
        assert!(matches!(result, Err(ProcessError::MissingParent(_))));
    }

    #[test]
    fn test_default_outgoing_cancels_jobs() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[("x", json!(3))]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);
        ctx.tree_mut(&instance)
            .unwrap()
            .get_mut(&root.execution)
            .unwrap()
            .jobs
            .push(process_types::JobId::new("timer-1"));

        perform_default_outgoing(&mut ctx, &root).unwrap();

        assert_eq!(h.events.named("JOB_CANCELED").len(), 1);
        assert!(ctx.tree(&instance).unwrap().root().unwrap().jobs.is_empty());
    }

    #[test]
    fn test_take_all_collapses_joined_branches() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);
        let (a, b) = {
            let tree = ctx.tree_mut(&instance).unwrap();
            tree.inactivate(&root.execution).unwrap();
            let a = tree.create_concurrent_child(&root.execution).unwrap();
            let b = tree.create_concurrent_child(&root.execution).unwrap();
            tree.inactivate(&a).unwrap();
            tree.inactivate(&b).unwrap();
            (a, b)
        };
        let onward = Transition::new("ac", "A", "C");

        let at = root.sibling(b.clone());
        let result = take_all(&mut ctx, &at, &[onward], vec![a.clone(), b.clone()]).unwrap();

        assert_eq!(
            result,
            TakeResult::Took {
                destination: ActivityId::new("C")
            }
        );
        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.root().unwrap().is_active);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("C")));
    }

    #[test]
    fn test_take_all_rejects_joining_scopes() {
        let h = Harness::new();
        let def = make_fork_definition(&h);
        let instance = h.instance_at(&def, "A", &[]);
        let mut ctx = h.context();
        let root = ExecutionRef::root(&instance);
        let (a, b) = {
            let tree = ctx.tree_mut(&instance).unwrap();
            let a = tree.create_scope_child(&root.execution).unwrap();
            let b = tree.create_concurrent_child(&root.execution).unwrap();
            (a, b)
        };

        let result = take_all(
            &mut ctx,
            &root.sibling(b.clone()),
            &[Transition::new("ac", "A", "C")],
            vec![a, b],
        );
        assert!(matches!(result, Err(ProcessError::TreeConsistency(_))));
    }

    #[test]
    fn test_start_event_waits_for_explicit_successor() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("choose", "Choose");
        def.add_activity(Activity::start_event("start")).unwrap();
        def.add_activity(Activity::user_task("draft")).unwrap();
        def.add_activity(Activity::user_task("review")).unwrap();
        def.add_transition(Transition::new("t1", "start", "draft"))
            .unwrap();
        def.add_transition(Transition::new("t2", "start", "review"))
            .unwrap();
        let def = h.deploy(def);

        let instance = h.instance_at(&def, "start", &[]);
        let mut ctx = h.context();
        let result = resolve_outgoing(
            &mut ctx,
            &ExecutionRef::root(&instance),
            OutgoingOptions::DEFAULT,
            None,
        )
        .unwrap();
        assert_eq!(result, TakeResult::AwaitingRoute);

        let h = h.with_routing(CommandRouting::none().with_start_next_activity("review"));
        let instance = h.instance_at(&def, "start", &[]);
        let mut ctx = h.context();
        let result = resolve_outgoing(
            &mut ctx,
            &ExecutionRef::root(&instance),
            OutgoingOptions::DEFAULT,
            None,
        )
        .unwrap();
        assert_eq!(
            result,
            TakeResult::Took {
                destination: ActivityId::new("review")
            }
        );
    }

    #[test]
    fn test_user_task_routing_override_wins_over_guards() {
        let h = Harness::new().with_routing(CommandRouting::to("C"));
        let mut def = ProcessDefinition::new("route", "Route").with_initial("A");
        def.add_activity(Activity::user_task("A")).unwrap();
        def.add_activity(Activity::user_task("B")).unwrap();
        def.add_activity(Activity::user_task("C")).unwrap();
        def.add_transition(Transition::new("ab", "A", "B")).unwrap();
        def.add_transition(Transition::conditional("ac", "A", "C", "false"))
            .unwrap();
        let def = h.deploy(def);
        let instance = h.instance_at(&def, "A", &[]);
        let mut ctx = h.context();

        let result = resolve_outgoing(
            &mut ctx,
            &ExecutionRef::root(&instance),
            OutgoingOptions::DEFAULT,
            None,
        )
        .unwrap();
        assert_eq!(
            result,
            TakeResult::Took {
                destination: ActivityId::new("C")
            }
        );
    }
}
