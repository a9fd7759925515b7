//! Parallel multi-instance: one concurrent branch per instance
//!
//! Branches are created in two passes. Every branch exists before any
//! inner behavior runs, so a branch that completes synchronously and
//! triggers an early join never sees a partial sibling list.

use super::{
    collection_items, completion_satisfied, execute_inner, loop_index_variable,
    resolve_cardinality, set_counters, set_loop_variables,
};
use crate::context::{CommandContext, ExecutionRef};
use crate::history::HistoryKind;
use crate::resolver::{self, OutgoingOptions};
use process_types::{
    ActivityId, ExecutionId, MultiInstanceConfig, ProcessDefinition, ProcessError,
    ProcessResult, Transition, VariableValue, NUMBER_OF_ACTIVE_INSTANCES,
    NUMBER_OF_COMPLETED_INSTANCES, NUMBER_OF_INSTANCES,
};

const PRUNE_REASON: &str = "multi-delete";

pub(super) fn create_instances(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let activity = ctx.current_activity(at)?;
    let instances = resolve_cardinality(ctx, at, &activity, config)?;
    let items = collection_items(ctx, at, &activity, config)?;
    let definition = ctx.definition_for(&at.instance)?;
    let deal_type = ctx.deal_type(&at.instance, &definition, &activity);

    let tree = ctx.tree_mut(&at.instance)?;
    let n = instances as i64;
    set_counters(tree, &at.execution, n, n, 0)?;
    if instances == 0 {
        tracing::debug!(activity = %activity, execution = %at, "No instances to create, leaving");
        return resolver::perform_default_outgoing(ctx, at).map(|_| ());
    }

    tracing::debug!(
        activity = %activity,
        execution = %at,
        instances,
        "Creating parallel instances"
    );

    let extra_scope = config.inner.needs_extra_scope();
    let mut targets = Vec::with_capacity(instances);
    for _ in 0..instances {
        let branch = tree.create_concurrent_child(&at.execution)?;
        tree.get_mut(&branch)?.business_key = deal_type.clone();
        let target = if extra_scope {
            tree.create_scope_child(&branch)?
        } else {
            branch
        };
        targets.push(target);
    }

    for (index, target) in targets.into_iter().enumerate() {
        let tree = ctx.tree(&at.instance)?;
        let runnable = tree.find(&target).is_some_and(|branch| {
            branch.is_live()
                && branch
                    .parent
                    .as_ref()
                    .and_then(|p| tree.find(p))
                    .is_some_and(|parent| parent.is_live())
        });
        if !runnable {
            tracing::trace!(branch = %target, "Branch already joined or pruned, skipping");
            continue;
        }
        let branch = at.sibling(target);
        set_loop_variables(ctx, &branch, config, index, items.as_deref())?;
        execute_inner(ctx, &branch, config)?;
    }

    let tree = ctx.tree_mut(&at.instance)?;
    if tree.find(&at.execution).is_some_and(|e| e.has_children()) {
        tree.inactivate(&at.execution)?;
    }
    Ok(())
}

pub(super) fn leave(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let activity = ctx.current_activity(at)?;
    let at = leave_extra_scope(ctx, at, config)?;

    let tree = ctx.tree_mut(&at.instance)?;
    let instances = tree.loop_variable(&at.execution, NUMBER_OF_INSTANCES);
    if instances == 0 {
        return resolver::perform_default_outgoing(ctx, &at).map(|_| ());
    }

    let mi_execution = tree.require_parent(&at.execution)?;
    let completed = tree.loop_variable(&mi_execution, NUMBER_OF_COMPLETED_INSTANCES) + 1;
    let active = tree.loop_variable(&mi_execution, NUMBER_OF_ACTIVE_INSTANCES) - 1;
    tree.set_variable_local(
        &mi_execution,
        NUMBER_OF_COMPLETED_INSTANCES,
        VariableValue::from(completed),
    )?;
    tree.set_variable_local(
        &mi_execution,
        NUMBER_OF_ACTIVE_INSTANCES,
        VariableValue::from(active),
    )?;

    tree.inactivate(&at.execution)?;
    let joined = tree.find_inactive_concurrent_executions(&at.execution, &activity)?;

    tracing::debug!(
        activity = %activity,
        execution = %at,
        completed,
        active,
        joined = joined.len(),
        instances,
        "Parallel instance completed"
    );

    let satisfied = completion_satisfied(ctx, &at, &activity, config, &joined)?;
    if satisfied || joined.len() as i64 >= instances {
        return join(ctx, &at, &mi_execution, &activity, joined);
    }

    fold_into_parent(ctx, &at, &mi_execution, config)
}

/// Collapse the extra scope of an embedded sub-process branch into the branch
fn leave_extra_scope(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<ExecutionRef> {
    if !config.inner.needs_extra_scope() {
        return Ok(at.clone());
    }
    let tree = ctx.tree_mut(&at.instance)?;
    let scope = tree.get(&at.execution)?;
    let Some(branch) = scope.parent.clone() else {
        return Ok(at.clone());
    };
    if !scope.is_scope || !tree.get(&branch)?.is_concurrent {
        return Ok(at.clone());
    }

    let locals = scope.variables.clone();
    if tree.get(&branch)?.variables.is_empty() {
        for (name, value) in locals.iter() {
            tree.set_variable_local(&branch, name.clone(), value.clone())?;
        }
    }
    tree.remove(&at.execution)?;
    Ok(at.sibling(branch))
}

/// Fire the join: prune the remaining branches and continue with the joined ones
fn join(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    mi_execution: &ExecutionId,
    activity: &ActivityId,
    joined: Vec<ExecutionId>,
) -> ProcessResult<()> {
    let definition = ctx.definition_for(&at.instance)?;
    let (mut transitions, from_guards) = join_transitions(ctx, at, &definition, activity)?;
    if transitions.len() > 1 {
        return Err(ProcessError::AmbiguousJoin {
            activity: activity.clone(),
            count: transitions.len(),
        });
    }
    if from_guards {
        if let Some(transition) = transitions.first() {
            if let Some(substitute) =
                resolver::apply_auto_decision(ctx, at, &definition, transition)?
            {
                transitions = vec![substitute];
            }
        }
    }

    let tree = ctx.tree_mut(&at.instance)?;
    let pruned: Vec<_> = tree
        .children_of(mi_execution)?
        .into_iter()
        .filter(|child| !joined.contains(child))
        .collect();
    for branch in &pruned {
        tree.prune(branch)?;
    }
    tree.set_variable_local(mi_execution, NUMBER_OF_ACTIVE_INSTANCES, VariableValue::from(0))?;
    for branch in &pruned {
        ctx.record(
            &at.sibling(branch.clone()),
            Some(activity.clone()),
            HistoryKind::ExecutionPruned {
                reason: PRUNE_REASON.into(),
            },
        );
    }

    tracing::debug!(
        activity = %activity,
        joined = joined.len(),
        pruned = pruned.len(),
        "Parallel multi-instance joined"
    );

    if !transitions.is_empty() {
        ctx.record(
            &at.sibling(mi_execution.clone()),
            Some(activity.clone()),
            HistoryKind::ActivityEnded,
        );
    }
    resolver::take_all(ctx, at, &transitions, joined).map(|_| ())
}

/// Transitions the joined branches leave through
///
/// Same precedence as a regular leave: a forced destination on a user
/// task, then eligible guards, then the default flow. With none of those
/// every outgoing transition is taken. The flag tells whether the
/// result came from guard evaluation.
fn join_transitions(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    definition: &ProcessDefinition,
    activity_id: &ActivityId,
) -> ProcessResult<(Vec<Transition>, bool)> {
    let activity = definition.require_activity(activity_id)?;
    if let Some(transition) = resolver::user_task_override(ctx, definition, activity) {
        return Ok((vec![transition], false));
    }

    let eligible =
        resolver::eligible_transitions(ctx, at, definition, activity, OutgoingOptions::DEFAULT)?;
    if !eligible.is_empty() {
        return Ok((eligible, true));
    }

    if let Some(flow) = &activity.properties.default_flow {
        let transition = definition
            .find_outgoing(activity_id, flow)
            .cloned()
            .ok_or_else(|| ProcessError::DefaultFlowNotFound {
                activity: activity_id.clone(),
                flow: flow.clone(),
            })?;
        return Ok((vec![transition], false));
    }

    Ok((
        definition
            .outgoing_transitions(activity_id)
            .into_iter()
            .cloned()
            .collect(),
        false,
    ))
}

/// Copy a finished branch's own variables onto the multi-instance execution
fn fold_into_parent(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    mi_execution: &ExecutionId,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let index_variable = loop_index_variable(ctx.config(), config);
    let element_variable = config.collection_element_variable.as_deref();
    let tree = ctx.tree_mut(&at.instance)?;
    let locals: Vec<_> = tree
        .get(&at.execution)?
        .variables
        .iter()
        .filter(|(name, _)| {
            name.as_str() != index_variable && Some(name.as_str()) != element_variable
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for (name, value) in locals {
        tree.set_variable_local(mi_execution, name, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::signal;
    use crate::executor::run_agenda;
    use crate::testing::Harness;
    use process_types::{
        Activity, ActivityBehavior, ExecutionTree, ProcessDefinitionId, ProcessInstanceId,
    };
    use proptest::prelude::*;
    use serde_json::json;

    /// start → sign (parallel MI) → archive
    fn make_definition(
        h: &Harness,
        config: MultiInstanceConfig,
        inner: Activity,
    ) -> ProcessDefinitionId {
        let mut def = ProcessDefinition::new("signing", "Signing");
        def.add_activity(Activity::start_event("start")).unwrap();
        def.add_activity(inner.with_multi_instance(config)).unwrap();
        def.add_activity(Activity::user_task("archive")).unwrap();
        def.add_transition(Transition::new("t1", "start", "sign"))
            .unwrap();
        def.add_transition(Transition::new("t2", "sign", "archive"))
            .unwrap();
        h.deploy(def)
    }

    fn start<'h>(
        h: &'h Harness,
        def: &ProcessDefinitionId,
        vars: &[(&str, VariableValue)],
    ) -> (CommandContext<'h>, ProcessInstanceId) {
        let instance = h.instance_at(def, "start", vars);
        let mut ctx = h.context();
        ctx.schedule(ExecutionRef::root(&instance)).unwrap();
        run_agenda(&mut ctx).unwrap();
        (ctx, instance)
    }

    fn counters(tree: &ExecutionTree, execution: &ExecutionId) -> (i64, i64, i64) {
        (
            tree.loop_variable(execution, NUMBER_OF_INSTANCES),
            tree.loop_variable(execution, NUMBER_OF_ACTIVE_INSTANCES),
            tree.loop_variable(execution, NUMBER_OF_COMPLETED_INSTANCES),
        )
    }

    #[test]
    fn test_synchronous_instances_join_without_pruning() {
        let h = Harness::new();
        let def = make_definition(
            &h,
            MultiInstanceConfig::parallel().with_collection_variable("signers"),
            Activity::service_task("sign"),
        );
        let (mut ctx, instance) = start(&h, &def, &[("signers", json!(["a", "b", "c"]))]);

        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        let root = tree.root().unwrap();
        assert!(root.is_active);
        assert_eq!(root.activity, Some(ActivityId::new("archive")));
        assert_eq!(counters(tree, &root.id), (3, 0, 3));
        assert_eq!(
            h.history
                .count_where(|k| matches!(k, HistoryKind::ExecutionPruned { .. })),
            0
        );
    }

    #[test]
    fn test_early_completion_prunes_remaining_branches() {
        let h = Harness::new();
        let def = make_definition(
            &h,
            MultiInstanceConfig::parallel()
                .with_loop_cardinality("5")
                .with_completion_condition("nrOfCompletedInstances >= 2"),
            Activity::service_task("sign"),
        );
        let (mut ctx, instance) = start(&h, &def, &[]);

        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("archive")));
        let pruned = h.history.records().into_iter().filter(|r| {
            matches!(&r.kind, HistoryKind::ExecutionPruned { reason } if reason == PRUNE_REASON)
        });
        let pruned: Vec<_> = pruned.map(|r| r.execution_id).collect();
        assert_eq!(pruned.len(), 3);

        let tree = ctx.tree_mut(&instance).unwrap();
        for branch in &pruned {
            assert!(!tree.contains(branch));
            assert!(tree.prune(branch).unwrap().is_empty());
        }
    }

    #[test]
    fn test_waiting_branches_join_after_last_signal() {
        let h = Harness::new();
        let def = make_definition(
            &h,
            MultiInstanceConfig::parallel().with_loop_cardinality("3"),
            Activity::user_task("sign"),
        );
        let (mut ctx, instance) = start(&h, &def, &[]);
        let root = ExecutionRef::root(&instance);

        let tree = ctx.tree(&instance).unwrap();
        let branches = tree.children_of(&root.execution).unwrap();
        assert_eq!(branches.len(), 3);
        assert!(!tree.root().unwrap().is_active);
        for (index, branch) in branches.iter().enumerate() {
            let e = tree.get(branch).unwrap();
            assert!(e.is_concurrent && e.is_active && !e.is_scope);
            assert_eq!(tree.variable_local(branch, "loopCounter"), Some(&json!(index)));
        }

        for (done, branch) in branches.iter().enumerate() {
            ctx.tree_mut(&instance)
                .unwrap()
                .set_variable_local(branch, "approved", json!(true))
                .unwrap();
            signal(&mut ctx, &root.sibling(branch.clone()), "complete", None).unwrap();
            run_agenda(&mut ctx).unwrap();
            let tree = ctx.tree(&instance).unwrap();
            if done < 2 {
                let expected = (3, 2 - done as i64, done as i64 + 1);
                assert_eq!(counters(tree, &root.execution), expected);
                assert_eq!(tree.variable_local(&root.execution, "approved"), Some(&json!(true)));
            }
        }

        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("archive")));
        assert_eq!(
            h.history.count_where(|k| matches!(k, HistoryKind::TaskCompleted)),
            3
        );
    }

    #[test]
    fn test_completed_branch_rejects_second_completion() {
        let h = Harness::new();
        let def = make_definition(
            &h,
            MultiInstanceConfig::parallel()
                .with_loop_cardinality("3")
                .with_completion_condition("nrOfCompletedInstances >= 2"),
            Activity::user_task("sign"),
        );
        let (mut ctx, instance) = start(&h, &def, &[]);
        let root = ExecutionRef::root(&instance);
        let branches = ctx.tree(&instance).unwrap().children_of(&root.execution).unwrap();
        let first = root.sibling(branches[0].clone());

        signal(&mut ctx, &first, "complete", None).unwrap();
        run_agenda(&mut ctx).unwrap();
        let again = signal(&mut ctx, &first, "complete", None);
        assert!(matches!(again, Err(ProcessError::NotSignalable { .. })));

        // The multi-instance execution itself waits on its branches
        let parent = signal(&mut ctx, &root, "complete", None);
        assert!(matches!(parent, Err(ProcessError::NotSignalable { .. })));

        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(counters(tree, &root.execution), (3, 2, 1));
        assert_eq!(tree.children_of(&root.execution).unwrap().len(), 3);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("sign")));
        assert_eq!(
            h.history
                .count_where(|k| matches!(k, HistoryKind::ExecutionPruned { .. })),
            0
        );
    }

    #[test]
    fn test_zero_instances_leave_immediately() {
        let h = Harness::new();
        let def = make_definition(
            &h,
            MultiInstanceConfig::parallel().with_collection_variable("signers"),
            Activity::user_task("sign"),
        );
        let (mut ctx, instance) = start(&h, &def, &[("signers", json!([]))]);

        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("archive")));
        assert_eq!(
            h.history.count_where(|k| matches!(k, HistoryKind::TaskCreated)),
            1
        );
    }

    #[test]
    fn test_join_with_two_transitions_is_ambiguous() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("ambiguous", "Ambiguous");
        def.add_activity(Activity::start_event("start")).unwrap();
        def.add_activity(
            Activity::user_task("sign")
                .with_multi_instance(MultiInstanceConfig::parallel().with_loop_cardinality("2")),
        )
        .unwrap();
        def.add_activity(Activity::user_task("left")).unwrap();
        def.add_activity(Activity::user_task("right")).unwrap();
        def.add_transition(Transition::new("t1", "start", "sign"))
            .unwrap();
        def.add_transition(Transition::new("t2", "sign", "left")).unwrap();
        def.add_transition(Transition::new("t3", "sign", "right"))
            .unwrap();
        let def = h.deploy(def);
        let (mut ctx, instance) = start(&h, &def, &[]);
        let root = ExecutionRef::root(&instance);
        let branches = ctx.tree(&instance).unwrap().children_of(&root.execution).unwrap();

        signal(&mut ctx, &root.sibling(branches[0].clone()), "complete", None).unwrap();
        let before = ctx.tree(&instance).unwrap().clone();
        let result = signal(&mut ctx, &root.sibling(branches[1].clone()), "complete", None);

        assert!(matches!(
            result,
            Err(ProcessError::AmbiguousJoin { count: 2, .. })
        ));
        let after = ctx.tree(&instance).unwrap();
        assert_eq!(after.len(), before.len());
        assert!(after.contains(&branches[1]));
    }

    #[test]
    fn test_branches_carry_deal_type_and_elements() {
        let h = Harness::new();
        let def = make_definition(
            &h,
            MultiInstanceConfig::parallel()
                .with_collection_variable("signers")
                .with_element_variable("signer"),
            Activity::user_task("sign").with_deal_type("joint"),
        );
        let (mut ctx, instance) = start(&h, &def, &[("signers", json!(["ann", "bo"]))]);
        let root = ExecutionRef::root(&instance);

        let tree = ctx.tree(&instance).unwrap();
        let branches = tree.children_of(&root.execution).unwrap();
        let signers: Vec<_> = branches
            .iter()
            .map(|b| tree.variable_local(b, "signer").cloned().unwrap())
            .collect();
        assert_eq!(signers, vec![json!("ann"), json!("bo")]);
        for branch in &branches {
            assert_eq!(tree.get(branch).unwrap().business_key.as_deref(), Some("joint"));
        }
    }

    #[test]
    fn test_embedded_sub_process_gets_extra_scope() {
        let h = Harness::new();
        let mut def = ProcessDefinition::new("nested", "Nested");
        def.add_activity(Activity::start_event("start")).unwrap();
        def.add_activity(
            Activity::sub_process("review", "review-task").with_multi_instance(
                MultiInstanceConfig::parallel().with_loop_cardinality("2"),
            ),
        )
        .unwrap();
        def.add_activity(Activity::user_task("review-task").within("review"))
            .unwrap();
        def.add_activity(Activity::end_event("review-end").within("review"))
            .unwrap();
        def.add_activity(Activity::user_task("archive")).unwrap();
        def.add_transition(Transition::new("t1", "start", "review"))
            .unwrap();
        def.add_transition(Transition::new("t2", "review-task", "review-end"))
            .unwrap();
        def.add_transition(Transition::new("t3", "review", "archive"))
            .unwrap();
        let def = h.deploy(def);
        let (mut ctx, instance) = start(&h, &def, &[]);

        let tree = ctx.tree(&instance).unwrap();
        // root → 2 branches → 2 extra scopes → 2 sub-process scopes
        assert_eq!(tree.len(), 7);
        let tasks: Vec<_> = tree
            .executions_at(&ActivityId::new("review-task"))
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(tasks.len(), 2);

        for task in tasks {
            let at = ExecutionRef::new(instance.clone(), task);
            signal(&mut ctx, &at, "complete", None).unwrap();
            run_agenda(&mut ctx).unwrap();
        }

        let tree = ctx.tree(&instance).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().unwrap().activity, Some(ActivityId::new("archive")));
        assert!(tree.check_consistency().is_ok());
    }

    #[test]
    fn test_inner_behavior_kind_is_reported() {
        let config = MultiInstanceConfig::parallel().with_inner(ActivityBehavior::WaitState);
        assert_eq!(config.inner.kind_name(), "waitState");
        assert!(!config.inner.needs_extra_scope());
    }

    proptest! {
        /// Completed plus active instances always equals N until the join,
        /// and nothing is active afterwards.
        #[test]
        fn counters_balance_in_any_completion_order(
            order in (0usize..7).prop_flat_map(|n| prop::collection::vec(any::<u32>(), n)),
        ) {
            let h = Harness::new();
            let n = order.len();
            let def = make_definition(
                &h,
                MultiInstanceConfig::parallel().with_loop_cardinality(n.to_string()),
                Activity::user_task("sign"),
            );
            let (mut ctx, instance) = start(&h, &def, &[]);
            let root = ExecutionRef::root(&instance);
            let branches = ctx
                .tree(&instance)
                .unwrap()
                .children_of(&root.execution)
                .unwrap();
            prop_assert_eq!(branches.len(), n);

            let mut sequence: Vec<usize> = (0..n).collect();
            sequence.sort_by_key(|i| (order[*i], *i));

            for (done, i) in sequence.iter().enumerate() {
                signal(&mut ctx, &root.sibling(branches[*i].clone()), "complete", None).unwrap();
                run_agenda(&mut ctx).unwrap();
                let tree = ctx.tree(&instance).unwrap();
                let (total, active, completed) = counters(tree, &root.execution);
                prop_assert_eq!(total, n as i64);
                if done + 1 < n {
                    prop_assert_eq!(completed + active, n as i64);
                    prop_assert_eq!(completed, done as i64 + 1);
                } else {
                    prop_assert_eq!(active, 0);
                    prop_assert_eq!(tree.len(), 1);
                }
            }

            let tree = ctx.tree(&instance).unwrap();
            let archive = Some(ActivityId::new("archive"));
            prop_assert_eq!(tree.root().unwrap().activity.clone(), archive);
        }
    }
}
