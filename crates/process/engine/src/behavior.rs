//! Activity behaviors: what happens when an execution reaches an activity
//!
//! Behaviors are a closed set of variants ([`ActivityBehavior`]). This
//! module dispatches on the variant for the three behavior operations:
//! [`execute`], [`signal`] and [`leave`]. Multi-instance variants are
//! delegated to [`crate::multi_instance`].

use crate::context::{CommandContext, ExecutionRef};
use crate::events::ProcessEventKind;
use crate::history::HistoryKind;
use crate::multi_instance;
use crate::resolver::{self, OutgoingOptions};
use process_types::{
    ActivityBehavior, ActivityId, CallActivityConfig, DataAssociation, ExecutionTree,
    ProcessError, ProcessInstanceId, ProcessResult, SuperExecution, VariableMap, VariableValue,
    COMPENSATION_DONE,
};

// ── Execute ──────────────────────────────────────────────────────────

/// Run a behavior for the execution's current activity
pub fn execute(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    behavior: &ActivityBehavior,
) -> ProcessResult<()> {
    match behavior {
        ActivityBehavior::Passthrough => leave(ctx, at),
        ActivityBehavior::WaitState | ActivityBehavior::IntermediateCatch => {
            let activity = ctx.current_activity(at)?;
            ctx.record(at, Some(activity.clone()), HistoryKind::TaskCreated);
            tracing::debug!(activity = %activity, execution = %at, "Waiting for signal");
            Ok(())
        }
        ActivityBehavior::NoneEnd => end_execution(ctx, at),
        ActivityBehavior::ExclusiveGateway => exclusive_gateway(ctx, at),
        ActivityBehavior::ParallelGateway => parallel_gateway(ctx, at),
        ActivityBehavior::InclusiveGateway => {
            resolver::resolve_outgoing(ctx, at, OutgoingOptions::INCLUSIVE, None).map(|_| ())
        }
        ActivityBehavior::SubProcess { initial } => enter_sub_process(ctx, at, initial),
        ActivityBehavior::CallActivity(config) => call_activity(ctx, at, config),
        ActivityBehavior::MultiInstance(config) => multi_instance::execute(ctx, at, config),
    }
}

/// Leave the execution's current activity
///
/// Multi-instance activities run their join protocol; everything else
/// follows its outgoing transitions.
pub fn leave(ctx: &mut CommandContext<'_>, at: &ExecutionRef) -> ProcessResult<()> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity = ctx.current_activity(at)?;
    match ctx.effective_behavior(&at.instance, &definition, &activity)? {
        ActivityBehavior::MultiInstance(config) => multi_instance::leave(ctx, at, &config),
        _ => resolver::perform_default_outgoing(ctx, at).map(|_| ()),
    }
}

fn exclusive_gateway(ctx: &mut CommandContext<'_>, at: &ExecutionRef) -> ProcessResult<()> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity_id = ctx.current_activity(at)?;
    let activity = definition.require_activity(&activity_id)?;
    let variables = ctx.tree(&at.instance)?.visible_variables(&at.execution);
    let evaluator = &ctx.collaborators().evaluator;
    let default_flow = activity.properties.default_flow.as_ref();

    let mut chosen = None;
    for transition in definition.outgoing_transitions(&activity_id) {
        if Some(&transition.id) == default_flow {
            continue;
        }
        let passes = match &transition.guard {
            None => true,
            Some(guard) => evaluator.evaluate_condition(&activity_id, guard, &variables)?,
        };
        if passes {
            chosen = Some(transition.clone());
            break;
        }
    }

    let transition = match (chosen, default_flow) {
        (Some(transition), _) => transition,
        (None, Some(flow)) => definition
            .find_outgoing(&activity_id, flow)
            .cloned()
            .ok_or_else(|| ProcessError::DefaultFlowNotFound {
                activity: activity_id.clone(),
                flow: flow.clone(),
            })?,
        (None, None) => return Err(ProcessError::StuckExecution(activity_id)),
    };
    tracing::debug!(
        gateway = %activity_id,
        transition = %transition.id,
        "Exclusive gateway selected transition"
    );
    resolver::take(ctx, at, &transition, true)
}

fn parallel_gateway(ctx: &mut CommandContext<'_>, at: &ExecutionRef) -> ProcessResult<()> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity_id = ctx.current_activity(at)?;

    let tree = ctx.tree_mut(&at.instance)?;
    tree.inactivate(&at.execution)?;
    let joined = tree.find_inactive_concurrent_executions(&at.execution, &activity_id)?;
    let expected = definition.incoming_transitions(&activity_id).len().max(1);

    if joined.len() < expected {
        tracing::debug!(
            gateway = %activity_id,
            joined = joined.len(),
            expected,
            "Parallel gateway waiting for branches"
        );
        return Ok(());
    }

    tracing::debug!(gateway = %activity_id, joined = joined.len(), "Parallel gateway fired");
    let outgoing: Vec<_> = definition
        .outgoing_transitions(&activity_id)
        .into_iter()
        .cloned()
        .collect();
    resolver::take_all(ctx, at, &outgoing, joined).map(|_| ())
}

fn enter_sub_process(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    initial: &ActivityId,
) -> ProcessResult<()> {
    let tree = ctx.tree_mut(&at.instance)?;
    let child = tree.create_scope_child(&at.execution)?;
    tree.set_activity(&child, initial.clone())?;
    tree.inactivate(&at.execution)?;
    tracing::debug!(execution = %at, initial = %initial, "Entering embedded sub-process");
    ctx.schedule(at.sibling(child))
}

// ── Signal ───────────────────────────────────────────────────────────

/// Deliver a signal to the behavior of the execution's current activity
///
/// An inactive execution has already left its activity or is waiting on
/// children, so it only accepts `compensationDone`.
pub fn signal(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    signal_name: &str,
    signal_data: Option<VariableValue>,
) -> ProcessResult<()> {
    let activity = ctx.current_activity(at)?;
    let waiting = ctx.tree(&at.instance)?.get(&at.execution)?.is_active;
    if !waiting && signal_name != COMPENSATION_DONE {
        tracing::debug!(
            activity = %activity,
            execution = %at,
            signal = signal_name,
            "Signal rejected, execution is not waiting"
        );
        return Err(ProcessError::NotSignalable {
            activity,
            signal: signal_name.to_string(),
        });
    }
    ctx.dispatch(
        at,
        ProcessEventKind::ActivitySignaled {
            activity_id: activity.clone(),
            signal_name: signal_name.to_string(),
            signal_data,
        },
    );

    if signal_name == COMPENSATION_DONE {
        let execution = ctx.tree(&at.instance)?.get(&at.execution)?;
        if execution.is_active || execution.has_children() {
            return Ok(());
        }
        ctx.tree_mut(&at.instance)?.set_active(&at.execution, true)?;
        return leave(ctx, at);
    }

    let definition = ctx.definition_for(&at.instance)?;
    let behavior = ctx.effective_behavior(&at.instance, &definition, &activity)?;
    signal_behavior(ctx, at, &activity, &behavior, signal_name)
}

fn signal_behavior(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    activity: &ActivityId,
    behavior: &ActivityBehavior,
    signal_name: &str,
) -> ProcessResult<()> {
    match behavior {
        ActivityBehavior::WaitState | ActivityBehavior::IntermediateCatch => {
            ctx.record(at, Some(activity.clone()), HistoryKind::TaskCompleted);
            leave(ctx, at)
        }
        ActivityBehavior::MultiInstance(config) => {
            signal_behavior(ctx, at, activity, &config.inner, signal_name)
        }
        _ => Err(ProcessError::NotSignalable {
            activity: activity.clone(),
            signal: signal_name.to_string(),
        }),
    }
}

// ── Ending ───────────────────────────────────────────────────────────

/// End an execution that has no continuation
///
/// A child is removed; when it was the last child, its parent ends or
/// resumes in turn. Ending the root completes the process instance.
pub fn end_execution(ctx: &mut CommandContext<'_>, at: &ExecutionRef) -> ProcessResult<()> {
    let tree = ctx.tree(&at.instance)?;
    let activity = tree.get(&at.execution)?.activity.clone();
    let parent = tree.parent_of(&at.execution)?;
    ctx.record(at, activity, HistoryKind::ActivityEnded);

    let Some(parent) = parent else {
        return end_instance(ctx, &at.instance);
    };
    let tree = ctx.tree_mut(&at.instance)?;
    tree.remove(&at.execution)?;
    if tree.get(&parent)?.has_children() {
        return Ok(());
    }
    after_children_ended(ctx, &at.sibling(parent))
}

/// A scope whose last child ended either resumes or ends
fn after_children_ended(ctx: &mut CommandContext<'_>, at: &ExecutionRef) -> ProcessResult<()> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity = ctx.current_activity(at)?;
    let resumes = match ctx.effective_behavior(&at.instance, &definition, &activity)? {
        ActivityBehavior::SubProcess { .. } => true,
        ActivityBehavior::MultiInstance(config) => config.inner.needs_extra_scope(),
        _ => false,
    };

    if resumes {
        tracing::debug!(activity = %activity, execution = %at, "Sub-process completed");
        ctx.tree_mut(&at.instance)?.set_active(&at.execution, true)?;
        leave(ctx, at)
    } else {
        end_execution(ctx, at)
    }
}

/// Complete a process instance and resume its caller, if any
pub(crate) fn end_instance(
    ctx: &mut CommandContext<'_>,
    instance: &ProcessInstanceId,
) -> ProcessResult<()> {
    let tree = ctx.tree_mut(instance)?;
    let root = tree.root_id();
    for child in tree.children_of(&root)? {
        tree.remove(&child)?;
    }
    tree.end(&root)?;
    let super_execution = tree.super_execution.clone();

    let at = ExecutionRef::root(instance);
    ctx.record(&at, None, HistoryKind::ProcessEnded);
    ctx.dispatch(&at, ProcessEventKind::ProcessCompleted);
    tracing::info!(instance_id = %instance, "Process instance completed");

    match super_execution {
        Some(caller) => resume_super(ctx, instance, &caller),
        None => Ok(()),
    }
}

// ── Call activity ────────────────────────────────────────────────────

/// Register a new process instance with this command and queue its root
pub(crate) fn start_instance(
    ctx: &mut CommandContext<'_>,
    tree: ExecutionTree,
) -> ProcessResult<()> {
    let at = ExecutionRef::root(&tree.process_instance_id);
    tracing::info!(
        instance_id = %at.instance,
        definition_id = %tree.process_definition_id,
        business_key = ?tree.business_key,
        "Process instance started"
    );
    ctx.insert_tree(tree);
    ctx.record(&at, None, HistoryKind::ProcessStarted);
    ctx.schedule(at)
}

fn call_activity(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &CallActivityConfig,
) -> ProcessResult<()> {
    let caller = ctx.tree(&at.instance)?;
    let caller_variables = caller.visible_variables(&at.execution);
    let business_key = caller.business_key.clone();
    let evaluator = &ctx.collaborators().evaluator;

    let key = match (&config.called_element, &config.called_element_expression) {
        (Some(key), _) => key.clone(),
        (None, Some(expression)) => match evaluator.evaluate(expression, &caller_variables)? {
            VariableValue::String(key) => key,
            other => {
                return Err(ProcessError::Expression {
                    expression: expression.clone(),
                    reason: format!("expected a process key, got {}", other),
                })
            }
        },
        (None, None) => {
            return Err(ProcessError::Validation(
                "call activity names no called element".into(),
            ))
        }
    };

    let definition = ctx.latest_definition(&key)?;
    if definition.suspended {
        return Err(ProcessError::DefinitionSuspended(definition.id.clone()));
    }

    let mut sub = ExecutionTree::new(definition.id.clone(), definition.initial.clone())
        .with_super_execution(SuperExecution {
            process_instance_id: at.instance.clone(),
            execution_id: at.execution.clone(),
        });
    if let Some(business_key) = business_key {
        sub = sub.with_business_key(business_key);
    }
    let sub_root = sub.root_id();
    if config.inherit_variables {
        for (name, value) in &caller_variables {
            sub.set_variable_local(&sub_root, name.clone(), value.clone())?;
        }
    }
    for input in &config.inputs {
        if let Some(value) = association_value(ctx, input, &caller_variables)? {
            sub.set_variable_local(&sub_root, input.target.clone(), value)?;
        }
    }

    let sub_instance = sub.process_instance_id.clone();
    ctx.tree_mut(&at.instance)?
        .get_mut(&at.execution)?
        .sub_process_instance = Some(sub_instance.clone());
    tracing::debug!(
        execution = %at,
        called = %key,
        sub_instance = %sub_instance,
        "Calling sub process"
    );
    start_instance(ctx, sub)
}

/// Copy outputs of a completed sub instance back and leave the call activity
fn resume_super(
    ctx: &mut CommandContext<'_>,
    sub_instance: &ProcessInstanceId,
    caller: &SuperExecution,
) -> ProcessResult<()> {
    let at = ExecutionRef::new(caller.process_instance_id.clone(), caller.execution_id.clone());
    let definition = ctx.definition_for(&at.instance)?;
    let activity = ctx.current_activity(&at)?;
    let config = match ctx.effective_behavior(&at.instance, &definition, &activity)? {
        ActivityBehavior::CallActivity(config) => config,
        ActivityBehavior::MultiInstance(mi) => match *mi.inner {
            ActivityBehavior::CallActivity(config) => config,
            _ => return Err(not_a_call_activity(&activity)),
        },
        _ => return Err(not_a_call_activity(&activity)),
    };

    let sub_tree = ctx.tree(sub_instance)?;
    let sub_variables = sub_tree.visible_variables(&sub_tree.root_id());
    for output in &config.outputs {
        if let Some(value) = association_value(ctx, output, &sub_variables)? {
            ctx.tree_mut(&at.instance)?
                .set_variable(&at.execution, output.target.clone(), value)?;
        }
    }

    ctx.tree_mut(&at.instance)?
        .get_mut(&at.execution)?
        .sub_process_instance = None;
    ctx.record(&at, Some(activity.clone()), HistoryKind::TaskCompleted);
    tracing::debug!(
        execution = %at,
        activity = %activity,
        sub_instance = %sub_instance,
        "Sub process returned"
    );
    leave(ctx, &at)
}

fn not_a_call_activity(activity: &ActivityId) -> ProcessError {
    ProcessError::TreeConsistency(format!(
        "super execution at '{}' is not waiting in a call activity",
        activity
    ))
}

/// The value a data association carries, if its source is set
fn association_value(
    ctx: &CommandContext<'_>,
    association: &DataAssociation,
    variables: &VariableMap,
) -> ProcessResult<Option<VariableValue>> {
    if let Some(source) = &association.source {
        return Ok(variables.get(source).cloned());
    }
    match &association.source_expression {
        Some(expression) => ctx
            .collaborators()
            .evaluator
            .evaluate(expression, variables)
            .map(Some),
        None => Ok(None),
    }
}
