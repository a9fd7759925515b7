//! Multi-instance engine
//!
//! Repeats an inner behavior over a cardinality `N`, resolved once per
//! entry from exactly one source in precedence order: loop cardinality,
//! collection expression, collection variable.
//!
//! The shared counters (`nrOfInstances`, `nrOfActiveInstances`,
//! `nrOfCompletedInstances`) are written when instances are created and
//! afterwards only by the `leave` protocol of each mode.

mod parallel;
mod sequential;

use crate::behavior;
use crate::context::{CommandContext, ExecutionRef};
use crate::policy::{CompletionScope, JoinedBranch};
use process_types::{
    as_i64, ActivityId, EngineConfig, ExecutionId, ExecutionTree, MultiInstanceConfig,
    MultiInstanceMode, ProcessError, ProcessResult, VariableValue, NUMBER_OF_ACTIVE_INSTANCES,
    NUMBER_OF_COMPLETED_INSTANCES, NUMBER_OF_INSTANCES,
};

/// Enter a multi-instance activity
///
/// The first entry creates the instances. An execution that already
/// carries a loop index is resuming an iteration and runs the inner
/// behavior directly.
pub fn execute(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let index_variable = loop_index_variable(ctx.config(), config);
    let resuming = ctx
        .tree(&at.instance)?
        .variable_local(&at.execution, index_variable)
        .is_some();
    if resuming {
        return execute_inner(ctx, at, config);
    }
    match config.mode {
        MultiInstanceMode::Parallel => parallel::create_instances(ctx, at, config),
        MultiInstanceMode::Sequential => sequential::create_instances(ctx, at, config),
    }
}

/// Complete one instance of a multi-instance activity
pub fn leave(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    match config.mode {
        MultiInstanceMode::Parallel => parallel::leave(ctx, at, config),
        MultiInstanceMode::Sequential => sequential::leave(ctx, at, config),
    }
}

// ── Shared helpers ───────────────────────────────────────────────────

/// Name of the loop index variable for this activity
pub(crate) fn loop_index_variable<'c>(
    engine: &'c EngineConfig,
    config: &'c MultiInstanceConfig,
) -> &'c str {
    config
        .element_index_variable
        .as_deref()
        .unwrap_or(&engine.loop_counter_variable)
}

/// Resolve the number of instances
pub(crate) fn resolve_cardinality(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    activity: &ActivityId,
    config: &MultiInstanceConfig,
) -> ProcessResult<usize> {
    let cardinality = match &config.loop_cardinality {
        Some(expression) => {
            let variables = ctx.tree(&at.instance)?.visible_variables(&at.execution);
            let value = ctx.collaborators().evaluator.evaluate(expression, &variables)?;
            as_i64(&value).ok_or_else(|| ProcessError::CardinalityResolution {
                activity: activity.clone(),
                reason: format!("loop cardinality must resolve to an integer, got {}", value),
            })?
        }
        None => resolve_collection(ctx, at, activity, config)?.len() as i64,
    };

    if cardinality < 0 {
        return Err(ProcessError::CardinalityResolution {
            activity: activity.clone(),
            reason: format!(
                "number of instances must be a non-negative integer, but was {}",
                cardinality
            ),
        });
    }
    Ok(cardinality as usize)
}

fn resolve_collection(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    activity: &ActivityId,
    config: &MultiInstanceConfig,
) -> ProcessResult<Vec<VariableValue>> {
    let variables = ctx.tree(&at.instance)?.visible_variables(&at.execution);
    let value = if let Some(expression) = &config.collection_expression {
        ctx.collaborators().evaluator.evaluate(expression, &variables)?
    } else if let Some(name) = &config.collection_variable {
        variables
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::CardinalityResolution {
                activity: activity.clone(),
                reason: format!("Variable {} is not found", name),
            })?
    } else {
        return Err(ProcessError::CardinalityResolution {
            activity: activity.clone(),
            reason: "Couldn't resolve collection expression nor variable reference".into(),
        });
    };

    match value {
        VariableValue::Array(items) => Ok(items),
        other => Err(ProcessError::CardinalityResolution {
            activity: activity.clone(),
            reason: format!("collection must resolve to a list, got {}", other),
        }),
    }
}

/// Collection items handed to iterations, when an element variable is configured
pub(crate) fn collection_items(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    activity: &ActivityId,
    config: &MultiInstanceConfig,
) -> ProcessResult<Option<Vec<VariableValue>>> {
    if !config.uses_collection() || config.collection_element_variable.is_none() {
        return Ok(None);
    }
    resolve_collection(ctx, at, activity, config).map(Some)
}

/// Write the loop index and, for collections, the current element
pub(crate) fn set_loop_variables(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
    index: usize,
    items: Option<&[VariableValue]>,
) -> ProcessResult<()> {
    let index_variable = loop_index_variable(ctx.config(), config);
    let tree = ctx.tree_mut(&at.instance)?;
    tree.set_variable_local(&at.execution, index_variable, VariableValue::from(index as i64))?;
    if let (Some(name), Some(element)) = (
        &config.collection_element_variable,
        items.and_then(|items| items.get(index)),
    ) {
        tree.set_variable_local(&at.execution, name.clone(), element.clone())?;
    }
    Ok(())
}

pub(crate) fn set_counters(
    tree: &mut ExecutionTree,
    execution: &ExecutionId,
    instances: i64,
    active: i64,
    completed: i64,
) -> ProcessResult<()> {
    tree.set_variable_local(execution, NUMBER_OF_INSTANCES, VariableValue::from(instances))?;
    tree.set_variable_local(execution, NUMBER_OF_ACTIVE_INSTANCES, VariableValue::from(active))?;
    tree.set_variable_local(
        execution,
        NUMBER_OF_COMPLETED_INSTANCES,
        VariableValue::from(completed),
    )
}

/// Run the inner behavior for one instance
///
/// Sequential iterations report checked failures against the inner
/// behavior; every other error passes through unchanged so business
/// faults stay catchable upstream.
pub(crate) fn execute_inner(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let activity = ctx.current_activity(at)?;
    match behavior::execute(ctx, at, &config.inner) {
        Err(e) if config.mode == MultiInstanceMode::Sequential && e.is_checked() => {
            Err(ProcessError::InnerBehavior {
                activity,
                behavior: config.inner.kind_name().to_string(),
                message: e.to_string(),
            })
        }
        result => result,
    }
}

/// Ask the completion-condition policy whether the activity may complete
pub(crate) fn completion_satisfied(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    activity: &ActivityId,
    config: &MultiInstanceConfig,
    joined: &[ExecutionId],
) -> ProcessResult<bool> {
    let tree = ctx.tree(&at.instance)?;
    let variables = tree.visible_variables(&at.execution);
    let joined = joined
        .iter()
        .map(|id| JoinedBranch {
            execution: id.clone(),
            variables: tree.visible_variables(id),
        })
        .collect();
    let scope = CompletionScope {
        activity,
        execution: &at.execution,
        variables,
        joined,
    };

    let collaborators = ctx.collaborators();
    collaborators.completion.satisfied(
        config.completion_condition.as_deref(),
        &scope,
        collaborators.evaluator.as_ref(),
    )
}
