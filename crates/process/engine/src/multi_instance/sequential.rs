//! Sequential multi-instance: iterations on the same execution
//!
//! Each completed iteration either finishes the activity or queues the
//! execution for the next one on the command's agenda. Iterations never
//! nest on the call stack and their count is bounded by `N`.

use super::{
    collection_items, completion_satisfied, execute_inner, loop_index_variable,
    resolve_cardinality, set_counters, set_loop_variables,
};
use crate::context::{CommandContext, ExecutionRef};
use crate::resolver;
use process_types::{
    MultiInstanceConfig, ProcessResult, VariableValue, NUMBER_OF_COMPLETED_INSTANCES,
    NUMBER_OF_INSTANCES,
};

pub(super) fn create_instances(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let activity = ctx.current_activity(at)?;
    let instances = resolve_cardinality(ctx, at, &activity, config)?;
    set_counters(ctx.tree_mut(&at.instance)?, &at.execution, instances as i64, 1, 0)?;

    if instances == 0 {
        tracing::debug!(activity = %activity, execution = %at, "No iterations to run, leaving");
        return resolver::perform_default_outgoing(ctx, at).map(|_| ());
    }

    tracing::debug!(
        activity = %activity,
        execution = %at,
        instances,
        "Starting sequential iterations"
    );
    let items = collection_items(ctx, at, &activity, config)?;
    set_loop_variables(ctx, at, config, 0, items.as_deref())?;
    execute_inner(ctx, at, config)
}

pub(super) fn leave(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    config: &MultiInstanceConfig,
) -> ProcessResult<()> {
    let activity = ctx.current_activity(at)?;
    let index_variable = loop_index_variable(ctx.config(), config);

    let tree = ctx.tree_mut(&at.instance)?;
    let instances = tree.loop_variable(&at.execution, NUMBER_OF_INSTANCES);
    if instances == 0 {
        return resolver::perform_default_outgoing(ctx, at).map(|_| ());
    }

    let index = tree.loop_variable(&at.execution, index_variable) + 1;
    let completed = tree.loop_variable(&at.execution, NUMBER_OF_COMPLETED_INSTANCES) + 1;
    tree.set_variable_local(&at.execution, index_variable, VariableValue::from(index))?;
    tree.set_variable_local(
        &at.execution,
        NUMBER_OF_COMPLETED_INSTANCES,
        VariableValue::from(completed),
    )?;

    let satisfied = completion_satisfied(ctx, at, &activity, config, &[])?;
    if satisfied || index >= instances {
        tracing::debug!(
            activity = %activity,
            execution = %at,
            completed,
            early = satisfied,
            "Sequential multi-instance completed"
        );
        let tree = ctx.tree_mut(&at.instance)?;
        tree.remove_variable_local(&at.execution, index_variable)?;
        if let Some(element) = &config.collection_element_variable {
            tree.remove_variable_local(&at.execution, element)?;
        }
        return resolver::perform_default_outgoing(ctx, at).map(|_| ());
    }

    tracing::debug!(activity = %activity, execution = %at, index, "Next iteration");
    let items = collection_items(ctx, at, &activity, config)?;
    set_loop_variables(ctx, at, config, index as usize, items.as_deref())?;
    ctx.schedule(at.clone())
}
