//! Atomic step executor: one behavior invocation per scheduled execution
//!
//! Each step offers the behavior override hook a chance to replace the
//! bound behavior, announces the activity, then runs its behavior.
//! Checked failures come back wrapped with the activity they broke in.

use crate::behavior;
use crate::context::{CommandContext, ExecutionRef};
use crate::events::ProcessEventKind;
use crate::history::HistoryKind;
use crate::override_hook::OverrideRequest;
use process_types::{Activity, ProcessDefinition, ProcessError, ProcessResult};

/// Run the behavior of the activity an execution currently sits at
pub fn execute_current_activity(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
) -> ProcessResult<()> {
    let definition = ctx.definition_for(&at.instance)?;
    let activity_id = ctx.current_activity(at)?;
    let activity = definition.require_activity(&activity_id)?;

    if !activity.activity_type.is_start_or_end_event() {
        apply_behavior_override(ctx, at, &definition, activity)?;
    }

    let behavior = ctx.effective_behavior(&at.instance, &definition, &activity_id)?;
    ctx.record(at, Some(activity_id.clone()), HistoryKind::ActivityStarted);
    ctx.dispatch(
        at,
        ProcessEventKind::ActivityStarted {
            activity_id: activity_id.clone(),
            activity_name: Some(activity.name.clone()).filter(|n| !n.is_empty()),
            activity_type: activity.activity_type.as_str().to_string(),
            behavior: behavior.kind_name().to_string(),
        },
    );
    tracing::debug!(
        activity = %activity_id,
        execution = %at,
        behavior = behavior.kind_name(),
        "Executing activity"
    );

    behavior::execute(ctx, at, &behavior).map_err(|e| {
        if e.is_checked() {
            ProcessError::ActivityExecution {
                activity_id: activity_id.clone(),
                activity_type: activity.activity_type.as_str().to_string(),
                message: e.to_string(),
            }
        } else {
            e
        }
    })
}

/// Consult the override hook and store its answer as an instance overlay
///
/// A failing hook is logged and the step runs with the behavior already
/// in effect.
fn apply_behavior_override(
    ctx: &mut CommandContext<'_>,
    at: &ExecutionRef,
    definition: &ProcessDefinition,
    activity: &Activity,
) -> ProcessResult<()> {
    let Some(hook) = &ctx.collaborators().behavior_override else {
        return Ok(());
    };
    let request = OverrideRequest {
        definition,
        activity,
        execution: &at.execution,
    };
    match hook.resolve(&request) {
        Ok(Some(overlay)) => {
            tracing::debug!(
                activity = %activity.id,
                execution = %at,
                deal_type = ?overlay.deal_type,
                replaces_behavior = overlay.behavior.is_some(),
                "Behavior override applied"
            );
            ctx.tree_mut(&at.instance)?
                .set_overlay(activity.id.clone(), overlay);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(
                activity = %activity.id,
                execution = %at,
                error = %e,
                "Behavior override hook failed, keeping bound behavior"
            );
        }
    }
    Ok(())
}

/// Drain the command's agenda, one atomic step at a time
pub fn run_agenda(ctx: &mut CommandContext<'_>) -> ProcessResult<()> {
    let mut steps = 0usize;
    while let Some(at) = ctx.next_runnable()? {
        execute_current_activity(ctx, &at)?;
        steps += 1;
    }
    tracing::trace!(steps, "Agenda drained");
    Ok(())
}
