//! Policy collaborators: automatic decisions and completion conditions
//!
//! Policies do NOT mutate the execution tree. They return decisions
//! and the core is responsible for acting on them.

use crate::expression::ExpressionEvaluator;
use process_types::{
    ActivityId, ActivityType, CollaboratorError, EngineConfig, ExecutionId, ProcessDefinition,
    ProcessResult, VariableMap, VariableValue,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Auto-decision ────────────────────────────────────────────────────

/// Input to an [`AutoDecisionPolicy`]
#[derive(Clone, Copy, Debug)]
pub struct AutoDecisionRequest<'a> {
    pub definition: &'a ProcessDefinition,
    pub execution: &'a ExecutionId,
    pub variables: &'a VariableMap,
    /// The destination chosen by guard evaluation
    pub next_activity: &'a ActivityId,
    pub config: &'a EngineConfig,
}

/// A substituted destination
#[derive(Clone, Debug, PartialEq)]
pub struct AutoDecision {
    pub destination: ActivityId,
    /// Tasks skipped on the way to the destination
    pub passed: Vec<ActivityId>,
    /// Variables to write on the process instance
    pub variables: VariableMap,
}

/// May replace the destination of a guard-selected transition
pub trait AutoDecisionPolicy: Send + Sync {
    /// `Ok(None)` keeps the original destination
    fn decide(
        &self,
        request: &AutoDecisionRequest<'_>,
    ) -> Result<Option<AutoDecision>, CollaboratorError>;
}

/// How the auditor of a task behaves
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AuditorStrategy {
    /// A person decides
    Manual,
    /// The task approves itself and the process moves past it
    AutoPass,
    /// The task rejects itself and the process jumps to a terminal activity
    AutoReject { terminal: ActivityId },
}

/// Auto-decision driven by a per-activity [`AuditorStrategy`] table
///
/// Auto-passes chain along single-successor paths. The chain is bounded
/// by `EngineConfig::max_auto_decision_steps` and revisiting an activity
/// is reported as a cycle.
#[derive(Clone, Debug, Default)]
pub struct StrategyAutoDecision {
    strategies: BTreeMap<ActivityId, AuditorStrategy>,
}

impl StrategyAutoDecision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, activity: impl Into<String>, strategy: AuditorStrategy) -> Self {
        self.strategies
            .insert(ActivityId::new(activity), strategy);
        self
    }

    fn strategy_for(&self, activity: &ActivityId) -> &AuditorStrategy {
        self.strategies
            .get(activity)
            .unwrap_or(&AuditorStrategy::Manual)
    }
}

impl AutoDecisionPolicy for StrategyAutoDecision {
    fn decide(
        &self,
        request: &AutoDecisionRequest<'_>,
    ) -> Result<Option<AutoDecision>, CollaboratorError> {
        let config = request.config;
        let mut current = request.next_activity.clone();
        let mut passed = Vec::new();
        let mut variables = VariableMap::new();
        let mut visited = BTreeSet::from([current.clone()]);

        loop {
            match self.strategy_for(&current) {
                AuditorStrategy::Manual => break,
                AuditorStrategy::AutoReject { terminal } => {
                    variables.insert(
                        config.auto_reject_variable.clone(),
                        VariableValue::String("true".into()),
                    );
                    variables.insert(
                        config.audit_result_variable.clone(),
                        VariableValue::Bool(false),
                    );
                    passed.push(current);
                    current = terminal.clone();
                    break;
                }
                AuditorStrategy::AutoPass => {
                    if passed.len() >= config.max_auto_decision_steps {
                        return Err(CollaboratorError::new(
                            "auto-decision",
                            format!(
                                "more than {} automatic decisions chained from '{}'",
                                config.max_auto_decision_steps, request.next_activity
                            ),
                        ));
                    }
                    let outgoing = request.definition.outgoing_transitions(&current);
                    let [only] = outgoing.as_slice() else {
                        // Branching paths need a person to choose
                        break;
                    };
                    passed.push(current);
                    current = only.destination.clone();
                    if !visited.insert(current.clone()) {
                        return Err(CollaboratorError::new(
                            "auto-decision",
                            format!("automatic decisions cycle through '{}'", current),
                        ));
                    }
                    let reached_end = request
                        .definition
                        .activity(&current)
                        .is_some_and(|a| a.activity_type == ActivityType::EndEvent);
                    if reached_end {
                        variables.insert(
                            config.audit_result_variable.clone(),
                            VariableValue::Bool(true),
                        );
                        break;
                    }
                }
            }
        }

        if passed.is_empty() {
            return Ok(None);
        }
        Ok(Some(AutoDecision {
            destination: current,
            passed,
            variables,
        }))
    }
}

// ── Completion condition ─────────────────────────────────────────────

/// A branch waiting at a multi-instance join
#[derive(Clone, Debug, PartialEq)]
pub struct JoinedBranch {
    pub execution: ExecutionId,
    pub variables: VariableMap,
}

/// State a completion condition is judged against
#[derive(Clone, Debug)]
pub struct CompletionScope<'a> {
    pub activity: &'a ActivityId,
    /// The execution that just completed an instance
    pub execution: &'a ExecutionId,
    /// Variables visible from that execution, counters included
    pub variables: VariableMap,
    pub joined: Vec<JoinedBranch>,
}

/// Decides whether a multi-instance activity may complete early
pub trait CompletionConditionPolicy: Send + Sync {
    fn satisfied(
        &self,
        condition: Option<&str>,
        scope: &CompletionScope<'_>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> ProcessResult<bool>;
}

/// Evaluates the activity's completion condition expression
///
/// No condition means never complete early.
#[derive(Clone, Debug, Default)]
pub struct ExpressionCompletionCondition;

impl CompletionConditionPolicy for ExpressionCompletionCondition {
    fn satisfied(
        &self,
        condition: Option<&str>,
        scope: &CompletionScope<'_>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> ProcessResult<bool> {
        match condition {
            None => Ok(false),
            Some(expression) => {
                evaluator.evaluate_condition(scope.activity, expression, &scope.variables)
            }
        }
    }
}
