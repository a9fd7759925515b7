//! Process orchestration runtime
//!
//! Drives BPMN-style process instances over an arena
//! [`ExecutionTree`](process_types::ExecutionTree). Every command runs
//! atomic steps off an agenda until each execution rests in a wait state
//! or the instance completes, then commits the touched trees in one go.
//!
//! # Architecture
//!
//! The [`ProcessEngine`] composes specialized components:
//!
//! - [`executor`]: Atomic step executor, consults the [`BehaviorOverrideHook`]
//! - [`behavior`]: Execute, signal and leave for every activity behavior
//! - [`resolver`]: Transition resolution, forks and joins
//! - [`multi_instance`]: Parallel and sequential multi-instance loops
//! - [`ProcessRepository`]: Deployed definitions and persisted trees
//!
//! Everything the core consults but does not own (guard evaluation,
//! auto-decision, completion conditions, history, events) is handed in
//! through [`Collaborators`].
//!
//! # Example
//!
//! ```rust
//! use process_engine::{CommandRouting, ProcessEngine};
//! use process_types::*;
//!
//! let engine = ProcessEngine::in_memory();
//!
//! let mut def = ProcessDefinition::new("review", "Document Review");
//! def.add_activity(Activity::start_event("start")).unwrap();
//! def.add_activity(Activity::user_task("review")).unwrap();
//! def.add_activity(Activity::end_event("end")).unwrap();
//! def.add_transition(Transition::new("t1", "start", "review")).unwrap();
//! def.add_transition(Transition::new("t2", "review", "end")).unwrap();
//! engine.deploy(def).unwrap();
//!
//! let instance = engine
//!     .start_process_instance_by_key("review", VariableMap::new(), None)
//!     .unwrap();
//! let root = engine.instance(&instance).unwrap().root_id();
//! engine
//!     .complete_task(&instance, &root, VariableMap::new(), &CommandRouting::none())
//!     .unwrap();
//!
//! assert!(engine.instance(&instance).unwrap().is_ended());
//! ```

#![deny(unsafe_code)]

pub mod behavior;
pub mod collaborators;
pub mod context;
pub mod engine;
pub mod events;
pub mod executor;
pub mod expression;
pub mod history;
pub mod multi_instance;
pub mod override_hook;
pub mod policy;
pub mod repository;
pub mod resolver;
pub mod routing;
pub mod telemetry;

#[cfg(test)]
mod testing;

// Re-export main types
pub use collaborators::Collaborators;
pub use context::{CommandContext, ExecutionRef};
pub use engine::{ProcessEngine, COMPLETE_SIGNAL};
pub use events::{EventDispatcher, ProcessEvent, ProcessEventKind, RecordingEventDispatcher};
pub use executor::{execute_current_activity, run_agenda};
pub use expression::{ExpressionEvaluator, SimpleEvaluator};
pub use history::{HistoryKind, HistoryRecord, HistoryRecorder, InMemoryHistory};
pub use override_hook::{BehaviorOverrideHook, DealTypeOverride, OverrideRequest};
pub use policy::{
    AuditorStrategy, AutoDecision, AutoDecisionPolicy, AutoDecisionRequest,
    CompletionConditionPolicy, CompletionScope, ExpressionCompletionCondition, JoinedBranch,
    StrategyAutoDecision,
};
pub use repository::{InMemoryRepository, ProcessRepository};
pub use resolver::{OutgoingOptions, TakeResult};
pub use routing::{CommandRouting, RoutingOverride};
