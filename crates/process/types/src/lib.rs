//! Process domain types
//!
//! The data model of the process orchestration core:
//!
//! - **Process Graph**: [`ProcessDefinition`], [`Activity`] and [`Transition`],
//!   immutable and shared by every instance
//! - **Behaviors**: [`ActivityBehavior`], a closed set of variants with
//!   their configuration ([`MultiInstanceConfig`], [`CallActivityConfig`])
//! - **Execution Tree**: [`ExecutionTree`], an arena of [`Execution`] nodes
//!   addressed by [`ExecutionId`]
//! - **Variable Scope**: [`VariableScope`], local to one execution, with
//!   parent fallback provided by the tree
//! - **Errors** and **configuration** shared by the runtime

#![deny(unsafe_code)]

mod behavior;
mod config;
mod definition;
mod errors;
mod execution;
mod ids;
mod transition;
mod tree;
mod variables;

pub use behavior::*;
pub use config::*;
pub use definition::*;
pub use errors::*;
pub use execution::*;
pub use ids::*;
pub use transition::*;
pub use tree::*;
pub use variables::*;
