//! Flow execution runtime
//!
//! This crate provides the engine that runs flows: the graph index, the
//! handler registry, the run state store, and branch traversal with
//! checkpoint pause/resume.

mod executor;
pub mod graph;
mod registry;
mod runtime;
mod store;

pub use executor::{FlowExecutor, NodeOutcome, RunReport, SkipReason, RUNNER_NODE_TYPE};
pub use graph::{is_root, roots, Adjacency};
pub use registry::HandlerRegistry;
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use store::{RunStateStore, StateChange};
