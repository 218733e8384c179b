//! Core abstractions for the flow runner
//!
//! This crate provides the data model (flows, messages, lifecycle
//! states), the handler contract, and run events. It has no execution
//! logic of its own.

mod error;
pub mod events;
mod flow;
mod message;
mod node;

pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use flow::{Edge, Flow, FlowId, NodeId, NodeSpec, Position, RunInputs};
pub use message::{lookup_path, Message, ERROR_KEY, PAYLOAD_KEY};
pub use node::{Handler, HandlerContext, HandlerMetadata, NodeRecord, NodeStatus};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
