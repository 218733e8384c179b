// crates/flowcore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventEmitter, NodeEvent, RunEvent, RunId, RunKind, RunSummary};
