//! Standard node library
//!
//! Built-in handlers for the flow runner, plus the bridge transport and
//! script runtime they depend on.

pub mod bridge;
mod debug;
mod input;
mod runner;
pub mod script;
mod time;
mod user_function;

pub use bridge::{BridgeClient, BridgeConfig, BridgeNode, BridgeRequest, BridgeTransport};
pub use debug::DebugNode;
pub use input::StaticInputNode;
pub use runner::RunnerNode;
pub use script::{ProcessScriptRuntime, ScriptConfig, ScriptError, ScriptRuntime};
pub use time::DelayNode;
pub use user_function::{find_disallowed, UserFunctionNode, DISALLOWED_TOKENS};

use flowruntime::HandlerRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(
    registry: &mut HandlerRegistry,
    bridge: Arc<dyn BridgeTransport>,
    scripts: Arc<dyn ScriptRuntime>,
) {
    registry.register(Arc::new(StaticInputNode));
    registry.register(Arc::new(BridgeNode::new(bridge)));
    registry.register(Arc::new(UserFunctionNode::new(scripts)));
    registry.register(Arc::new(RunnerNode));
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(DelayNode));
}

/// JSON type name used in input validation errors
pub(crate) fn json_kind(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(s)) if s.is_empty() => "empty string",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
