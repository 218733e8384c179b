use async_trait::async_trait;
use flowcore::{Handler, HandlerContext, HandlerMetadata, Message, NodeError};
use serde_json::Value;
use std::sync::Arc;

use crate::json_kind;
use crate::script::{ScriptError, ScriptRuntime};

/// Tokens rejected anywhere in a user script (substring match)
pub const DISALLOWED_TOKENS: [&str; 6] = ["import", "require", "eval", "window", "alert", "document"];

/// Runs a user-supplied script against `(globals, msg)`
pub struct UserFunctionNode {
    runtime: Arc<dyn ScriptRuntime>,
}

impl UserFunctionNode {
    pub fn new(runtime: Arc<dyn ScriptRuntime>) -> Self {
        Self { runtime }
    }
}

/// First disallowed token contained in `script`
pub fn find_disallowed(script: &str) -> Option<&'static str> {
    DISALLOWED_TOKENS.iter().copied().find(|word| script.contains(word))
}

#[async_trait]
impl Handler for UserFunctionNode {
    fn node_type(&self) -> &str {
        "userFunction"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let script = match ctx.inputs.get("userFunction") {
            Some(Value::String(s)) => s.as_str(),
            other => {
                return Err(NodeError::InvalidInputType {
                    field: "userFunction".to_string(),
                    expected: "string".to_string(),
                    actual: json_kind(other).to_string(),
                })
            }
        };

        if let Some(word) = find_disallowed(script) {
            return Err(NodeError::Script(format!("\"{}\" is not allowed in user scripts", word)));
        }

        let result = self
            .runtime
            .run(script, &ctx.globals, &ctx.msg)
            .await
            .map_err(|e| match e {
                ScriptError::Compile(e) => NodeError::Script(format!("Error parsing user script\n{}", e)),
                other => NodeError::Script(format!("Error running user script\n{}", other)),
            })?;

        let mut msg = ctx.msg;
        match Message::try_from(result) {
            Ok(fields) => msg.merge(fields),
            Err(Value::Null) => {}
            Err(other) => {
                tracing::debug!(node_id = %ctx.node_id, result = %other, "Ignoring non-object script result");
            }
        }
        Ok(msg)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Run a sandboxed user script over globals and msg".to_string(),
            category: "function".to_string(),
        }
    }
}
