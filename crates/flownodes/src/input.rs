use async_trait::async_trait;
use flowcore::{Handler, HandlerContext, HandlerMetadata, Message, NodeError};

use crate::json_kind;

/// Injects a static string as the branch payload
pub struct StaticInputNode;

#[async_trait]
impl Handler for StaticInputNode {
    fn node_type(&self) -> &str {
        "input"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let input = match ctx.inputs.get("input") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            other => {
                return Err(NodeError::InvalidInputType {
                    field: "input".to_string(),
                    expected: "non-empty string".to_string(),
                    actual: json_kind(other).to_string(),
                })
            }
        };

        ctx.events.info(format!("Injecting input ({} chars)", input.len()));
        Ok(ctx.msg.with_payload(input))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Set msg.payload to the configured input string".to_string(),
            category: "input".to_string(),
        }
    }
}
