use async_trait::async_trait;
use flowcore::{Handler, HandlerContext, HandlerMetadata, Message, NodeError};

/// Simple debug node that logs the branch message
pub struct DebugNode;

#[async_trait]
impl Handler for DebugNode {
    fn node_type(&self) -> &str {
        "debug"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let label = ctx.inputs.get_str("label").unwrap_or("debug");
        tracing::info!(node_id = %ctx.node_id, label, msg = ?ctx.msg, "DEBUG");

        ctx.events.info(format!("DEBUG [{}]", label));
        for (key, value) in ctx.msg.iter() {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        Ok(ctx.msg)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Logs the message for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
