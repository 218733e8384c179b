use async_trait::async_trait;
use flowcore::{Handler, HandlerContext, HandlerMetadata, Message, NodeError};
use flowruntime::RUNNER_NODE_TYPE;

/// Manual checkpoint.
///
/// Automatic traversal stops in front of it; when resumed it forwards
/// the resume message unchanged.
pub struct RunnerNode;

#[async_trait]
impl Handler for RunnerNode {
    fn node_type(&self) -> &str {
        RUNNER_NODE_TYPE
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        ctx.events.info("Checkpoint resumed");
        Ok(ctx.msg)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Pause the flow until it is resumed from this node".to_string(),
            category: "control".to_string(),
        }
    }
}
