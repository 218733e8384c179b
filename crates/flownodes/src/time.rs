use async_trait::async_trait;
use flowcore::{Handler, HandlerContext, HandlerMetadata, Message, NodeError};
use tokio::time::{sleep, Duration};

/// Delay the branch for a configured duration
pub struct DelayNode;

#[async_trait]
impl Handler for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let delay_ms = match ctx.inputs.get("delayMs") {
            None => 1000,
            Some(v) => v.as_u64().ok_or_else(|| NodeError::InvalidInputType {
                field: "delayMs".to_string(),
                expected: "non-negative integer".to_string(),
                actual: crate::json_kind(Some(v)).to_string(),
            })?,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(ctx.msg)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Delay the branch for inputs.delayMs milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
