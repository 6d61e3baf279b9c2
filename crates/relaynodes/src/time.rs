use async_trait::async_trait;
use relaycore::{Node, NodeContext, NodeError, NodeMetadata, NodeOutput};
use tokio::time::{sleep, Duration};

/// Pause the run, then pass the data through unchanged
pub struct DelayNode;

/// Unrecognised units count as seconds.
fn unit_seconds(unit: &str) -> f64 {
    match unit {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" | "m" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        other => {
            tracing::warn!("util.delay: unknown unit '{}', waiting in seconds", other);
            1.0
        }
    }
}

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "util.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let amount = ctx
            .config_f64("amount")?
            .filter(|a| *a > 0.0)
            .unwrap_or(5.0);
        let unit = ctx.config_str("unit").unwrap_or("seconds");
        let delay = Duration::try_from_secs_f64(amount * unit_seconds(unit)).map_err(|e| {
            NodeError::InvalidConfig {
                field: "amount".to_string(),
                reason: e.to_string(),
            }
        })?;

        ctx.events.info(format!("Delaying for {} {}", amount, unit));
        sleep(delay).await;

        Ok(NodeOutput::new(ctx.data))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Wait before continuing the flow".to_string(),
            category: "time".to_string(),
        }
    }
}
