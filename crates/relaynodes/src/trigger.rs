use async_trait::async_trait;
use relaycore::{Node, NodeContext, NodeError, NodeMetadata, NodeOutput};

/// Entry point of a flow.
///
/// Forwards the initiating event, or the `testData` config when the author
/// pinned sample data in the editor.
pub struct TriggerNode {
    node_type: &'static str,
    description: &'static str,
}

impl TriggerNode {
    pub fn manual() -> Self {
        Self {
            node_type: "trigger.manual",
            description: "Start a flow by hand",
        }
    }

    pub fn cron() -> Self {
        Self {
            node_type: "trigger.cron",
            description: "Start a flow on a schedule",
        }
    }

    pub fn webhook() -> Self {
        Self {
            node_type: "trigger.webhook",
            description: "Start a flow from an incoming HTTP call",
        }
    }
}

#[async_trait]
impl Node for TriggerNode {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        match ctx.config_json("testData")? {
            Some(sample) => {
                ctx.events.info("Using testData from the trigger config");
                Ok(NodeOutput::new(sample))
            }
            None => Ok(NodeOutput::new(ctx.data)),
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: self.description.to_string(),
            category: "trigger".to_string(),
        }
    }
}
