use async_trait::async_trait;
use relaycore::template::interpolate_value;
use relaycore::{Node, NodeContext, NodeError, NodeMetadata, NodeOutput};

/// Reshape the current data through a JSON template.
///
/// Every string in `template` is interpolated, at any depth, so
/// `{"name": "{{input.customer.name}}"}` lifts a nested field to the top.
pub struct MapTransformNode;

#[async_trait]
impl Node for MapTransformNode {
    fn node_type(&self) -> &str {
        "map.transform"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let template = ctx
            .config_json("template")?
            .ok_or_else(|| NodeError::MissingConfig("template".to_string()))?;
        Ok(NodeOutput::new(interpolate_value(&template, &ctx.data)))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Build a new object from a template".to_string(),
            category: "transform".to_string(),
        }
    }
}
