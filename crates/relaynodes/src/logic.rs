use async_trait::async_trait;
use relaycore::template::ROOT_KEY;
use relaycore::{Condition, Node, NodeContext, NodeError, NodeMetadata, NodeOutput};
use serde_json::{json, Map, Value};

/// Evaluates `condition` and reports the `"true"` or `"false"` branch.
///
/// The condition sees the current data under `input`, e.g.
/// `input.records.length > 0 && input.status != "blocked"`.
pub struct LogicIfNode;

#[async_trait]
impl Node for LogicIfNode {
    fn node_type(&self) -> &str {
        "logic.if"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let source = ctx.require_str("condition")?;
        let condition = Condition::parse(source)?;

        let root = json!({ ROOT_KEY: ctx.data.clone() });
        let result = condition.evaluate(&root);
        let branch = if result { "true" } else { "false" };
        ctx.events.info(format!("Condition `{}` took the {} branch", source, branch));

        // Input fields carry through so downstream nodes still see them.
        let mut output = match &ctx.data {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        output.insert("result".to_string(), json!(result));
        output.insert("branch".to_string(), json!(branch));

        Ok(NodeOutput::new(Value::Object(output)).with_branch(branch))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Branch on a condition over the current data".to_string(),
            category: "logic".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(condition: &str, data: Value) -> NodeContext {
        let mut config = Map::new();
        config.insert("condition".into(), json!(condition));
        NodeContext::detached("logic.if", config, data)
    }

    #[tokio::test]
    async fn test_true_and_false_branches() {
        let data = json!({"records": [{"id": 1}], "count": 1});

        let out = LogicIfNode
            .execute(ctx("input.records.length > 0", data.clone()))
            .await
            .unwrap();
        assert_eq!(out.branch.as_deref(), Some("true"));
        assert_eq!(out.output["result"], true);
        assert_eq!(out.output["count"], 1);

        let out = LogicIfNode
            .execute(ctx("input.count === 0 || input.missing", data))
            .await
            .unwrap();
        assert_eq!(out.branch.as_deref(), Some("false"));
        assert_eq!(out.output["branch"], "false");
    }

    #[tokio::test]
    async fn test_bad_condition_is_an_error() {
        let err = LogicIfNode
            .execute(ctx("input.a > ", json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to evaluate condition"));

        let err = LogicIfNode
            .execute(NodeContext::detached("logic.if", Map::new(), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingConfig(_)));
    }
}
