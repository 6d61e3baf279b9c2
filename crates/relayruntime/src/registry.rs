use relaycore::{Node, NodeMetadata};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available node types
///
/// Resolution tries the exact type first, then a `*.<suffix>` wildcard
/// registration, so a single `*.send` handler serves every messaging channel.
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a node handler under its own type string
    pub fn register(&mut self, node: Arc<dyn Node>) {
        let node_type = node.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        if self.handlers.insert(node_type.clone(), node).is_some() {
            tracing::warn!("Node type {} was registered twice; keeping the latest", node_type);
        }
    }

    /// Find the handler for a node type
    pub fn resolve(&self, node_type: &str) -> Option<&Arc<dyn Node>> {
        if let Some(node) = self.handlers.get(node_type) {
            return Some(node);
        }
        let (_, suffix) = node_type.rsplit_once('.')?;
        self.handlers.get(&format!("*.{}", suffix))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.resolve(node_type).is_some()
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.resolve(node_type).map(|n| n.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaycore::{NodeContext, NodeError, NodeOutput};
    use serde_json::json;

    struct Named(&'static str);

    #[async_trait]
    impl Node for Named {
        fn node_type(&self) -> &str {
            self.0
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::new(json!(self.0)))
        }
    }

    #[test]
    fn test_exact_match_beats_wildcard() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(Named("*.send")));
        registry.register(Arc::new(Named("email.send")));

        assert_eq!(registry.resolve("email.send").unwrap().node_type(), "email.send");
        assert_eq!(registry.resolve("whatsapp.send").unwrap().node_type(), "*.send");
        assert_eq!(registry.resolve("sms.send").unwrap().node_type(), "*.send");
        assert!(registry.resolve("send").is_none());
        assert!(registry.resolve("pb.find").is_none());
    }

    #[test]
    fn test_lists_sorted_types() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(Named("util.delay")));
        registry.register(Arc::new(Named("logic.if")));
        assert_eq!(registry.list_node_types(), vec!["logic.if", "util.delay"]);
    }
}
