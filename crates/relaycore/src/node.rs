use crate::{events::EventEmitter, NodeError, NodeId, RunId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Core trait that every node type implements
#[async_trait]
pub trait Node: Send + Sync {
    /// Type identifier (e.g. "pb.find", "logic.if"); `*.send` style
    /// wildcards match any prefix.
    fn node_type(&self) -> &str;

    /// Execute the node with its interpolated config and the current data
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Everything a node sees for one execution
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub node_type: String,

    /// Config after template interpolation
    pub config: Map<String, Value>,

    /// Data produced by the previous node (or the trigger event)
    pub data: Value,

    pub test_mode: bool,

    pub events: EventEmitter,
}

impl NodeContext {
    /// Context outside of any run, mostly useful for exercising a node directly.
    pub fn detached(node_type: impl Into<String>, config: Map<String, Value>, data: Value) -> Self {
        let node_type = node_type.into();
        Self {
            run_id: String::new(),
            node_id: node_type.clone(),
            events: EventEmitter::detached(node_type.clone()),
            node_type,
            config,
            data,
            test_mode: true,
        }
    }

    /// Non-empty string config value.
    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        self.config_str(name)
            .ok_or_else(|| NodeError::MissingConfig(name.to_string()))
    }

    /// Numeric config value; numeric strings are accepted since templates yield text.
    pub fn config_f64(&self, name: &str) -> Result<Option<f64>, NodeError> {
        match self.config.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
                NodeError::InvalidConfig {
                    field: name.to_string(),
                    reason: format!("'{}' is not a number", s),
                }
            }),
            Some(other) => Err(NodeError::InvalidConfig {
                field: name.to_string(),
                reason: format!("expected a number, got {}", other),
            }),
        }
    }

    pub fn config_u32_or(&self, name: &str, default: u32) -> Result<u32, NodeError> {
        Ok(self
            .config_f64(name)?
            .filter(|n| *n >= 1.0)
            .map(|n| n as u32)
            .unwrap_or(default))
    }

    /// JSON config value; strings are parsed as JSON documents.
    pub fn config_json(&self, name: &str) -> Result<Option<Value>, NodeError> {
        match self.config.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => serde_json::from_str(s)
                .map(Some)
                .map_err(|e| NodeError::InvalidConfig {
                    field: name.to_string(),
                    reason: e.to_string(),
                }),
            Some(other) => Ok(Some(other.clone())),
        }
    }
}

/// Result of a successful node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Becomes the data seen by the next node
    pub output: Value,

    /// Branch taken by conditional nodes ("true" / "false")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl NodeOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Descriptive information about a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
