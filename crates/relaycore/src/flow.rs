use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type FlowId = String;
pub type NodeId = String;

/// Prefix shared by every node type that can start a run.
pub const TRIGGER_PREFIX: &str = "trigger.";

/// Complete flow definition as saved by its author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: FlowStatus,
    #[serde(alias = "canvasJson", alias = "canvas_json")]
    pub canvas: Canvas,
}

fn default_version() -> u32 {
    1
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            version: 1,
            status: FlowStatus::Draft,
            canvas: Canvas::default(),
        }
    }

    pub fn with_status(mut self, status: FlowStatus) -> Self {
        self.status = status;
        self
    }

    pub fn add_node(&mut self, node: CanvasNode) -> NodeId {
        let id = node.id.clone();
        self.canvas.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.canvas.edges.push(Edge::new(source, target));
    }

    /// Connect through a conditional output such as `"true"` or `"false"`.
    pub fn connect_branch(
        &mut self,
        source: impl Into<String>,
        handle: impl Into<String>,
        target: impl Into<String>,
    ) {
        self.canvas
            .edges
            .push(Edge::new(source, target).with_handle(handle));
    }

    pub fn is_active(&self) -> bool {
        self.status == FlowStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

/// Nodes and edges of a flow. Acyclic in intent only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Canvas {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Canvas {
    pub fn find_node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn trigger_nodes(&self) -> impl Iterator<Item = &CanvasNode> {
        self.nodes.iter().filter(|n| n.is_trigger())
    }

    /// First trigger node in canvas order.
    pub fn trigger_node(&self) -> Option<&CanvasNode> {
        self.trigger_nodes().next()
    }
}

/// Node specification in a canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "NodeRepr")]
pub struct CanvasNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub config: Map<String, Value>,
}

impl CanvasNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn is_trigger(&self) -> bool {
        self.node_type.starts_with(TRIGGER_PREFIX)
    }
}

/// Accepts both the flat shape and the canvas editor shape, where the
/// engine-facing fields live under `data`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NodeRepr {
    Editor { id: String, data: EditorData },
    Flat {
        id: String,
        #[serde(rename = "type")]
        node_type: String,
        #[serde(default)]
        config: Map<String, Value>,
    },
}

#[derive(Deserialize)]
struct EditorData {
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    config: Map<String, Value>,
}

impl From<NodeRepr> for CanvasNode {
    fn from(repr: NodeRepr) -> Self {
        match repr {
            NodeRepr::Editor { id, data } => Self {
                id,
                node_type: data.node_type,
                config: data.config,
            },
            NodeRepr::Flat {
                id,
                node_type,
                config,
            } => Self {
                id,
                node_type,
                config,
            },
        }
    }
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }
}
