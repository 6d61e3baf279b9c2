use thiserror::Error;

use crate::condition::ConditionError;
use crate::run::RunStatus;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("No trigger node found in flow")]
    NoTriggerNode,

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Canvas error: {0}")]
    Canvas(#[from] CanvasError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Flow {0} is archived")]
    FlowArchived(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Recipient not found: set `to` or a resolvable `toPath`")]
    MissingRecipient,

    #[error("No recordId or filter provided")]
    MissingSelector,

    #[error("Missing config: {0}")]
    MissingConfig(String),

    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to evaluate condition: {0}")]
    Condition(#[from] ConditionError),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Failure talking to an external provider.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: String, message: String },

    #[error("{provider} sent an unreadable response: {message}")]
    Decode { provider: String, message: String },
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Record {id} not found in '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Malformed record in '{collection}': {reason}")]
    Malformed { collection: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CanvasError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },

    #[error("Canvas has no trigger node")]
    MissingTrigger,

    #[error("Cyclic dependency detected")]
    CyclicDependency,
}
