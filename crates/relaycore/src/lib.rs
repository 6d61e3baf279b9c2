//! Core abstractions for the relay flow engine
//!
//! Flow and run data model, the node trait, the ports the engine calls
//! external services through, template interpolation and the condition
//! language. Nothing in here talks to the network.

pub mod condition;
mod error;
pub mod events;
mod flow;
mod node;
pub mod ports;
mod run;
pub mod template;

pub use condition::{Condition, ConditionError};
pub use error::{CanvasError, FlowError, NodeError, StoreError, TransportError};
pub use events::*;
pub use flow::{Canvas, CanvasNode, Edge, FlowDefinition, FlowId, FlowStatus, NodeId, TRIGGER_PREFIX};
pub use node::{Node, NodeContext, NodeMetadata, NodeOutput};
pub use ports::{
    Delivery, EmailGateway, EmailMessage, FetchOptions, ListQuery, MediaMessage, MessagingGateway,
    RecordPage, RecordStore,
};
pub use run::{Run, RunId, RunStatus, RunStep, StepStatus, TriggerType};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
