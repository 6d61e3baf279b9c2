//! Standard node library
//!
//! Built-in node types for triggers, messaging, records, branching,
//! reshaping and delays, plus HTTP adapters for the external services.

pub mod gateways;
mod logic;
mod messaging;
mod records;
mod time;
mod transform;
mod trigger;

pub use gateways::GatewaySettings;
pub use logic::LogicIfNode;
pub use messaging::{EmailSendNode, MessageSendNode};
pub use records::{PbCreateNode, PbFindNode, PbGetOneNode, PbUpdateNode};
pub use time::DelayNode;
pub use transform::MapTransformNode;
pub use trigger::TriggerNode;

use relaycore::{EmailGateway, MessagingGateway, RecordStore};
use relayruntime::{InMemoryRecordStore, NodeRegistry, RecordingMailer, RecordingMessenger};
use std::sync::Arc;

/// External collaborators shared by every node
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn RecordStore>,
    pub messaging: Arc<dyn MessagingGateway>,
    pub email: Arc<dyn EmailGateway>,
}

impl Ports {
    /// Ports that never leave the process
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryRecordStore::new()),
            messaging: Arc::new(RecordingMessenger::new()),
            email: Arc::new(RecordingMailer::new()),
        }
    }
}

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry, ports: &Ports) {
    registry.register(Arc::new(TriggerNode::manual()));
    registry.register(Arc::new(TriggerNode::cron()));
    registry.register(Arc::new(TriggerNode::webhook()));
    registry.register(Arc::new(MessageSendNode::new(ports.messaging.clone())));
    registry.register(Arc::new(EmailSendNode::new(ports.email.clone())));
    registry.register(Arc::new(PbFindNode::new(ports.store.clone())));
    registry.register(Arc::new(PbGetOneNode::new(ports.store.clone())));
    registry.register(Arc::new(PbCreateNode::new(ports.store.clone())));
    registry.register(Arc::new(PbUpdateNode::new(ports.store.clone())));
    registry.register(Arc::new(LogicIfNode));
    registry.register(Arc::new(MapTransformNode));
    registry.register(Arc::new(DelayNode));
}

/// A registry with every standard node wired to `ports`
pub fn standard_registry(ports: &Ports) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry, ports);
    registry
}
