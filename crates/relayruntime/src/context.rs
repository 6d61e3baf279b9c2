use relaycore::{FlowId, NodeId, RunId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Run-scoped data threaded from node to node.
///
/// Each step gets a snapshot and produces the next context through
/// [`ExecutionContext::advance`]; nothing mutates a context in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    run_id: RunId,
    flow_id: FlowId,
    data: Value,
    outputs: BTreeMap<NodeId, Value>,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, flow_id: impl Into<String>, data: Value) -> Self {
        Self {
            run_id: run_id.into(),
            flow_id: flow_id.into(),
            data,
            outputs: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Payload visible to templates and handed to the next node
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn outputs(&self) -> &BTreeMap<NodeId, Value> {
        &self.outputs
    }

    /// Fold a node's output into a new context. The output replaces the
    /// current data unless it is null, in which case the data carries over.
    pub fn advance(mut self, node_id: impl Into<String>, output: Value) -> Self {
        if !output.is_null() {
            self.data = output.clone();
        }
        self.outputs.insert(node_id.into(), output);
        self
    }

    pub fn into_parts(self) -> (Value, BTreeMap<NodeId, Value>) {
        (self.data, self.outputs)
    }
}
