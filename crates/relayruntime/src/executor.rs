use crate::clock::Clock;
use crate::config::{RuntimeConfig, UnknownNodePolicy};
use crate::context::ExecutionContext;
use crate::graph::{BranchMode, Traversal};
use crate::recorder::{RunLedger, StepRecorder};
use crate::registry::NodeRegistry;
use relaycore::{
    template, CanvasNode, EventBus, ExecutionEvent, FlowDefinition, FlowError, NodeContext,
    NodeError, NodeId, NodeOutput, Run, RunStep,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome of one run, as seen by the caller that drove it
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: Run,
    /// Context data after the last successful node
    pub data: Value,
    pub outputs: BTreeMap<NodeId, Value>,
    /// Node ids in execution order, the trigger first
    pub executed: Vec<NodeId>,
    pub steps: Vec<RunStep>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.run.status == relaycore::RunStatus::Success
    }
}

/// What traversal left behind, before the run is finalized
struct Traversed {
    error: Option<String>,
    context: ExecutionContext,
    executed: Vec<NodeId>,
    steps: Vec<RunStep>,
}

impl Traversed {
    fn new(context: ExecutionContext) -> Self {
        Self {
            error: None,
            context,
            executed: Vec::new(),
            steps: Vec::new(),
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Drives a single run: trigger first, then breadth-first over the canvas,
/// one node at a time, stopping at the first failure.
pub struct FlowExecutor {
    registry: Arc<NodeRegistry>,
    ledger: Arc<RunLedger>,
    recorder: StepRecorder,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    branch_mode: BranchMode,
    unknown_nodes: UnknownNodePolicy,
}

impl FlowExecutor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        ledger: Arc<RunLedger>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            recorder: StepRecorder::new(ledger.clone(), clock.clone()),
            registry,
            ledger,
            event_bus,
            clock,
            branch_mode: config.branch_mode,
            unknown_nodes: config.unknown_nodes,
        }
    }

    /// Execute a queued run to completion.
    ///
    /// Node failures end up in the returned run (`failed` plus `error`); an
    /// `Err` means the run was not in the `queued` state.
    pub async fn execute(
        &self,
        mut run: Run,
        flow: &FlowDefinition,
        input: Value,
    ) -> Result<RunReport, FlowError> {
        let started = Instant::now();

        run.start()?;
        self.save_run(&run).await;
        self.event_bus.emit(ExecutionEvent::RunStarted {
            run_id: run.id.clone(),
            flow_id: flow.id.clone(),
            timestamp: self.clock.now(),
        });
        tracing::info!("Starting run {} of flow {} ({})", run.id, flow.name, flow.id);

        let traversed = self.traverse(&run, flow, input).await;

        let finished_at = self.clock.now();
        match &traversed.error {
            None => run.succeed(finished_at)?,
            Some(error) => run.fail(error.clone(), finished_at)?,
        }
        self.save_run(&run).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &run.error {
            None => tracing::info!("Run {} succeeded in {}ms", run.id, duration_ms),
            Some(error) => tracing::error!("Run {} failed after {}ms: {}", run.id, duration_ms, error),
        }
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            run_id: run.id.clone(),
            status: run.status,
            error: run.error.clone(),
            duration_ms,
            timestamp: finished_at,
        });

        let (data, outputs) = traversed.context.into_parts();
        Ok(RunReport {
            run,
            data,
            outputs,
            executed: traversed.executed,
            steps: traversed.steps,
        })
    }

    async fn traverse(&self, run: &Run, flow: &FlowDefinition, input: Value) -> Traversed {
        let mut state = Traversed::new(ExecutionContext::new(&run.id, &flow.id, input));

        let canvas = &flow.canvas;
        let Some(trigger) = canvas.trigger_node() else {
            return state.failed(FlowError::NoTriggerNode.to_string());
        };
        if canvas.trigger_nodes().count() > 1 {
            tracing::warn!(
                "Flow {} has several trigger nodes; starting from {}",
                flow.id,
                trigger.id
            );
        }

        let out = match self.run_node(run, trigger, &mut state).await {
            Ok(out) => out,
            Err(e) => return state.failed(format!("Trigger failed: {}", e)),
        };
        let mut traversal = Traversal::new(&canvas.edges, &trigger.id);
        let branch = self.taken_branch(&out);
        state.context = state.context.advance(&trigger.id, out.output);
        traversal.expand(&trigger.id, branch.as_deref());

        while let Some(node_id) = traversal.next() {
            let Some(node) = canvas.find_node(node_id) else {
                tracing::warn!("Edge points to unknown node {}; skipping", node_id);
                continue;
            };

            match self.run_node(run, node, &mut state).await {
                Ok(out) => {
                    let branch = self.taken_branch(&out);
                    state.context = state.context.advance(node_id, out.output);
                    traversal.expand(node_id, branch.as_deref());
                }
                Err(e) => return state.failed(e.to_string()),
            }
        }

        state
    }

    fn taken_branch(&self, out: &NodeOutput) -> Option<String> {
        match self.branch_mode {
            BranchMode::AllSuccessors => None,
            BranchMode::MatchHandle => out.branch.clone(),
        }
    }

    /// Interpolate, record, dispatch and report a single node
    async fn run_node(
        &self,
        run: &Run,
        node: &CanvasNode,
        state: &mut Traversed,
    ) -> Result<NodeOutput, NodeError> {
        let data = state.context.data();
        let config = template::interpolate_config(&node.config, data);
        let handle = self.recorder.begin(&run.id, node, data).await;

        self.event_bus.emit(ExecutionEvent::NodeStarted {
            run_id: run.id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            timestamp: self.clock.now(),
        });
        tracing::debug!("Executing node {} ({})", node.id, node.node_type);

        let started = Instant::now();
        let result = match self.registry.resolve(&node.node_type) {
            Some(handler) => {
                let ctx = NodeContext {
                    run_id: run.id.clone(),
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    config,
                    data: data.clone(),
                    test_mode: run.test_mode,
                    events: self
                        .event_bus
                        .create_emitter(run.id.clone(), node.id.clone()),
                };
                handler.execute(ctx).await
            }
            None => self.unregistered(node),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        state.steps.push(self.recorder.finish(handle, &result).await);
        state.executed.push(node.id.clone());

        match &result {
            Ok(out) => {
                tracing::info!("Node {} completed in {}ms", node.id, duration_ms);
                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    run_id: run.id.clone(),
                    node_id: node.id.clone(),
                    output: out.output.clone(),
                    duration_ms,
                    timestamp: self.clock.now(),
                });
            }
            Err(e) => {
                tracing::error!("Node {} failed: {}", node.id, e);
                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    run_id: run.id.clone(),
                    node_id: node.id.clone(),
                    error: e.to_string(),
                    timestamp: self.clock.now(),
                });
            }
        }

        result
    }

    fn unregistered(&self, node: &CanvasNode) -> Result<NodeOutput, NodeError> {
        match self.unknown_nodes {
            UnknownNodePolicy::Placeholder => {
                tracing::warn!("No handler for node type {}", node.node_type);
                Ok(NodeOutput::new(json!({
                    "message": format!("Node type {} not implemented", node.node_type)
                })))
            }
            UnknownNodePolicy::Reject => Err(NodeError::UnknownNodeType(node.node_type.clone())),
        }
    }

    async fn save_run(&self, run: &Run) {
        if let Err(e) = self.ledger.save_run_status(run).await {
            tracing::warn!("Failed to persist status {} of run {}: {}", run.status, run.id, e);
        }
    }
}
