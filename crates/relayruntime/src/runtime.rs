use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::executor::{FlowExecutor, RunReport};
use crate::flows::FlowStore;
use crate::recorder::RunLedger;
use crate::registry::NodeRegistry;
use relaycore::{
    EventBus, ExecutionEvent, FlowDefinition, FlowError, FlowStatus, RecordStore, Run, RunStep,
    TriggerType,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Main entry point for starting and inspecting runs.
///
/// Cloning is cheap; every clone shares the registry, store and event bus.
#[derive(Clone)]
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    ledger: Arc<RunLedger>,
    flows: Arc<FlowStore>,
    executor: Arc<FlowExecutor>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl FlowRuntime {
    /// Create a runtime with default settings
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self::with_config(registry, store, RuntimeConfig::default())
    }

    pub fn with_config(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn RecordStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_clock(registry, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn RecordStore>,
        config: RuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let flows = Arc::new(FlowStore::new(store.clone(), config.flows_collection.clone()));
        let ledger = Arc::new(RunLedger::new(
            store,
            config.runs_collection.clone(),
            config.steps_collection.clone(),
        ));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(FlowExecutor::new(
            registry.clone(),
            ledger.clone(),
            event_bus.clone(),
            clock.clone(),
            &config,
        ));

        Self {
            registry,
            ledger,
            flows,
            executor,
            event_bus,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Saved flow definitions, in the same store as runs
    pub fn flows(&self) -> &Arc<FlowStore> {
        &self.flows
    }

    /// Persist a queued run for `flow`. Archived flows only accept test runs.
    pub async fn create_run(
        &self,
        flow: &FlowDefinition,
        trigger_type: TriggerType,
        input: &Value,
        test_mode: bool,
    ) -> Result<Run, FlowError> {
        if flow.status == FlowStatus::Archived && !test_mode {
            return Err(FlowError::FlowArchived(flow.id.clone()));
        }

        let run = Run::queued(flow.id.clone(), trigger_type, test_mode, self.clock.now());
        let run = self.ledger.insert_run(&run, input).await?;
        tracing::debug!("Queued run {} for flow {} ({})", run.id, flow.id, trigger_type.as_str());
        Ok(run)
    }

    /// Execute a queued run on the current task
    pub async fn execute_run(
        &self,
        run: Run,
        flow: &FlowDefinition,
        input: Value,
    ) -> Result<RunReport, FlowError> {
        self.executor.execute(run, flow, input).await
    }

    /// Create a run and execute it to completion
    pub async fn run_flow(
        &self,
        flow: &FlowDefinition,
        trigger_type: TriggerType,
        input: Value,
        test_mode: bool,
    ) -> Result<RunReport, FlowError> {
        let run = self.create_run(flow, trigger_type, &input, test_mode).await?;
        self.execute_run(run, flow, input).await
    }

    /// Create a run and execute it on its own task.
    /// Returns the queued run right away.
    pub async fn start_run(
        &self,
        flow: FlowDefinition,
        trigger_type: TriggerType,
        input: Value,
        test_mode: bool,
    ) -> Result<(Run, JoinHandle<Result<RunReport, FlowError>>), FlowError> {
        let run = self.create_run(&flow, trigger_type, &input, test_mode).await?;
        let executor = self.executor.clone();
        let queued = run.clone();
        let handle = tokio::spawn(async move { executor.execute(run, &flow, input).await });
        Ok((queued, handle))
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, FlowError> {
        self.ledger.get_run(run_id).await
    }

    /// Most recent runs of a flow, newest first
    pub async fn list_runs(&self, flow_id: &str) -> Result<Vec<Run>, FlowError> {
        Ok(self.ledger.list_runs(flow_id).await?)
    }

    pub async fn list_run_steps(&self, run_id: &str) -> Result<Vec<RunStep>, FlowError> {
        Ok(self.ledger.list_steps(run_id).await?)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
