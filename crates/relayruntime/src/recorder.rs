//! Durable run and step records, kept in the record store.
//!
//! Runs live in the `runs` collection and steps in `run_steps`, both with
//! snake_case fields. The recorder never lets a persistence problem change
//! the outcome of a node: failures are logged and the run carries on.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use relaycore::{
    CanvasNode, FlowError, ListQuery, NodeError, NodeOutput, RecordStore, Run, RunStatus, RunStep,
    StepStatus, StoreError, TriggerType,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const RUNS_PAGE: u32 = 50;
const STEPS_PAGE: u32 = 200;

#[derive(Debug, Serialize, Deserialize)]
struct RunRecord {
    #[serde(default, skip_serializing)]
    id: String,
    flow_id: String,
    status: RunStatus,
    trigger_type: TriggerType,
    started_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default)]
    test_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_event: Option<Value>,
}

impl From<RunRecord> for Run {
    fn from(record: RunRecord) -> Self {
        Run {
            id: record.id,
            flow_id: record.flow_id,
            status: record.status,
            trigger_type: record.trigger_type,
            started_at: record.started_at,
            finished_at: record.finished_at,
            error: record.error,
            test_mode: record.test_mode,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RunStepRecord {
    #[serde(default, skip_serializing)]
    id: String,
    run_id: String,
    node_id: String,
    node_type: String,
    status: StepStatus,
    started_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&RunStep> for RunStepRecord {
    fn from(step: &RunStep) -> Self {
        Self {
            id: step.id.clone(),
            run_id: step.run_id.clone(),
            node_id: step.node_id.clone(),
            node_type: step.node_type.clone(),
            status: step.status,
            started_at: step.started_at,
            finished_at: step.finished_at,
            input: step.input.clone(),
            output: step.output.clone(),
            error: step.error.clone(),
        }
    }
}

impl From<RunStepRecord> for RunStep {
    fn from(record: RunStepRecord) -> Self {
        RunStep {
            id: record.id,
            run_id: record.run_id,
            node_id: record.node_id,
            node_type: record.node_type,
            status: record.status,
            started_at: record.started_at,
            finished_at: record.finished_at,
            input: record.input.filter(|v| !v.is_null()),
            output: record.output.filter(|v| !v.is_null()),
            error: record.error,
        }
    }
}

/// Hosted stores write unset fields as empty strings.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn record_id(collection: &str, record: &Value) -> Result<String, StoreError> {
    record
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Malformed {
            collection: collection.to_string(),
            reason: "record has no id".to_string(),
        })
}

fn decode<T: serde::de::DeserializeOwned>(collection: &str, record: Value) -> Result<T, StoreError> {
    serde_json::from_value(record).map_err(|e| StoreError::Malformed {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(collection: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Malformed {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

/// Serialize a snapshot for a step record, dropping it if that fails.
pub fn snapshot<T: Serialize + ?Sized>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(Value::Null) => None,
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Skipping step snapshot, serialization failed: {}", e);
            None
        }
    }
}

/// Reads and writes runs and steps through a [`RecordStore`]
pub struct RunLedger {
    store: Arc<dyn RecordStore>,
    runs: String,
    steps: String,
}

impl RunLedger {
    pub fn new(
        store: Arc<dyn RecordStore>,
        runs_collection: impl Into<String>,
        steps_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            runs: runs_collection.into(),
            steps: steps_collection.into(),
        }
    }

    /// Persist a new run and return it with its store-assigned id
    pub async fn insert_run(&self, run: &Run, input_event: &Value) -> Result<Run, StoreError> {
        let record = RunRecord {
            id: String::new(),
            flow_id: run.flow_id.clone(),
            status: run.status,
            trigger_type: run.trigger_type,
            started_at: run.started_at,
            finished_at: run.finished_at,
            error: run.error.clone(),
            test_mode: run.test_mode,
            input_event: Some(input_event.clone()),
        };
        let created = self
            .store
            .create(&self.runs, &encode(&self.runs, &record)?)
            .await?;
        let mut stored = run.clone();
        stored.id = record_id(&self.runs, &created)?;
        Ok(stored)
    }

    /// Write the lifecycle fields of a run
    pub async fn save_run_status(&self, run: &Run) -> Result<(), StoreError> {
        let mut patch = json!({ "status": run.status });
        if let Some(finished_at) = run.finished_at {
            patch["finished_at"] = json!(finished_at);
        }
        if let Some(error) = &run.error {
            patch["error"] = json!(error);
        }
        self.store.update(&self.runs, &run.id, &patch).await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, FlowError> {
        match self.store.get_one(&self.runs, run_id, &Default::default()).await {
            Ok(record) => Ok(decode::<RunRecord>(&self.runs, record)?.into()),
            Err(StoreError::NotFound { .. }) => Err(FlowError::RunNotFound(run_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Latest runs of a flow, newest first
    pub async fn list_runs(&self, flow_id: &str) -> Result<Vec<Run>, StoreError> {
        let query = ListQuery::filtered(format!("flow_id = \"{}\"", flow_id))
            .sorted("-started_at")
            .limit(RUNS_PAGE);
        let page = self.store.list(&self.runs, &query).await?;
        page.items
            .into_iter()
            .map(|item| decode::<RunRecord>(&self.runs, item).map(Run::from))
            .collect()
    }

    pub async fn insert_step(&self, step: &RunStep) -> Result<String, StoreError> {
        let created = self
            .store
            .create(&self.steps, &encode(&self.steps, &RunStepRecord::from(step))?)
            .await?;
        record_id(&self.steps, &created)
    }

    pub async fn save_step(&self, step: &RunStep) -> Result<(), StoreError> {
        let mut patch = json!({ "status": step.status });
        if let Some(finished_at) = step.finished_at {
            patch["finished_at"] = json!(finished_at);
        }
        if let Some(output) = &step.output {
            patch["output"] = output.clone();
        }
        if let Some(error) = &step.error {
            patch["error"] = json!(error);
        }
        self.store.update(&self.steps, &step.id, &patch).await?;
        Ok(())
    }

    /// Steps of a run in start order
    pub async fn list_steps(&self, run_id: &str) -> Result<Vec<RunStep>, StoreError> {
        let query = ListQuery::filtered(format!("run_id = \"{}\"", run_id))
            .sorted("+started_at")
            .limit(STEPS_PAGE);
        let page = self.store.list(&self.steps, &query).await?;
        page.items
            .into_iter()
            .map(|item| decode::<RunStepRecord>(&self.steps, item).map(RunStep::from))
            .collect()
    }
}

/// A step that has started and is waiting for its handler's result
#[derive(Debug)]
pub struct StepHandle {
    step: RunStep,
    persisted: bool,
}

impl StepHandle {
    pub fn step(&self) -> &RunStep {
        &self.step
    }
}

/// Writes one RunStep per executed node
pub struct StepRecorder {
    ledger: Arc<RunLedger>,
    clock: Arc<dyn Clock>,
}

impl StepRecorder {
    pub fn new(ledger: Arc<RunLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Create the `running` record before the handler is invoked
    pub async fn begin(&self, run_id: &str, node: &CanvasNode, input: &Value) -> StepHandle {
        let mut step = RunStep::begin(
            run_id,
            node.id.clone(),
            node.node_type.clone(),
            snapshot(input),
            self.clock.now(),
        );

        let persisted = match self.ledger.insert_step(&step).await {
            Ok(id) => {
                step.id = id;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to create run step record for node {}: {}", node.id, e);
                false
            }
        };

        StepHandle { step, persisted }
    }

    /// Finalize the step exactly once with the handler's result
    pub async fn finish(
        &self,
        handle: StepHandle,
        result: &Result<NodeOutput, NodeError>,
    ) -> RunStep {
        let StepHandle { mut step, persisted } = handle;
        let now = self.clock.now();
        match result {
            Ok(out) => step.complete(snapshot(&out.output), None, now),
            Err(e) => step.complete(None, Some(e.to_string()), now),
        }

        if persisted {
            if let Err(e) = self.ledger.save_step(&step).await {
                tracing::warn!("Failed to update run step record for node {}: {}", step.node_id, e);
            }
        }

        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::InMemoryRecordStore;

    fn ledger(store: Arc<InMemoryRecordStore>) -> Arc<RunLedger> {
        Arc::new(RunLedger::new(store, "runs", "run_steps"))
    }

    #[tokio::test]
    async fn test_run_roundtrip_through_store() {
        let store = Arc::new(InMemoryRecordStore::new());
        let ledger = ledger(store.clone());

        let mut run = Run::queued("flow-1", TriggerType::Webhook, false, Utc::now());
        run = ledger.insert_run(&run, &json!({"hello": "world"})).await.unwrap();
        assert!(!run.id.is_empty());

        run.start().unwrap();
        ledger.save_run_status(&run).await.unwrap();
        run.fail("boom", Utc::now()).unwrap();
        ledger.save_run_status(&run).await.unwrap();

        let loaded = ledger.get_run(&run.id).await.unwrap();
        assert_eq!(loaded, run);

        let raw = store.records("runs").await;
        assert_eq!(raw[0]["input_event"], json!({"hello": "world"}));
        assert_eq!(raw[0]["status"], "failed");

        assert!(matches!(
            ledger.get_run("missing").await,
            Err(FlowError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_records_accept_blank_optional_fields() {
        let record: RunStepRecord = serde_json::from_value(json!({
            "id": "s1", "run_id": "r1", "node_id": "n1", "node_type": "pb.find",
            "status": "running", "started_at": "2026-01-01T00:00:00Z",
            "finished_at": "", "error": "", "input": null
        }))
        .unwrap();
        let step = RunStep::from(record);
        assert!(step.finished_at.is_none());
        assert!(step.error.is_none());
        assert!(step.input.is_none());
    }

    #[tokio::test]
    async fn test_recorder_updates_step_once() {
        let store = Arc::new(InMemoryRecordStore::new());
        let recorder = StepRecorder::new(ledger(store.clone()), Arc::new(SystemClock));
        let node = CanvasNode::new("n1", "logic.if");

        let handle = recorder.begin("r1", &node, &json!({"x": 1})).await;
        assert_eq!(handle.step().status, StepStatus::Running);

        let step = recorder
            .finish(handle, &Err(NodeError::MissingConfig("condition".into())))
            .await;
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("Missing config: condition"));
        assert!(step.finished_at.unwrap() >= step.started_at);

        let stored = store.records("run_steps").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["status"], "failed");
        assert_eq!(stored[0]["input"], json!({"x": 1}));
        assert_eq!(store.update_count("run_steps").await, 1);
    }
}
