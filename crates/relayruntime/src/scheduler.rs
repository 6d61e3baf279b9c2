//! Starts `trigger.cron` flows on their schedule.
//!
//! Active flows are read from the flow store on start and again every five
//! minutes, so edits made through the API are picked up without a restart.
//! Each `trigger.cron` node becomes one job, keyed by `flow:node`.

use crate::runtime::FlowRuntime;
use anyhow::{anyhow, Result};
use chrono::Utc;
use relaycore::{FlowDefinition, Run, TriggerType};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CRON_TRIGGER: &str = "trigger.cron";

/// Shortcut used when a cron trigger names neither `cron` nor `schedule`
pub const DEFAULT_SCHEDULE: &str = "15m";

const RELOAD_EVERY: &str = "0 */5 * * * *";

/// Expand a schedule shortcut such as `30s` or `6h` into a cron expression
/// with a leading seconds field. Anything else is returned as written.
pub fn schedule_to_cron(schedule: &str) -> String {
    let expression = match schedule.trim() {
        "5s" => "*/5 * * * * *",
        "10s" => "*/10 * * * * *",
        "20s" => "*/20 * * * * *",
        "30s" => "*/30 * * * * *",
        "1m" => "0 * * * * *",
        "2m" => "0 */2 * * * *",
        "5m" => "0 */5 * * * *",
        "10m" => "0 */10 * * * *",
        "15m" => "0 */15 * * * *",
        "20m" => "0 */20 * * * *",
        "30m" => "0 */30 * * * *",
        "1h" => "0 0 * * * *",
        "6h" => "0 0 */6 * * *",
        "1d" => "0 0 9 * * *",
        other => other,
    };
    with_seconds(expression)
}

/// Five-field expressions fire at second zero.
fn with_seconds(expression: &str) -> String {
    let expression = expression.trim();
    if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    }
}

/// One scheduled start of a flow
#[derive(Debug, Clone, PartialEq)]
pub struct CronEntry {
    pub flow_id: String,
    pub node_id: String,
    pub expression: String,
    /// Parsed `testData`, used as the run input
    pub payload: Option<Value>,
}

impl CronEntry {
    pub fn key(&self) -> String {
        format!("{}:{}", self.flow_id, self.node_id)
    }
}

fn test_data(config: &serde_json::Map<String, Value>) -> Option<Value> {
    match config.get("testData") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => match serde_json::from_str(s) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring unparseable testData on a cron trigger: {}", e);
                None
            }
        },
        Some(other) => Some(other.clone()),
    }
}

fn config_text<'a>(config: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Cron entries for every `trigger.cron` node of a flow.
/// A custom `cron` expression wins over the `schedule` shortcut.
pub fn cron_entries(flow: &FlowDefinition) -> Vec<CronEntry> {
    flow.canvas
        .nodes
        .iter()
        .filter(|node| node.node_type == CRON_TRIGGER)
        .map(|node| {
            let expression = match config_text(&node.config, "cron") {
                Some(custom) => with_seconds(custom),
                None => schedule_to_cron(
                    config_text(&node.config, "schedule").unwrap_or(DEFAULT_SCHEDULE),
                ),
            };
            CronEntry {
                flow_id: flow.id.clone(),
                node_id: node.id.clone(),
                expression,
                payload: test_data(&node.config),
            }
        })
        .collect()
}

/// Start a cron run of the entry's flow, if it is still active.
///
/// The flow is read again so the run uses the latest saved canvas.
pub(crate) async fn run_entry(runtime: &FlowRuntime, entry: &CronEntry) -> Result<Option<Run>> {
    let Some(flow) = runtime.flows().get(&entry.flow_id).await? else {
        warn!("Cron flow {} no longer exists", entry.flow_id);
        return Ok(None);
    };
    if !flow.is_active() {
        debug!("Skipping cron run of inactive flow {}", flow.id);
        return Ok(None);
    }

    let input = entry
        .payload
        .clone()
        .unwrap_or_else(|| json!({ "triggered_at": Utc::now() }));
    let (run, _) = runtime.start_run(flow, TriggerType::Cron, input, false).await?;
    Ok(Some(run))
}

fn cron_job(runtime: &FlowRuntime, entry: &CronEntry) -> Result<Job> {
    let runtime = runtime.clone();
    let entry_for_job = entry.clone();
    Job::new_async(entry.expression.as_str(), move |_uuid, _l| {
        let runtime = runtime.clone();
        let entry = entry_for_job.clone();
        Box::pin(async move {
            info!(flow_id = %entry.flow_id, node_id = %entry.node_id, "Cron job triggered");
            match run_entry(&runtime, &entry).await {
                Ok(Some(run)) => info!(run_id = %run.id, flow_id = %entry.flow_id, "Cron run started"),
                Ok(None) => {}
                Err(e) => error!(error = %e, flow_id = %entry.flow_id, "Failed to start cron run"),
            }
        })
    })
    .map_err(|e| anyhow!("Invalid cron expression '{}': {}", entry.expression, e))
}

/// Keeps one job per cron trigger of every active flow
#[derive(Clone)]
pub struct CronScheduler {
    scheduler: JobScheduler,
    runtime: FlowRuntime,
    /// `flow:node` -> job uuid
    jobs: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl CronScheduler {
    pub async fn new(runtime: FlowRuntime) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        Ok(Self {
            scheduler,
            runtime,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Load the cron flows, schedule the periodic reload and start ticking.
    /// A store that is not reachable yet is retried on the next reload.
    pub async fn start(&self) -> Result<()> {
        info!("🕐 Initializing cron scheduler");
        if let Err(e) = self.reload().await {
            warn!("Cron flows not loaded yet, retrying on the next reload: {}", e);
        }

        let this = self.clone();
        let reload = Job::new_async(RELOAD_EVERY, move |_uuid, _l| {
            let this = this.clone();
            Box::pin(async move {
                debug!("Reloading cron flows");
                if let Err(e) = this.reload().await {
                    warn!("Failed to reload cron flows: {}", e);
                }
            })
        })
        .map_err(|e| anyhow!("Failed to create reload job: {}", e))?;
        self.scheduler
            .add(reload)
            .await
            .map_err(|e| anyhow!("Failed to add reload job: {}", e))?;

        self.scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start scheduler: {}", e))?;
        info!("✅ Cron scheduler started");
        Ok(())
    }

    /// Replace every cron job with the ones the active flows ask for.
    /// Returns how many jobs are scheduled.
    pub async fn reload(&self) -> Result<usize> {
        let flows = self.runtime.flows().list_active().await?;
        let mut jobs = self.jobs.write().await;

        for (key, uuid) in jobs.drain() {
            if let Err(e) = self.scheduler.remove(&uuid).await {
                warn!("Failed to remove cron job {}: {}", key, e);
            }
        }

        for flow in &flows {
            for entry in cron_entries(flow) {
                let job = match cron_job(&self.runtime, &entry) {
                    Ok(job) => job,
                    Err(e) => {
                        error!("Skipping cron trigger {} of flow {}: {}", entry.node_id, flow.id, e);
                        continue;
                    }
                };
                match self.scheduler.add(job).await {
                    Ok(uuid) => {
                        info!("⏰ Scheduled flow \"{}\" ({}): {}", flow.name, flow.id, entry.expression);
                        jobs.insert(entry.key(), uuid);
                    }
                    Err(e) => error!("Failed to schedule cron for flow {}: {}", flow.id, e),
                }
            }
        }

        info!("Loaded {} cron jobs from {} active flows", jobs.len(), flows.len());
        Ok(jobs.len())
    }

    pub async fn active_job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("Failed to shutdown scheduler: {}", e))?;
        self.jobs.write().await.clear();
        info!("Cron scheduler stopped");
        Ok(())
    }
}
