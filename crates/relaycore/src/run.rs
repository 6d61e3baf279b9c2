use crate::{FlowError, FlowId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub type RunId = String;

/// Lifecycle of a run: `queued -> running -> success | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Cron,
    Webhook,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Cron => "cron",
            TriggerType::Webhook => "webhook",
        }
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerType::Manual),
            "cron" => Ok(TriggerType::Cron),
            "webhook" => Ok(TriggerType::Webhook),
            other => Err(format!("unknown trigger type: {}", other)),
        }
    }
}

/// One execution attempt of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub flow_id: FlowId,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub test_mode: bool,
}

impl Run {
    /// A queued run that has not been persisted yet; the id is assigned by the store.
    pub fn queued(
        flow_id: impl Into<String>,
        trigger_type: TriggerType,
        test_mode: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            flow_id: flow_id.into(),
            status: RunStatus::Queued,
            trigger_type,
            started_at,
            finished_at: None,
            error: None,
            test_mode,
        }
    }

    pub fn start(&mut self) -> Result<(), FlowError> {
        self.transition(RunStatus::Running)
    }

    pub fn succeed(&mut self, at: DateTime<Utc>) -> Result<(), FlowError> {
        self.transition(RunStatus::Success)?;
        self.finished_at = Some(at.max(self.started_at));
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> Result<(), FlowError> {
        self.transition(RunStatus::Failed)?;
        self.finished_at = Some(at.max(self.started_at));
        self.error = Some(error.into());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), FlowError> {
        if !self.status.can_transition_to(next) {
            return Err(FlowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
}

/// One node's execution record within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStep {
    pub id: String,
    pub run_id: RunId,
    pub node_id: NodeId,
    pub node_type: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStep {
    pub fn begin(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        input: Option<Value>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: StepStatus::Running,
            started_at,
            finished_at: None,
            input,
            output: None,
            error: None,
        }
    }

    /// Finalize the step. The error is kept only when the step failed.
    pub fn complete(
        &mut self,
        output: Option<Value>,
        error: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.finished_at = Some(at.max(self.started_at));
        self.output = output;
        match error {
            Some(error) => {
                self.status = StepStatus::Failed;
                self.error = Some(error);
            }
            None => {
                self.status = StepStatus::Success;
                self.error = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_run_lifecycle() {
        let t0 = Utc::now();
        let mut run = Run::queued("flow", TriggerType::Manual, true, t0);
        assert!(run.finished_at.is_none());

        run.start().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        run.succeed(t0 + Duration::seconds(1)).unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.finished_at.is_some());
        assert!(run.error.is_none());
    }

    #[test]
    fn test_terminal_runs_reject_transitions() {
        let t0 = Utc::now();
        let mut run = Run::queued("flow", TriggerType::Cron, false, t0);
        assert!(run.succeed(t0).is_err(), "queued runs cannot jump to success");

        run.start().unwrap();
        run.fail("boom", t0).unwrap();
        assert_eq!(run.error.as_deref(), Some("boom"));

        let err = run.start().unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::Running
            }
        ));
    }

    #[test]
    fn test_finished_at_never_precedes_started_at() {
        let t0 = Utc::now();
        let mut step = RunStep::begin("r", "n", "util.delay", None, t0);
        step.complete(None, Some("late clock".into()), t0 - Duration::seconds(5));
        assert_eq!(step.finished_at, Some(t0));
        assert_eq!(step.status, StepStatus::Failed);
    }
}
