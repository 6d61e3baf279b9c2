use crate::graph::BranchMode;
use std::fmt;
use std::str::FromStr;

/// What to do with a node whose type has no registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownNodePolicy {
    /// Record a successful step whose output says the type is not implemented
    #[default]
    Placeholder,
    /// Fail the step, and with it the run
    Reject,
}

impl FromStr for UnknownNodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "placeholder" | "skip" => Ok(UnknownNodePolicy::Placeholder),
            "reject" | "fail" => Ok(UnknownNodePolicy::Reject),
            other => Err(format!("unknown node policy: {}", other)),
        }
    }
}

impl fmt::Display for UnknownNodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownNodePolicy::Placeholder => f.write_str("placeholder"),
            UnknownNodePolicy::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    pub branch_mode: BranchMode,
    pub unknown_nodes: UnknownNodePolicy,
    pub runs_collection: String,
    pub steps_collection: String,
    pub flows_collection: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            branch_mode: BranchMode::default(),
            unknown_nodes: UnknownNodePolicy::default(),
            runs_collection: "runs".to_string(),
            steps_collection: "run_steps".to_string(),
            flows_collection: "flows".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_branch_mode(mut self, mode: BranchMode) -> Self {
        self.branch_mode = mode;
        self
    }

    pub fn with_unknown_nodes(mut self, policy: UnknownNodePolicy) -> Self {
        self.unknown_nodes = policy;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Defaults overridden by `RELAY_BRANCH_MODE`, `RELAY_UNKNOWN_NODES`
    /// and `RELAY_EVENT_BUFFER`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(mode) = env_parsed::<BranchMode>("RELAY_BRANCH_MODE") {
            config.branch_mode = mode;
        }
        if let Some(policy) = env_parsed::<UnknownNodePolicy>("RELAY_UNKNOWN_NODES") {
            config.unknown_nodes = policy;
        }
        if let Some(size) = env_parsed::<usize>("RELAY_EVENT_BUFFER") {
            config.event_buffer_size = size;
        }
        config
    }
}

fn env_parsed<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={}: {}", name, raw, e);
            None
        }
    }
}
