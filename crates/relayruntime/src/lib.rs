//! Flow execution runtime
//!
//! Owns the node registry, walks a flow's canvas from its trigger, records
//! every step through the record store and broadcasts execution events.
//! Saved flows live in the same store, and `trigger.cron` flows are started
//! by the [`CronScheduler`].

pub mod clock;
mod config;
mod context;
mod executor;
mod flows;
pub mod graph;
pub mod memory;
mod recorder;
mod registry;
mod runtime;
mod scheduler;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{RuntimeConfig, UnknownNodePolicy};
pub use context::ExecutionContext;
pub use executor::{FlowExecutor, RunReport};
pub use flows::FlowStore;
pub use graph::{downstream_order, validate_canvas, BranchMode, Traversal};
pub use memory::{InMemoryRecordStore, RecordingMailer, RecordingMessenger, SentMessage};
pub use recorder::{snapshot, RunLedger, StepHandle, StepRecorder};
pub use registry::NodeRegistry;
pub use runtime::FlowRuntime;
pub use scheduler::{cron_entries, schedule_to_cron, CronEntry, CronScheduler};
