//! # FlowPilot Executor
//!
//! Runs pipelines as child processes and tracks which flows are running.
//!
//! ```text
//! execute(flow_id)
//!   ├── RunRegistry.try_reserve   (one run per flow, fresh RunId)
//!   ├── spawn interpreter <entry> (cwd = project, piped output)
//!   ├── stdout / stderr readers → LogSink → FlowStore + subscriber
//!   │                          └→ StageClassifier → [STAGE] error
//!   ├── supervise: exit | stop request | stage error → terminate
//!   └── seal → final status → release   (skipped when a stop owns it)
//! ```

pub mod classify;
pub mod executor;
pub mod logs;
pub mod process;
pub mod runs;

pub use classify::StageClassifier;
pub use executor::JobExecutor;
pub use logs::{LogEvent, LogStream};
pub use runs::{RunId, RunInfo, RunRegistry};
