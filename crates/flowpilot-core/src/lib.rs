//! # FlowPilot Core
//!
//! Types shared by the scheduler, the executor and the CLI host:
//! configuration, errors, the flow model and the store/runner interfaces.

pub mod config;
pub mod error;
pub mod flow;
pub mod store;
pub mod traits;

pub use config::{ExecutorConfig, FlowPilotConfig, SchedulerConfig};
pub use error::{FlowPilotError, Result};
pub use flow::{ErrorTag, ExecutionStatus, Flow, FlowStatus, StatusTimes};
pub use store::JsonFlowStore;
pub use traits::{FlowRunner, FlowStore};
