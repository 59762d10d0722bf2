//! Interfaces shared across crates.
//!
//! The scheduler only knows how to *ask* for a flow to run; the executor
//! only knows how to record what happened. Both sides meet here.

use async_trait::async_trait;

use crate::error::Result;
use crate::flow::{ExecutionStatus, Flow, StatusTimes};

/// Persistence for flow status and logs.
///
/// Each call is a self-contained write; callers must not assume any
/// transaction spanning two calls.
pub trait FlowStore: Send + Sync {
    fn get_flow(&self, id: &str) -> Option<Flow>;

    fn update_execution_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        times: StatusTimes,
    ) -> Result<()>;

    /// Accumulates `message` onto any existing error. Never overwrites and
    /// never stores the same message twice.
    fn update_execution_error(&self, id: &str, message: &str) -> Result<()>;

    fn add_execution_log(&self, id: &str, line: &str) -> Result<()>;

    /// Clears logs and the accumulated error message.
    fn clear_execution_logs(&self, id: &str) -> Result<()>;
}

/// Something that can launch a flow run.
#[async_trait]
pub trait FlowRunner: Send + Sync {
    /// Start a run. Returns false when the run could not be started
    /// (unknown flow, not ready, or already running).
    async fn execute_flow(&self, flow_id: &str) -> bool;
}
