//! Log events of a run. Every line is persisted on the flow and, when a
//! subscriber asked for it, forwarded over a bounded channel.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use flowpilot_core::traits::FlowStore;

/// Origin of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lines written by the executor itself.
    Executor,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub flow_id: String,
    pub stream: LogStream,
    pub line: String,
    pub at: DateTime<Local>,
}

/// Per-run log writer. Cloned into each stream reader.
#[derive(Clone)]
pub struct LogSink {
    flow_id: String,
    store: Arc<dyn FlowStore>,
    subscriber: Option<mpsc::Sender<LogEvent>>,
}

impl LogSink {
    pub fn new(
        flow_id: &str,
        store: Arc<dyn FlowStore>,
        subscriber: Option<mpsc::Sender<LogEvent>>,
    ) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            store,
            subscriber,
        }
    }

    /// Persist a line and forward it. A full channel applies backpressure;
    /// a closed one is ignored.
    pub async fn emit(&self, stream: LogStream, line: impl Into<String>) {
        let line = line.into();
        if let Err(e) = self.store.add_execution_log(&self.flow_id, &line) {
            tracing::warn!("⚠️ Failed to store log line for {}: {e}", self.flow_id);
        }
        if let Some(tx) = &self.subscriber {
            let event = LogEvent {
                flow_id: self.flow_id.clone(),
                stream,
                line,
                at: Local::now(),
            };
            if tx.send(event).await.is_err() {
                tracing::debug!("📭 Log subscriber for {} went away", self.flow_id);
            }
        }
    }
}
