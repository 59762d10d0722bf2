//! Job Executor: runs a flow's pipeline as a child process, streams its
//! output into the flow log, classifies failures by stage and records the
//! outcome on the flow.
//!
//! Each run is one tokio task that owns the child, two reader tasks
//! (stdout, stderr) that own their captured lines, and a supervision
//! ticker that kills the process early once a stage error was seen.

use chrono::Local;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use flowpilot_core::config::ExecutorConfig;
use flowpilot_core::error::{FlowPilotError, Result};
use flowpilot_core::flow::{ErrorTag, ExecutionStatus, Flow, StatusTimes};
use flowpilot_core::traits::{FlowRunner, FlowStore};

use crate::classify::StageClassifier;
use crate::logs::{LogEvent, LogSink, LogStream};
use crate::process;
use crate::runs::{RunId, RunInfo, RunRegistry};

/// Records stage errors for one run and remembers whether any was seen.
struct StageTracker {
    flow_id: String,
    store: Arc<dyn FlowStore>,
    classifier: Arc<StageClassifier>,
    detected: AtomicBool,
}

impl StageTracker {
    fn observe(&self, line: &str) {
        let Some(stage) = self.classifier.classify(line) else {
            return;
        };
        if let Err(e) = self
            .store
            .update_execution_error(&self.flow_id, &stage.tag(line.trim()))
        {
            tracing::warn!("⚠️ Failed to record error for {}: {e}", self.flow_id);
        }
        if !self.detected.swap(true, Ordering::SeqCst) {
            tracing::warn!("🔎 {stage} error detected in flow {}", self.flow_id);
        }
    }

    fn detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }
}

/// How the supervision loop ended.
enum Exit {
    Natural(ExitStatus),
    FailFast,
    Stop(oneshot::Sender<()>),
}

/// What a run produced.
enum RunOutcome {
    Finished {
        status: Option<ExitStatus>,
        stderr: Vec<String>,
        stage_error: bool,
        /// Killed by fail-fast; never a success whatever the exit code.
        terminated: bool,
    },
    Stopped(oneshot::Sender<()>),
}

/// Launches and supervises pipeline processes.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn FlowStore>,
    runs: Arc<RunRegistry>,
    config: Arc<ExecutorConfig>,
    classifier: Arc<StageClassifier>,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn FlowStore>, config: ExecutorConfig) -> Result<Self> {
        let classifier = StageClassifier::new()
            .map_err(|e| FlowPilotError::Config(format!("stage patterns: {e}")))?;
        Ok(Self {
            store,
            runs: Arc::new(RunRegistry::new()),
            config: Arc::new(config),
            classifier: Arc::new(classifier),
        })
    }

    /// Start a run in the background. Returns false when the flow is
    /// unknown, not ready, or already running. Needs a tokio runtime.
    pub fn execute(&self, flow_id: &str) -> bool {
        self.start(flow_id, None)
    }

    /// Like [`execute`](Self::execute), also returning the run's log
    /// events. The channel closes when the run is over.
    pub fn execute_streaming(&self, flow_id: &str) -> Option<mpsc::Receiver<LogEvent>> {
        let (tx, rx) = mpsc::channel(self.config.log_channel_capacity.max(1));
        self.start(flow_id, Some(tx)).then_some(rx)
    }

    pub fn is_running(&self, flow_id: &str) -> bool {
        self.runs.contains(flow_id)
    }

    pub fn running_flows(&self) -> Vec<String> {
        self.runs.running()
    }

    pub fn run_info(&self, flow_id: &str) -> Option<RunInfo> {
        self.runs.info(flow_id)
    }

    /// Stop a running flow: terminate, escalate to kill after the grace
    /// period, mark it Interrupted. False when it was not running or a
    /// stop is already under way.
    pub async fn stop(&self, flow_id: &str) -> bool {
        let Some((run_id, stop_tx)) = self.runs.take_stop(flow_id) else {
            return false;
        };
        tracing::info!("⏹️ Stopping flow {flow_id}");
        let (ack_tx, ack_rx) = oneshot::channel();
        if stop_tx.send(ack_tx).is_ok() {
            let limit = self.config.grace_period() + self.config.reader_join_timeout() * 2;
            if tokio::time::timeout(limit, ack_rx).await.is_err() {
                tracing::warn!("⚠️ Flow {flow_id} did not confirm stop within {limit:?}");
            }
        }

        self.runs.release(flow_id, run_id, |started| {
            let end = Local::now();
            let duration = (end - started).num_milliseconds() as f64 / 1000.0;
            self.set_status(flow_id, ExecutionStatus::Interrupted, StatusTimes::finished(end, duration));
        });
        true
    }

    fn start(&self, flow_id: &str, subscriber: Option<mpsc::Sender<LogEvent>>) -> bool {
        let Some(flow) = self.store.get_flow(flow_id) else {
            tracing::warn!("⚠️ Cannot run unknown flow {flow_id}");
            return false;
        };
        if !flow.is_ready() {
            tracing::warn!("⚠️ Flow '{}' is not ready ({})", flow.name, flow.status);
            return false;
        }
        let started = Local::now();
        let (stop_tx, stop_rx) = oneshot::channel();
        let Some(run_id) = self.runs.try_reserve(flow_id, started, stop_tx) else {
            tracing::warn!("⚠️ Flow '{}' is already running", flow.name);
            return false;
        };

        if let Err(e) = self.store.clear_execution_logs(flow_id) {
            tracing::warn!("⚠️ Failed to clear logs of {flow_id}: {e}");
        }
        self.set_status(flow_id, ExecutionStatus::Running, StatusTimes::started(started));
        tracing::info!("🚀 Flow '{}' started", flow.name);

        let sink = LogSink::new(flow_id, Arc::clone(&self.store), subscriber);
        let this = self.clone();
        tokio::spawn(async move { this.run(flow, run_id, sink, stop_rx).await });
        true
    }

    async fn run(
        self,
        flow: Flow,
        run_id: RunId,
        sink: LogSink,
        stop_rx: oneshot::Receiver<oneshot::Sender<()>>,
    ) {
        let clock = Instant::now();
        sink.emit(LogStream::Executor, "🚀 Starting flow execution").await;

        let outcome = match self.supervise(&flow, run_id, &sink, stop_rx).await {
            Ok(RunOutcome::Stopped(ack)) => {
                sink.emit(LogStream::Executor, "⏹️ Execution interrupted by user").await;
                // `stop` removes the entry and records Interrupted.
                ack.send(()).ok();
                return;
            }
            other => other,
        };
        // A stop that raced a natural exit owns the outcome.
        if !self.runs.seal(&flow.id, run_id) {
            tracing::debug!("Outcome of {} is owned by a pending stop", flow.id);
            return;
        }

        match outcome {
            Ok(RunOutcome::Stopped(_)) => {}
            Ok(RunOutcome::Finished {
                status,
                stderr,
                stage_error,
                terminated,
            }) => {
                let duration = clock.elapsed().as_secs_f64();
                let code = status.and_then(|s| s.code());
                if code == Some(0) && !terminated {
                    sink.emit(
                        LogStream::Executor,
                        format!("✅ Completed successfully in {duration:.2}s"),
                    )
                    .await;
                    tracing::info!("✅ Flow '{}' succeeded in {duration:.2}s", flow.name);
                    self.finish(&flow.id, run_id, ExecutionStatus::Success, duration);
                } else {
                    let exit = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                    sink.emit(LogStream::Executor, format!("❌ Failed with exit code {exit}"))
                        .await;
                    if !stage_error {
                        let detail = if stderr.is_empty() {
                            format!("process exited with code {exit}")
                        } else {
                            stderr.join("\n")
                        };
                        self.record_error(&flow.id, &ErrorTag::General.tag(&detail));
                    }
                    tracing::warn!("❌ Flow '{}' failed (exit {exit})", flow.name);
                    self.finish(&flow.id, run_id, ExecutionStatus::Failure, duration);
                }
            }
            Err(e) => {
                let duration = clock.elapsed().as_secs_f64();
                sink.emit(LogStream::Executor, format!("💥 {e}")).await;
                self.record_error(&flow.id, &ErrorTag::Executor.tag(&e.to_string()));
                tracing::error!("💥 Flow '{}' could not run: {e}", flow.name);
                self.finish(&flow.id, run_id, ExecutionStatus::Error, duration);
            }
        }
    }

    async fn supervise(
        &self,
        flow: &Flow,
        run_id: RunId,
        sink: &LogSink,
        mut stop_rx: oneshot::Receiver<oneshot::Sender<()>>,
    ) -> Result<RunOutcome> {
        let entry = process::find_entry_point(&flow.project_path, &self.config.entry_extension)?;
        sink.emit(LogStream::Executor, format!("📁 Running: {}", entry.display()))
            .await;
        let mut child = process::spawn_pipeline(&self.config, &flow.project_path, &entry)?;
        self.runs.set_pid(&flow.id, run_id, child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FlowPilotError::Executor("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FlowPilotError::Executor("stderr was not captured".into()))?;
        let tracker = Arc::new(StageTracker {
            flow_id: flow.id.clone(),
            store: Arc::clone(&self.store),
            classifier: Arc::clone(&self.classifier),
            detected: AtomicBool::new(false),
        });
        let out_reader = tokio::spawn(read_stream(
            stdout,
            LogStream::Stdout,
            sink.clone(),
            Arc::clone(&tracker),
        ));
        let err_reader = tokio::spawn(read_stream(
            stderr,
            LogStream::Stderr,
            sink.clone(),
            Arc::clone(&tracker),
        ));

        let mut ticker = tokio::time::interval(self.config.supervise_interval());
        let mut stop_open = true;
        let exit = loop {
            tokio::select! {
                status = child.wait() => break Exit::Natural(status?),
                request = &mut stop_rx, if stop_open => match request {
                    Ok(ack) => break Exit::Stop(ack),
                    Err(_) => stop_open = false,
                },
                _ = ticker.tick() => {
                    if tracker.detected() {
                        break Exit::FailFast;
                    }
                }
            }
        };

        let grace = self.config.grace_period();
        let terminated = matches!(exit, Exit::FailFast);
        let status = match exit {
            Exit::Natural(status) => Some(status),
            Exit::FailFast => {
                sink.emit(
                    LogStream::Executor,
                    "🛑 Error detected, terminating pipeline",
                )
                .await;
                process::terminate(&mut child, grace).await
            }
            Exit::Stop(ack) => {
                process::terminate(&mut child, grace).await;
                let limit = self.config.reader_join_timeout();
                join_reader(out_reader, limit).await;
                join_reader(err_reader, limit).await;
                return Ok(RunOutcome::Stopped(ack));
            }
        };

        let limit = self.config.reader_join_timeout();
        let _stdout_lines = join_reader(out_reader, limit).await;
        let stderr_lines = join_reader(err_reader, limit).await;
        Ok(RunOutcome::Finished {
            status,
            stderr: stderr_lines,
            stage_error: tracker.detected(),
            terminated,
        })
    }

    fn set_status(&self, flow_id: &str, status: ExecutionStatus, times: StatusTimes) {
        if let Err(e) = self.store.update_execution_status(flow_id, status, times) {
            tracing::warn!("⚠️ Failed to set {flow_id} to {status}: {e}");
        }
    }

    fn record_error(&self, flow_id: &str, message: &str) {
        if let Err(e) = self.store.update_execution_error(flow_id, message) {
            tracing::warn!("⚠️ Failed to record error for {flow_id}: {e}");
        }
    }

    /// Record the final status of a sealed run and release its entry.
    fn finish(&self, flow_id: &str, run_id: RunId, status: ExecutionStatus, duration: f64) {
        let released = self.runs.release(flow_id, run_id, |_| {
            self.set_status(flow_id, status, StatusTimes::finished(Local::now(), duration));
        });
        if !released {
            tracing::warn!("⚠️ Run entry of {flow_id} vanished before it was released");
        }
    }
}

#[async_trait]
impl FlowRunner for JobExecutor {
    async fn execute_flow(&self, flow_id: &str) -> bool {
        self.execute(flow_id)
    }
}

/// Forward every line of a stream and return the lines it captured.
async fn read_stream<R>(
    reader: R,
    stream: LogStream,
    sink: LogSink,
    tracker: Arc<StageTracker>,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut captured = Vec::new();
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
                sink.emit(stream, line.as_str()).await;
                tracker.observe(&line);
                captured.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {stream:?} of {}: {e}", tracker.flow_id);
                break;
            }
        }
    }
    captured
}

/// Join a reader, giving up after `limit` (a grandchild may keep the pipe
/// open after the pipeline itself is gone).
async fn join_reader(mut reader: JoinHandle<Vec<String>>, limit: Duration) -> Vec<String> {
    match tokio::time::timeout(limit, &mut reader).await {
        Ok(Ok(lines)) => lines,
        Ok(Err(e)) => {
            tracing::warn!("⚠️ Stream reader failed: {e}");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("⏱️ Stream reader still busy after {limit:?}, abandoning it");
            reader.abort();
            Vec::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use flowpilot_core::flow::FlowStatus;
    use flowpilot_core::store::JsonFlowStore;
    use std::path::PathBuf;

    struct Harness {
        executor: JobExecutor,
        store: Arc<JsonFlowStore>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn harness_with(tune: impl FnOnce(&mut ExecutorConfig)) -> Harness {
        let dir = std::env::temp_dir().join(format!("flowpilot-exec-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = Arc::new(JsonFlowStore::in_memory());
        let mut config = ExecutorConfig {
            interpreter: "sh".into(),
            interpreter_args: Vec::new(),
            entry_extension: "sh".into(),
            grace_period_secs: 1,
            supervise_interval_ms: 50,
            reader_join_timeout_secs: 1,
            log_channel_capacity: 64,
            ..Default::default()
        };
        tune(&mut config);
        let executor = JobExecutor::new(store.clone(), config).unwrap();
        Harness {
            executor,
            store,
            dir,
        }
    }

    impl Harness {
        /// Register a ready flow whose pipeline is the given shell script.
        fn flow(&self, name: &str, script: &str) -> String {
            let project = self.dir.join(name);
            let pipelines = project.join(process::PIPELINES_DIR);
            std::fs::create_dir_all(&pipelines).unwrap();
            std::fs::write(pipelines.join("main.sh"), script).unwrap();
            let flow = self.store.add_flow(Flow::new(name, project)).unwrap();
            self.store.set_flow_status(&flow.id, FlowStatus::Ready).unwrap();
            flow.id
        }

        fn get(&self, id: &str) -> Flow {
            self.store.get_flow(id).unwrap()
        }

        fn script(&self, id: &str) -> PathBuf {
            self.get(id)
                .project_path
                .join(process::PIPELINES_DIR)
                .join("main.sh")
        }

        async fn wait_idle(&self, id: &str) {
            for _ in 0..200 {
                if !self.executor.is_running(id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            panic!("flow {id} still running");
        }
    }

    #[tokio::test]
    async fn test_successful_run() {
        let h = harness();
        let id = h.flow("ok", "echo extracting\necho done\n");
        assert!(h.executor.execute(&id));
        h.wait_idle(&id).await;

        let flow = h.get(&id);
        assert_eq!(flow.execution_status, ExecutionStatus::Success);
        assert!(flow.execution_duration.is_some());
        assert!(flow.last_run_at.is_some());
        assert!(flow.error_message.is_none());
        let logs = flow.execution_logs.join("\n");
        assert!(logs.contains("🚀 Starting flow execution"));
        assert!(logs.contains("📁 Running:"));
        assert!(logs.contains("] done"));
        assert!(logs.contains("✅ Completed successfully in"));
    }

    #[tokio::test]
    async fn test_failure_without_stage_records_general() {
        let h = harness();
        let id = h.flow("bad", "echo 'something odd' >&2\nexit 3\n");
        assert!(h.executor.execute(&id));
        h.wait_idle(&id).await;

        let flow = h.get(&id);
        assert_eq!(flow.execution_status, ExecutionStatus::Failure);
        assert_eq!(flow.error_message.as_deref(), Some("[GENERAL] something odd"));
        assert!(flow.execution_logs.iter().any(|l| l.contains("❌ Failed with exit code 3")));
    }

    #[tokio::test]
    async fn test_stage_error_fails_fast() {
        let h = harness();
        let id = h.flow(
            "extract",
            "echo 'ERROR: extraction failed, FileNotFoundError: input.csv' >&2\nexec sleep 30\n",
        );
        let started = Instant::now();
        assert!(h.executor.execute(&id));
        h.wait_idle(&id).await;

        // Terminated long before the sleep would have ended.
        assert!(started.elapsed() < Duration::from_secs(10));
        let flow = h.get(&id);
        assert_eq!(flow.execution_status, ExecutionStatus::Failure);
        assert_eq!(flow.error_stage(), Some("EXTRACTION"));
        assert!(flow.execution_logs.iter().any(|l| l.contains("🛑 Error detected")));
    }

    #[tokio::test]
    async fn test_missing_entry_point_is_executor_error() {
        let h = harness();
        let project = h.dir.join("empty");
        std::fs::create_dir_all(&project).unwrap();
        let flow = h.store.add_flow(Flow::new("empty", project)).unwrap();
        h.store.set_flow_status(&flow.id, FlowStatus::Ready).unwrap();

        assert!(h.executor.execute(&flow.id));
        h.wait_idle(&flow.id).await;
        let flow = h.get(&flow.id);
        assert_eq!(flow.execution_status, ExecutionStatus::Error);
        assert!(flow.error_message.unwrap().starts_with("[EXECUTOR]"));
    }

    #[tokio::test]
    async fn test_preconditions() {
        let h = harness();
        assert!(!h.executor.execute("unknown"));

        let id = h.flow("slow", "exec sleep 30\n");
        h.store.set_flow_status(&id, FlowStatus::Importing).unwrap();
        assert!(!h.executor.execute(&id));

        h.store.set_flow_status(&id, FlowStatus::Ready).unwrap();
        assert!(h.executor.execute(&id));
        assert!(h.executor.is_running(&id));
        assert!(!h.executor.execute(&id));
        assert_eq!(h.executor.running_flows(), vec![id.clone()]);

        assert!(h.executor.stop(&id).await);
        assert!(!h.executor.is_running(&id));
    }

    #[tokio::test]
    async fn test_stop_marks_interrupted() {
        let h = harness();
        let id = h.flow("long", "echo begin\nexec sleep 30\n");
        assert!(h.executor.execute(&id));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.executor.stop(&id).await);
        assert!(!h.executor.is_running(&id));
        assert!(!h.executor.stop(&id).await);

        let flow = h.get(&id);
        assert_eq!(flow.execution_status, ExecutionStatus::Interrupted);
        assert!(flow.execution_end_time.is_some());
        assert!(flow
            .execution_logs
            .iter()
            .any(|l| l.contains("⏹️ Execution interrupted by user")));
    }

    #[tokio::test]
    async fn test_stop_kills_process_ignoring_terminate() {
        let h = harness();
        let id = h.flow("stubborn", "trap '' TERM\nwhile true; do sleep 0.1; done\n");
        assert!(h.executor.execute(&id));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(h.executor.stop(&id).await);
        assert!(!h.executor.is_running(&id));
        assert_eq!(h.get(&id).execution_status, ExecutionStatus::Interrupted);
    }

    /// Receive events until one starts with `prefix`.
    async fn drain_until(rx: &mut mpsc::Receiver<LogEvent>, prefix: &str) {
        while let Some(event) = rx.recv().await {
            if event.line.starts_with(prefix) {
                return;
            }
        }
        panic!("log closed before a line starting with {prefix:?}");
    }

    #[tokio::test]
    async fn test_stop_racing_natural_exit_stays_interrupted() {
        // A one-slot log channel nobody drains keeps the run task busy
        // after the pipeline has already exited on its own.
        let h = harness_with(|c| c.log_channel_capacity = 1);
        let id = h.flow("racy", "echo a\necho b\necho c\nexit 0\n");
        let mut events = h.executor.execute_streaming(&id).unwrap();
        drain_until(&mut events, "📁 Running:").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.executor.stop(&id).await);
        assert!(!h.executor.is_running(&id));
        assert_eq!(h.get(&id).execution_status, ExecutionStatus::Interrupted);

        // Let the run task wind down; it must not overwrite the stop.
        while events.recv().await.is_some() {}
        let flow = h.get(&id);
        assert_eq!(flow.execution_status, ExecutionStatus::Interrupted);
        assert!(!flow.execution_logs.iter().any(|l| l.contains("✅")));
    }

    #[tokio::test]
    async fn test_stale_run_leaves_next_run_alone() {
        let h = harness_with(|c| c.log_channel_capacity = 1);
        let id = h.flow("twice", "echo a\necho b\necho c\n");
        let mut first = h.executor.execute_streaming(&id).unwrap();
        drain_until(&mut first, "📁 Running:").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.executor.stop(&id).await);

        std::fs::write(h.script(&id), "exec sleep 30\n").unwrap();
        assert!(h.executor.execute(&id));
        let second = h.executor.run_info(&id).unwrap();

        // The first run's task finishes while the second one is running.
        while first.recv().await.is_some() {}
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.executor.is_running(&id));
        assert_eq!(h.executor.run_info(&id).unwrap().run_id, second.run_id);
        assert_eq!(h.get(&id).execution_status, ExecutionStatus::Running);
        assert!(!h.executor.execute(&id));

        assert!(h.executor.stop(&id).await);
        assert!(!h.executor.is_running(&id));
        assert_eq!(h.get(&id).execution_status, ExecutionStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_stop_not_running() {
        let h = harness();
        let id = h.flow("idle", "exit 0\n");
        assert!(!h.executor.stop(&id).await);
        assert_eq!(h.get(&id).execution_status, ExecutionStatus::NeverRun);
    }

    #[tokio::test]
    async fn test_streaming_receives_events_until_done() {
        let h = harness();
        let id = h.flow("stream", "echo one\necho two >&2\n");
        let mut rx = h.executor.execute_streaming(&id).unwrap();

        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            lines.push((event.stream, event.line));
        }
        assert!(lines.contains(&(LogStream::Stdout, "one".to_string())));
        assert!(lines.contains(&(LogStream::Stderr, "two".to_string())));
        assert!(lines
            .last()
            .is_some_and(|(stream, line)| *stream == LogStream::Executor && line.starts_with("✅")));

        h.wait_idle(&id).await;
        assert!(h.executor.execute_streaming("unknown").is_none());
    }

    #[tokio::test]
    async fn test_rerun_clears_previous_logs() {
        let h = harness();
        let id = h.flow("again", "echo 'load failed: connection refused' >&2\nexit 1\n");
        assert!(h.executor.execute(&id));
        h.wait_idle(&id).await;
        let first = h.get(&id);
        assert!(first.error_message.as_deref().is_some_and(|m| m.starts_with("[LOAD]")));

        std::fs::write(
            first.project_path.join(process::PIPELINES_DIR).join("main.sh"),
            "echo fine\n",
        )
        .unwrap();
        assert!(h.executor.execute(&id));
        h.wait_idle(&id).await;
        let second = h.get(&id);
        assert_eq!(second.execution_status, ExecutionStatus::Success);
        assert!(second.error_message.is_none());
        assert!(!second.execution_logs.iter().any(|l| l.contains("load failed")));
    }
}
