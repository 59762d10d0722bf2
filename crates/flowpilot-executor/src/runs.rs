//! Run Registry: the in-memory map of flows that are currently executing.
//!
//! Every reservation gets a fresh [`RunId`]; an entry can only be sealed or
//! released by the run that owns that id, so a late task from an earlier
//! run never touches a newer run of the same flow.
//!
//! Ownership of the outcome goes to whoever takes the stop channel first:
//! `stop` (via [`RunRegistry::take_stop`]) or the run task itself (via
//! [`RunRegistry::seal`]). The owner records the final status and releases
//! the entry, exactly once.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Sent to a run to ask it to stop; the run replies on the inner sender
/// once the process is gone.
pub type StopRequest = oneshot::Sender<oneshot::Sender<()>>;

/// Identifies one run of a flow.
pub type RunId = u64;

struct RunHandle {
    run_id: RunId,
    pid: Option<u32>,
    started_at: DateTime<Local>,
    /// `None` once a stop was requested or the run sealed its outcome.
    stop_tx: Option<StopRequest>,
}

/// Snapshot of a running flow.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub flow_id: String,
    pub run_id: RunId,
    pub pid: Option<u32>,
    pub started_at: DateTime<Local>,
    /// Stopping, or already recording its outcome.
    pub stopping: bool,
}

#[derive(Default)]
struct Runs {
    next_id: RunId,
    active: HashMap<String, RunHandle>,
}

#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<Runs>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `flow_id` for a new run. `None` if it is already running.
    pub fn try_reserve(
        &self,
        flow_id: &str,
        started_at: DateTime<Local>,
        stop_tx: StopRequest,
    ) -> Option<RunId> {
        let mut runs = self.lock();
        if runs.active.contains_key(flow_id) {
            return None;
        }
        runs.next_id += 1;
        let run_id = runs.next_id;
        runs.active.insert(
            flow_id.to_string(),
            RunHandle {
                run_id,
                pid: None,
                started_at,
                stop_tx: Some(stop_tx),
            },
        );
        Some(run_id)
    }

    pub fn set_pid(&self, flow_id: &str, run_id: RunId, pid: Option<u32>) {
        match self.lock().active.get_mut(flow_id) {
            Some(run) if run.run_id == run_id => run.pid = pid,
            _ => {}
        }
    }

    pub fn contains(&self, flow_id: &str) -> bool {
        self.lock().active.contains_key(flow_id)
    }

    /// Take the stop channel, making the caller the owner of the outcome.
    /// `None` when the flow is not running, a stop is already under way, or
    /// the run is recording its own outcome.
    pub fn take_stop(&self, flow_id: &str) -> Option<(RunId, StopRequest)> {
        let mut runs = self.lock();
        let run = runs.active.get_mut(flow_id)?;
        let stop_tx = run.stop_tx.take()?;
        Some((run.run_id, stop_tx))
    }

    /// Called by the run task before it records its outcome. False when a
    /// stop got there first (or the entry belongs to another run); the
    /// task must then leave status and entry alone.
    pub fn seal(&self, flow_id: &str, run_id: RunId) -> bool {
        match self.lock().active.get_mut(flow_id) {
            Some(run) if run.run_id == run_id => run.stop_tx.take().is_some(),
            _ => false,
        }
    }

    /// Remove the entry of `run_id`, calling `record` with its start time
    /// while the registry is still locked, so no new run of the flow can
    /// start before the final status is written. False when the entry is
    /// gone or belongs to another run.
    pub fn release(
        &self,
        flow_id: &str,
        run_id: RunId,
        record: impl FnOnce(DateTime<Local>),
    ) -> bool {
        let mut runs = self.lock();
        match runs.active.get(flow_id) {
            Some(run) if run.run_id == run_id => {}
            _ => return false,
        }
        if let Some(run) = runs.active.remove(flow_id) {
            record(run.started_at);
        }
        true
    }

    pub fn info(&self, flow_id: &str) -> Option<RunInfo> {
        self.lock().active.get(flow_id).map(|run| RunInfo {
            flow_id: flow_id.to_string(),
            run_id: run.run_id,
            pid: run.pid,
            started_at: run.started_at,
            stopping: run.stop_tx.is_none(),
        })
    }

    /// Ids of running flows, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(runs: &RunRegistry, flow_id: &str) -> Option<RunId> {
        let (tx, _rx) = oneshot::channel();
        runs.try_reserve(flow_id, Local::now(), tx)
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let runs = RunRegistry::new();
        assert!(reserve(&runs, "f").is_some());
        assert!(reserve(&runs, "f").is_none());
        assert!(runs.contains("f"));
        assert_eq!(runs.running(), vec!["f".to_string()]);
    }

    #[test]
    fn test_seal_then_release_once() {
        let runs = RunRegistry::new();
        let id = reserve(&runs, "f").unwrap();
        runs.set_pid("f", id, Some(42));
        assert_eq!(runs.info("f").unwrap().pid, Some(42));

        assert!(runs.seal("f", id));
        assert!(!runs.seal("f", id));
        // A sealed run can no longer be stopped.
        assert!(runs.take_stop("f").is_none());

        let mut recorded = 0;
        assert!(runs.release("f", id, |_| recorded += 1));
        assert!(!runs.release("f", id, |_| recorded += 1));
        assert_eq!(recorded, 1);
        assert!(runs.is_empty());
    }

    #[test]
    fn test_stop_owns_outcome() {
        let runs = RunRegistry::new();
        let id = reserve(&runs, "f").unwrap();

        let (stop_id, _tx) = runs.take_stop("f").unwrap();
        assert_eq!(stop_id, id);
        assert!(runs.take_stop("f").is_none());
        assert!(runs.info("f").unwrap().stopping);

        // The run task finishing must not claim a stopping entry.
        assert!(!runs.seal("f", id));
        assert!(runs.contains("f"));
        assert!(runs.release("f", stop_id, |_| {}));
        assert!(!runs.contains("f"));
    }

    #[test]
    fn test_stale_run_cannot_touch_newer_run() {
        let runs = RunRegistry::new();
        let first = reserve(&runs, "f").unwrap();
        let (stop_id, _tx) = runs.take_stop("f").unwrap();
        assert!(runs.release("f", stop_id, |_| {}));

        let second = reserve(&runs, "f").unwrap();
        assert_ne!(first, second);

        // Late calls from the first run are ignored.
        runs.set_pid("f", first, Some(7));
        assert!(!runs.seal("f", first));
        assert!(!runs.release("f", first, |_| panic!("released the wrong run")));
        assert!(runs.contains("f"));
        assert_eq!(runs.info("f").unwrap().pid, None);
        assert!(!runs.info("f").unwrap().stopping);
    }

    #[test]
    fn test_take_stop_unknown_flow() {
        let runs = RunRegistry::new();
        assert!(runs.take_stop("nope").is_none());
        assert!(runs.info("nope").is_none());
    }
}
