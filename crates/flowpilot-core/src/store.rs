//! File-based flow store: the whole flow list lives in one JSON array.
//! Every mutation rewrites the file through a temp file + rename.

use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{FlowPilotError, Result};
use crate::flow::{ERROR_SEPARATOR, ExecutionStatus, Flow, FlowStatus, StatusTimes};
use crate::traits::FlowStore;

/// Replace `path` with `contents` without ever leaving a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// JSON-backed [`FlowStore`]. With no path it keeps everything in memory.
pub struct JsonFlowStore {
    path: Option<PathBuf>,
    flows: Mutex<HashMap<String, Flow>>,
}

impl JsonFlowStore {
    /// Open (or create) a store at the given file.
    pub fn open(path: &Path) -> Self {
        let flows = load_flows(path);
        tracing::info!("📂 Loaded {} flows from {}", flows.len(), path.display());
        Self {
            path: Some(path.to_path_buf()),
            flows: Mutex::new(flows),
        }
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            flows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flow>> {
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, flows: &HashMap<String, Flow>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut list: Vec<&Flow> = flows.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let json = serde_json::to_vec_pretty(&list)?;
        write_atomic(path, &json)
            .map_err(|e| FlowPilotError::Store(format!("write {}: {e}", path.display())))
    }

    /// Apply `f` to one flow and persist. Unknown ids are a `NotFound`.
    fn mutate<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Flow),
    {
        let mut flows = self.lock();
        let flow = flows
            .get_mut(id)
            .ok_or_else(|| FlowPilotError::not_found(format!("flow {id}")))?;
        f(flow);
        self.persist(&flows)
    }

    /// Register a flow.
    pub fn add_flow(&self, flow: Flow) -> Result<Flow> {
        let mut flows = self.lock();
        tracing::info!("➕ Flow added: '{}' ({})", flow.name, flow.id);
        flows.insert(flow.id.clone(), flow.clone());
        self.persist(&flows)?;
        Ok(flow)
    }

    /// All flows, newest first.
    pub fn list_flows(&self) -> Vec<Flow> {
        let mut list: Vec<Flow> = self.lock().values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub fn set_flow_status(&self, id: &str, status: FlowStatus) -> Result<()> {
        self.mutate(id, |flow| {
            flow.status = status;
            flow.updated_at = Local::now();
        })
    }

    pub fn rename_flow(&self, id: &str, name: &str) -> Result<()> {
        self.mutate(id, |flow| {
            flow.name = name.to_string();
            flow.updated_at = Local::now();
        })
    }

    pub fn delete_flow(&self, id: &str) -> bool {
        let mut flows = self.lock();
        if flows.remove(id).is_none() {
            return false;
        }
        if let Err(e) = self.persist(&flows) {
            tracing::warn!("⚠️ Failed to save flows: {e}");
        }
        true
    }
}

fn load_flows(path: &Path) -> HashMap<String, Flow> {
    if !path.exists() {
        return HashMap::new();
    }
    let list: Vec<Flow> = match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("⚠️ Failed to parse {}: {e}", path.display());
            Vec::new()
        }),
        Err(e) => {
            tracing::warn!("⚠️ Failed to read {}: {e}", path.display());
            Vec::new()
        }
    };
    list.into_iter().map(|f| (f.id.clone(), f)).collect()
}

impl FlowStore for JsonFlowStore {
    fn get_flow(&self, id: &str) -> Option<Flow> {
        self.lock().get(id).cloned()
    }

    fn update_execution_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        times: StatusTimes,
    ) -> Result<()> {
        self.mutate(id, |flow| {
            flow.execution_status = status;
            flow.updated_at = Local::now();
            if let Some(start) = times.start {
                flow.execution_start_time = Some(start);
            }
            if let Some(end) = times.end {
                flow.execution_end_time = Some(end);
                flow.last_run_at = Some(end);
            }
            if let Some(duration) = times.duration_secs {
                flow.execution_duration = Some(duration);
            }
        })
    }

    fn update_execution_error(&self, id: &str, message: &str) -> Result<()> {
        self.mutate(id, |flow| match &mut flow.error_message {
            Some(existing) => {
                if !existing.contains(message) {
                    existing.push_str(ERROR_SEPARATOR);
                    existing.push_str(message);
                }
            }
            None => flow.error_message = Some(message.to_string()),
        })
    }

    fn add_execution_log(&self, id: &str, line: &str) -> Result<()> {
        let stamped = format!("[{}] {}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"), line);
        self.mutate(id, |flow| flow.execution_logs.push(stamped))
    }

    fn clear_execution_logs(&self, id: &str) -> Result<()> {
        self.mutate(id, |flow| {
            flow.execution_logs.clear();
            flow.error_message = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_accumulate_without_duplicates() {
        let store = JsonFlowStore::in_memory();
        let flow = store.add_flow(Flow::new("f", "/tmp/f")).unwrap();

        store.update_execution_error(&flow.id, "[LOAD] first").unwrap();
        store.update_execution_error(&flow.id, "[LOAD] first").unwrap();
        store.update_execution_error(&flow.id, "[GENERAL] second").unwrap();

        let msg = store.get_flow(&flow.id).unwrap().error_message.unwrap();
        assert_eq!(msg, "[LOAD] first\n\n---\n\n[GENERAL] second");
    }

    #[test]
    fn test_clear_logs_resets_error() {
        let store = JsonFlowStore::in_memory();
        let flow = store.add_flow(Flow::new("f", "/tmp/f")).unwrap();
        store.add_execution_log(&flow.id, "hello").unwrap();
        store.update_execution_error(&flow.id, "oops").unwrap();

        let loaded = store.get_flow(&flow.id).unwrap();
        assert_eq!(loaded.execution_logs.len(), 1);
        assert!(loaded.execution_logs[0].ends_with("] hello"));

        store.clear_execution_logs(&flow.id).unwrap();
        let loaded = store.get_flow(&flow.id).unwrap();
        assert!(loaded.execution_logs.is_empty());
        assert!(loaded.error_message.is_none());
    }

    #[test]
    fn test_status_end_time_sets_last_run() {
        let store = JsonFlowStore::in_memory();
        let flow = store.add_flow(Flow::new("f", "/tmp/f")).unwrap();
        let end = Local::now();
        store
            .update_execution_status(&flow.id, ExecutionStatus::Success, StatusTimes::finished(end, 1.5))
            .unwrap();
        let loaded = store.get_flow(&flow.id).unwrap();
        assert_eq!(loaded.execution_status, ExecutionStatus::Success);
        assert_eq!(loaded.last_run_at, Some(end));
        assert_eq!(loaded.execution_duration, Some(1.5));
    }

    #[test]
    fn test_unknown_flow_is_not_found() {
        let store = JsonFlowStore::in_memory();
        let err = store.add_execution_log("missing", "x").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = std::env::temp_dir().join(format!("flowpilot-flows-{}", uuid::Uuid::new_v4()));
        let path = dir.join("flows.json");
        let id = {
            let store = JsonFlowStore::open(&path);
            let flow = store.add_flow(Flow::new("orders", dir.join("orders"))).unwrap();
            store.set_flow_status(&flow.id, FlowStatus::Ready).unwrap();
            flow.id
        };
        assert!(!dir.join("flows.json.tmp").exists());

        let reopened = JsonFlowStore::open(&path);
        let flow = reopened.get_flow(&id).unwrap();
        assert_eq!(flow.name, "orders");
        assert!(flow.is_ready());
        std::fs::remove_dir_all(&dir).ok();
    }
}
