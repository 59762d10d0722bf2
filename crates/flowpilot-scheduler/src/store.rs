//! File-based schedule store: all schedules in one JSON array.
//! Read once at startup, rewritten in full (temp file + rename) on change.

use std::path::{Path, PathBuf};

use flowpilot_core::error::{FlowPilotError, Result};
use flowpilot_core::store::write_atomic;

use crate::schedule::ScheduleConfig;

/// File-based schedule store. With no path it never touches disk.
pub struct ScheduleStore {
    path: Option<PathBuf>,
}

impl ScheduleStore {
    /// Store backed by the given JSON file.
    pub fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Save all schedules to disk.
    pub fn save(&self, schedules: &[ScheduleConfig]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(schedules)?;
        write_atomic(path, &json)
            .map_err(|e| FlowPilotError::Store(format!("write {}: {e}", path.display())))?;
        tracing::debug!("💾 Saved {} schedules to {}", schedules.len(), path.display());
        Ok(())
    }

    /// Load schedules from disk. A missing or unreadable file yields none.
    pub fn load(&self) -> Vec<ScheduleConfig> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        if !path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse {}: {e}", path.display());
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {}: {e}", path.display());
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleKind;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    #[test]
    fn test_save_and_load_roundtrip_keeps_all_kinds() {
        let dir = std::env::temp_dir().join(format!("flowpilot-sched-{}", uuid::Uuid::new_v4()));
        let path = dir.join("schedules.json");
        let store = ScheduleStore::new(&path);
        let now = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut day_times = BTreeMap::new();
        day_times.insert("monday".to_string(), vec!["09:00".to_string()]);
        let schedules = vec![
            ScheduleConfig::new("f1", "Orders", ScheduleKind::daily("09:00").unwrap(), None, now),
            ScheduleConfig::new(
                "f2",
                "Stock",
                ScheduleKind::interval(30, "08:00", "18:00", &["monday", "friday"]).unwrap(),
                Some("half-hourly".to_string()),
                now,
            ),
            ScheduleConfig::new(
                "f3",
                "Sales",
                ScheduleKind::day_specific(&day_times).unwrap(),
                None,
                now,
            ),
        ];
        store.save(&schedules).unwrap();
        assert!(!dir.join("schedules.json.tmp").exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"schedule_type\": \"interval\""));

        let loaded = store.load();
        assert_eq!(loaded, schedules);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = std::env::temp_dir().join(format!("flowpilot-sched-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("schedules.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ScheduleStore::new(&path).load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_in_memory_store_is_noop() {
        let store = ScheduleStore::in_memory();
        store.save(&[]).unwrap();
        assert!(store.load().is_empty());
        assert!(store.path().is_none());
    }
}
