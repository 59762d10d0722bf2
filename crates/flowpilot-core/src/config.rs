//! FlowPilot configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowPilotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPilotConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
}

fn default_data_dir() -> String { "~/.flowpilot".into() }

impl Default for FlowPilotConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            flows: FlowsConfig::default(),
        }
    }
}

impl FlowPilotConfig {
    /// Load config from the default path (~/.flowpilot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowPilotError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FlowPilotError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlowPilotError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(FlowPilotError::Config("scheduler.poll_interval_ms must be > 0".into()));
        }
        if self.executor.supervise_interval_ms == 0 {
            return Err(FlowPilotError::Config("executor.supervise_interval_ms must be > 0".into()));
        }
        if self.executor.log_channel_capacity == 0 {
            return Err(FlowPilotError::Config("executor.log_channel_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the FlowPilot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowpilot")
    }

    /// Data directory with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }

    /// Full path of the schedules JSON file.
    pub fn schedules_path(&self) -> PathBuf {
        self.data_path().join(&self.scheduler.schedules_file)
    }

    /// Full path of the flows JSON file.
    pub fn flows_path(&self) -> PathBuf {
        self.data_path().join(&self.flows.flows_file)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_schedules_file")]
    pub schedules_file: String,
}

fn default_poll_interval_ms() -> u64 { 1000 }
fn default_error_backoff_secs() -> u64 { 5 }
fn default_schedules_file() -> String { "schedules.json".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_secs: default_error_backoff_secs(),
            schedules_file: default_schedules_file(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Job executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Program used to run a pipeline entry point.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments placed before the entry point path.
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// Extension of pipeline entry files, without the dot.
    #[serde(default = "default_entry_extension")]
    pub entry_extension: String,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_supervise_interval_ms")]
    pub supervise_interval_ms: u64,
    #[serde(default = "default_reader_join_timeout_secs")]
    pub reader_join_timeout_secs: u64,
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,
    /// Extra environment for every pipeline process.
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,
}

fn default_interpreter() -> String { "python3".into() }
fn default_interpreter_args() -> Vec<String> {
    vec!["-u", "-X", "faulthandler"]
        .into_iter().map(String::from).collect()
}
fn default_entry_extension() -> String { "py".into() }
fn default_grace_period_secs() -> u64 { 5 }
fn default_supervise_interval_ms() -> u64 { 500 }
fn default_reader_join_timeout_secs() -> u64 { 5 }
fn default_log_channel_capacity() -> usize { 256 }
fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ("PYTHONFAULTHANDLER".to_string(), "1".to_string()),
    ])
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            entry_extension: default_entry_extension(),
            grace_period_secs: default_grace_period_secs(),
            supervise_interval_ms: default_supervise_interval_ms(),
            reader_join_timeout_secs: default_reader_join_timeout_secs(),
            log_channel_capacity: default_log_channel_capacity(),
            env: default_env(),
        }
    }
}

impl ExecutorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn supervise_interval(&self) -> Duration {
        Duration::from_millis(self.supervise_interval_ms)
    }

    pub fn reader_join_timeout(&self) -> Duration {
        Duration::from_secs(self.reader_join_timeout_secs)
    }
}

/// Flow store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    #[serde(default = "default_flows_file")]
    pub flows_file: String,
}

fn default_flows_file() -> String { "flows.json".into() }

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            flows_file: default_flows_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = FlowPilotConfig::parse("").unwrap();
        assert_eq!(config.scheduler.poll_interval_ms, 1000);
        assert_eq!(config.scheduler.error_backoff_secs, 5);
        assert_eq!(config.executor.grace_period_secs, 5);
        assert_eq!(config.executor.supervise_interval_ms, 500);
        assert_eq!(config.executor.interpreter, "python3");
        assert_eq!(config.executor.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_partial_override() {
        let config = FlowPilotConfig::parse(
            r#"
            data_dir = "/var/lib/flowpilot"

            [executor]
            interpreter = "sh"
            entry_extension = "sh"
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.interpreter, "sh");
        assert_eq!(config.executor.entry_extension, "sh");
        assert_eq!(config.executor.grace_period_secs, 5);
        assert_eq!(
            config.schedules_path(),
            PathBuf::from("/var/lib/flowpilot/schedules.json")
        );
        assert_eq!(config.flows_path(), PathBuf::from("/var/lib/flowpilot/flows.json"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = FlowPilotConfig::parse("[scheduler]\npoll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, FlowPilotError::Config(_)));
    }
}
