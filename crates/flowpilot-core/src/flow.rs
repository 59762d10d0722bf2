//! Flow model: a generated pipeline program plus its execution metadata.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Separator placed between accumulated error messages.
pub const ERROR_SEPARATOR: &str = "\n\n---\n\n";

/// A migrated pipeline project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    /// Readiness of the generated project.
    pub status: FlowStatus,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    /// Directory holding the generated project (cwd of the pipeline process).
    pub project_path: PathBuf,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub execution_status: ExecutionStatus,
    #[serde(default)]
    pub execution_logs: Vec<String>,
    #[serde(default)]
    pub execution_start_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub execution_end_time: Option<DateTime<Local>>,
    /// Duration of the last run in seconds.
    #[serde(default)]
    pub execution_duration: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Flow {
    pub fn new(name: &str, project_path: impl Into<PathBuf>) -> Self {
        let now = Local::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: FlowStatus::Importing,
            created_at: now,
            updated_at: now,
            project_path: project_path.into(),
            last_run_at: None,
            execution_status: ExecutionStatus::NeverRun,
            execution_logs: Vec::new(),
            execution_start_time: None,
            execution_end_time: None,
            execution_duration: None,
            error_message: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == FlowStatus::Ready
    }

    /// Stage tag of the first recorded error, if any.
    pub fn error_stage(&self) -> Option<&str> {
        let msg = self.error_message.as_deref()?;
        let rest = msg.strip_prefix('[')?;
        rest.split_once(']').map(|(tag, _)| tag)
    }
}

/// Readiness of a flow's generated project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Importing,
    Ready,
    ImportFailed,
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStatus::Importing => write!(f, "importing"),
            FlowStatus::Ready => write!(f, "ready"),
            FlowStatus::ImportFailed => write!(f, "import_failed"),
        }
    }
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NeverRun,
    Running,
    Success,
    Failure,
    Error,
    Interrupted,
}

impl ExecutionStatus {
    /// Whether the status is a terminal outcome of a run.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failure
                | ExecutionStatus::Error
                | ExecutionStatus::Interrupted
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::NeverRun => write!(f, "never_run"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "failure"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Timestamps attached to an execution status change.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusTimes {
    pub start: Option<DateTime<Local>>,
    pub end: Option<DateTime<Local>>,
    pub duration_secs: Option<f64>,
}

impl StatusTimes {
    pub fn started(at: DateTime<Local>) -> Self {
        Self {
            start: Some(at),
            ..Self::default()
        }
    }

    pub fn finished(at: DateTime<Local>, duration_secs: f64) -> Self {
        Self {
            start: None,
            end: Some(at),
            duration_secs: Some(duration_secs),
        }
    }

    pub fn ended(at: DateTime<Local>) -> Self {
        Self {
            end: Some(at),
            ..Self::default()
        }
    }
}

/// Where in a pipeline a failure was localized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorTag {
    Extraction,
    Transformation,
    Load,
    /// Non-zero exit without a stage match.
    General,
    /// Fault inside the executor itself.
    Executor,
}

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::Extraction => "EXTRACTION",
            ErrorTag::Transformation => "TRANSFORMATION",
            ErrorTag::Load => "LOAD",
            ErrorTag::General => "GENERAL",
            ErrorTag::Executor => "EXECUTOR",
        }
    }

    /// Format an error message tagged with this stage.
    pub fn tag(&self, message: &str) -> String {
        format!("[{}] {}", self.as_str(), message)
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
