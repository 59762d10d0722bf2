//! Process runtime: entry point discovery, spawning and graceful
//! termination of pipeline processes.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use flowpilot_core::config::ExecutorConfig;
use flowpilot_core::error::{FlowPilotError, Result};

/// Directory (relative to the project) holding generated pipelines.
pub const PIPELINES_DIR: &str = "src/pipelines";

/// Locate the file to run for a project.
///
/// First file (by name) with the configured extension under
/// `src/pipelines/`, skipping `__init__`; otherwise a file in the project
/// root whose name contains "pipeline".
pub fn find_entry_point(project: &Path, extension: &str) -> Result<PathBuf> {
    if !project.is_dir() {
        return Err(FlowPilotError::Executor(format!(
            "project directory not found: {}",
            project.display()
        )));
    }
    let has_ext = |p: &Path| p.extension().is_some_and(|e| e == extension);

    let pipelines = project.join(PIPELINES_DIR);
    if pipelines.is_dir() {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&pipelines)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_ext(p))
            .filter(|p| p.file_stem().is_none_or(|s| s != "__init__"))
            .collect();
        candidates.sort();
        if let Some(first) = candidates.into_iter().next() {
            return Ok(first);
        }
    }

    let mut fallback: Vec<PathBuf> = std::fs::read_dir(project)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_ext(p))
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase().contains("pipeline"))
        })
        .collect();
    fallback.sort();
    fallback.into_iter().next().ok_or_else(|| {
        FlowPilotError::Executor(format!(
            "no pipeline entry point (*.{extension}) found in {}",
            project.display()
        ))
    })
}

/// Spawn the pipeline with piped output, the project as working directory
/// and the configured environment. The child dies with its handle.
pub fn spawn_pipeline(config: &ExecutorConfig, project: &Path, entry: &Path) -> Result<Child> {
    let mut cmd = Command::new(&config.interpreter);
    cmd.args(&config.interpreter_args)
        .arg(entry)
        .current_dir(project)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn().map_err(|e| {
        FlowPilotError::Executor(format!("failed to start '{}': {e}", config.interpreter))
    })
}

/// Ask the process to terminate, then kill it if it is still alive after
/// `grace`. Returns its exit status when one could be collected.
pub async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    send_terminate(child).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!("⚠️ Failed to wait for process: {e}");
            None
        }
        Err(_) => {
            tracing::warn!("⏱️ Process ignored terminate for {grace:?}, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!("⚠️ Failed to kill process: {e}");
            }
            child.try_wait().ok().flatten()
        }
    }
}

#[cfg(unix)]
async fn send_terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    match Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .await
    {
        Ok(_) => tracing::debug!("📨 Sent SIGTERM to {pid}"),
        Err(e) => {
            tracing::warn!("⚠️ Failed to send SIGTERM to {pid}: {e}");
            child.start_kill().ok();
        }
    }
}

#[cfg(not(unix))]
async fn send_terminate(child: &mut Child) {
    child.start_kill().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_project() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("flowpilot-proc-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_entry_point_prefers_pipelines_dir() {
        let project = temp_project();
        let pipelines = project.join(PIPELINES_DIR);
        std::fs::create_dir_all(&pipelines).unwrap();
        std::fs::write(pipelines.join("__init__.py"), "").unwrap();
        std::fs::write(pipelines.join("orders.py"), "").unwrap();
        std::fs::write(pipelines.join("b_second.py"), "").unwrap();
        std::fs::write(project.join("my_pipeline.py"), "").unwrap();

        let entry = find_entry_point(&project, "py").unwrap();
        assert_eq!(entry, pipelines.join("b_second.py"));
        std::fs::remove_dir_all(&project).ok();
    }

    #[test]
    fn test_entry_point_root_fallback() {
        let project = temp_project();
        std::fs::write(project.join("helper.py"), "").unwrap();
        std::fs::write(project.join("Sales_Pipeline.py"), "").unwrap();
        let entry = find_entry_point(&project, "py").unwrap();
        assert_eq!(entry, project.join("Sales_Pipeline.py"));
        std::fs::remove_dir_all(&project).ok();
    }

    #[test]
    fn test_entry_point_missing() {
        let project = temp_project();
        std::fs::write(project.join("helper.py"), "").unwrap();
        assert!(find_entry_point(&project, "py").is_err());
        assert!(find_entry_point(&project.join("nope"), "py").is_err());
        std::fs::remove_dir_all(&project).ok();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; while true; do sleep 0.1; done"])
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        terminate(&mut child, Duration::from_millis(300)).await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        let status = terminate(&mut child, Duration::from_secs(5)).await;
        assert!(status.is_some_and(|s| !s.success()));
    }
}
