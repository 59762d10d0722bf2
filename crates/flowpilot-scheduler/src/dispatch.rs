//! Dispatcher: the background loop that evaluates schedule triggers and
//! hands due flows to a [`FlowRunner`].
//! Uses tokio::interval, so an idle dispatcher costs nothing between ticks.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use flowpilot_core::config::SchedulerConfig;
use flowpilot_core::traits::FlowRunner;

use crate::registry::ScheduleRegistry;

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the polling loop. The trigger table itself lives in the registry.
pub struct Dispatcher {
    registry: Arc<ScheduleRegistry>,
    runner: Arc<dyn FlowRunner>,
    poll_interval: Duration,
    error_backoff: Duration,
    handle: Mutex<Option<LoopHandle>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ScheduleRegistry>,
        runner: Arc<dyn FlowRunner>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            runner,
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            handle: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install triggers for every active schedule and spawn the loop.
    /// Calling it while already running does nothing and returns false.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut handle = self.lock();
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }
        let installed = self.registry.install_all();
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.runner),
            self.poll_interval,
            self.error_backoff,
            rx,
        ));
        *handle = Some(LoopHandle { shutdown, task });
        tracing::info!(
            "⏰ Dispatcher started ({} schedules armed, tick every {:?})",
            installed,
            self.poll_interval
        );
        true
    }

    /// Remove all triggers and halt the loop.
    pub async fn stop(&self) {
        let handle = self.lock().take();
        self.registry.uninstall_all();
        if let Some(LoopHandle { shutdown, task }) = handle {
            shutdown.send(true).ok();
            if let Err(e) = task.await {
                tracing::warn!("⚠️ Dispatcher loop ended abnormally: {e}");
            }
            tracing::info!("⏹️ Dispatcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|h| !h.task.is_finished())
    }

    /// Run one evaluation pass now. Returns how many flows were launched.
    pub fn tick(&self) -> usize {
        tick(&self.registry, &self.runner)
    }
}

async fn run_loop(
    registry: Arc<ScheduleRegistry>,
    runner: Arc<dyn FlowRunner>,
    poll_interval: Duration,
    error_backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| tick(&registry, &runner)));
        if let Err(panic) = outcome {
            tracing::error!(
                "💥 Dispatcher tick failed: {}; retrying in {:?}",
                panic_message(panic.as_ref()),
                error_backoff
            );
            tokio::select! {
                _ = tokio::time::sleep(error_backoff) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
}

fn tick(registry: &ScheduleRegistry, runner: &Arc<dyn FlowRunner>) -> usize {
    let now = registry.now();
    let fired = registry.collect_due(now);
    for schedule in &fired {
        tracing::info!(
            "🔔 Schedule fired: '{}' ({})",
            schedule.flow_name,
            schedule.schedule_id
        );
        let runner = Arc::clone(runner);
        let flow_id = schedule.flow_id.clone();
        let flow_name = schedule.flow_name.clone();
        tokio::spawn(async move {
            if !runner.execute_flow(&flow_id).await {
                tracing::warn!("⏭️ Scheduled run of '{flow_name}' skipped (not ready or already running)");
            }
        });
    }
    fired.len()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
