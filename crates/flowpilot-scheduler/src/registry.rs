//! Schedule Registry: validated CRUD over schedules.
//!
//! Owns the schedule list and its trigger table behind one lock, persists
//! every mutation through [`ScheduleStore`] and performs the post-fire
//! bookkeeping the dispatcher asks for.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flowpilot_core::error::{FlowPilotError, Result};
use flowpilot_core::traits::FlowStore;

use crate::recurrence;
use crate::schedule::{ScheduleConfig, ScheduleKind, ScheduleType, parse_day_times, validate_interval};
use crate::store::ScheduleStore;
use crate::time::{Clock, DayOfWeek, TimeOfDay, parse_date, system_clock};
use crate::triggers::TriggerTable;

/// Default daily window of interval schedules.
pub const DEFAULT_WINDOW_START: &str = "00:00";
pub const DEFAULT_WINDOW_END: &str = "23:59";

/// Editable fields of an existing schedule. `None` leaves a field as is;
/// a field the schedule type does not have is rejected.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub time: Option<String>,
    pub times: Option<Vec<String>>,
    pub days: Option<Vec<String>>,
    pub day_times: Option<BTreeMap<String, Vec<String>>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub interval_minutes: Option<u32>,
    pub interval_start_time: Option<String>,
    pub interval_end_time: Option<String>,
    /// An empty string restores the generated description.
    pub description: Option<String>,
}

/// One upcoming occurrence, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextRun {
    pub schedule_id: String,
    pub flow_id: String,
    pub flow_name: String,
    pub next_run: NaiveDateTime,
    pub schedule_type: ScheduleType,
    pub description: Option<String>,
}

/// A schedule that fired during a dispatcher tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredSchedule {
    pub schedule_id: String,
    pub flow_id: String,
    pub flow_name: String,
}

struct RegistryState {
    schedules: Vec<ScheduleConfig>,
    triggers: TriggerTable,
}

/// Validated, persisted collection of schedules.
pub struct ScheduleRegistry {
    state: Mutex<RegistryState>,
    store: ScheduleStore,
    flows: Arc<dyn FlowStore>,
    clock: Clock,
}

impl ScheduleRegistry {
    /// Load schedules from the store, using the local wall clock.
    pub fn new(store: ScheduleStore, flows: Arc<dyn FlowStore>) -> Self {
        Self::with_clock(store, flows, system_clock())
    }

    pub fn with_clock(store: ScheduleStore, flows: Arc<dyn FlowStore>, clock: Clock) -> Self {
        let mut schedules = store.load();
        let now = clock();
        let mut changed = false;
        for schedule in schedules.iter_mut() {
            changed |= settle(schedule, now);
        }
        tracing::info!("📂 Loaded {} schedules", schedules.len());
        let registry = Self {
            state: Mutex::new(RegistryState {
                schedules,
                triggers: TriggerTable::new(),
            }),
            store,
            flows,
            clock,
        };
        if changed {
            registry.persist(&registry.lock().schedules);
        }
        registry
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, schedules: &[ScheduleConfig]) {
        if let Err(e) = self.store.save(schedules) {
            tracing::warn!("⚠️ Failed to save schedules: {e}");
        }
    }

    // ── Creation ──────────────────────────────────────────

    pub fn create_daily_schedule(
        &self,
        flow_id: &str,
        time: &str,
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        self.insert(flow_id, ScheduleKind::daily(time)?, description)
    }

    pub fn create_weekly_schedule<S: AsRef<str>>(
        &self,
        flow_id: &str,
        days: &[S],
        time: &str,
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        self.insert(flow_id, ScheduleKind::weekly(days, time)?, description)
    }

    /// Dates already in the past are dropped; `date_times` optionally
    /// overrides `time` per date.
    pub fn create_specific_dates_schedule<S: AsRef<str>>(
        &self,
        flow_id: &str,
        dates: &[S],
        time: &str,
        date_times: &BTreeMap<String, Vec<String>>,
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        let today = self.now().date();
        let kind = ScheduleKind::specific_dates(dates, time, date_times, today)?;
        self.insert(flow_id, kind, description)
    }

    pub fn create_custom_schedule<S: AsRef<str>>(
        &self,
        flow_id: &str,
        time: &str,
        days: &[S],
        start_date: Option<&str>,
        end_date: Option<&str>,
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        let kind = ScheduleKind::custom(time, days, start_date, end_date)?;
        self.insert(flow_id, kind, description)
    }

    /// Window bounds default to the whole day.
    pub fn create_interval_schedule<S: AsRef<str>>(
        &self,
        flow_id: &str,
        interval_minutes: u32,
        start_time: Option<&str>,
        end_time: Option<&str>,
        days: &[S],
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        let kind = ScheduleKind::interval(
            interval_minutes,
            start_time.unwrap_or(DEFAULT_WINDOW_START),
            end_time.unwrap_or(DEFAULT_WINDOW_END),
            days,
        )?;
        self.insert(flow_id, kind, description)
    }

    /// Daily at each time when `days` is empty, weekly on `days` otherwise.
    pub fn create_multiple_times_schedule<S: AsRef<str>, D: AsRef<str>>(
        &self,
        flow_id: &str,
        times: &[S],
        days: &[D],
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        self.insert(flow_id, ScheduleKind::multiple_times(times, days)?, description)
    }

    pub fn create_day_specific_schedule(
        &self,
        flow_id: &str,
        day_times: &BTreeMap<String, Vec<String>>,
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        self.insert(flow_id, ScheduleKind::day_specific(day_times)?, description)
    }

    fn insert(
        &self,
        flow_id: &str,
        kind: ScheduleKind,
        description: Option<String>,
    ) -> Result<ScheduleConfig> {
        let flow = self
            .flows
            .get_flow(flow_id)
            .ok_or_else(|| FlowPilotError::not_found(format!("flow {flow_id}")))?;
        let now = self.now();
        let mut schedule = ScheduleConfig::new(&flow.id, &flow.name, kind, description, now);
        if !recurrence::refresh(&mut schedule, now) {
            return Err(FlowPilotError::validation(
                "schedule has no upcoming occurrences",
            ));
        }

        let mut state = self.lock();
        state.triggers.install(&schedule, now);
        state.schedules.push(schedule.clone());
        self.persist(&state.schedules);
        tracing::info!(
            "📅 Schedule created: '{}' {} ({})",
            schedule.flow_name,
            schedule.schedule_type(),
            schedule.id
        );
        Ok(schedule)
    }

    // ── Mutation ──────────────────────────────────────────

    /// Apply an edit: remove the schedule's triggers, change the rule,
    /// recompute `next_run`, re-install and persist.
    pub fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<ScheduleConfig> {
        let now = self.now();
        let mut state = self.lock();
        let RegistryState {
            schedules,
            triggers,
        } = &mut *state;
        let schedule = schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| FlowPilotError::not_found(format!("schedule {id}")))?;

        let mut kind = schedule.kind.clone();
        apply_update(&mut kind, &update, now)?;

        let generated =
            schedule.description.as_deref() == Some(schedule.kind.default_description().as_str());
        triggers.uninstall(id);
        schedule.description = match update.description {
            Some(d) if !d.trim().is_empty() => Some(d),
            Some(_) => Some(kind.default_description()),
            None if generated => Some(kind.default_description()),
            None => schedule.description.take(),
        };
        schedule.kind = kind;
        if recurrence::refresh(schedule, now) {
            triggers.install(schedule, now);
        }
        let updated = schedule.clone();
        self.persist(schedules);
        tracing::info!("✏️ Schedule updated: '{}' ({})", updated.flow_name, updated.id);
        Ok(updated)
    }

    /// Remove a schedule and its triggers.
    pub fn delete_schedule(&self, id: &str) -> bool {
        let mut state = self.lock();
        let len = state.schedules.len();
        state.schedules.retain(|s| s.id != id);
        if state.schedules.len() == len {
            return false;
        }
        state.triggers.uninstall(id);
        self.persist(&state.schedules);
        tracing::info!("🗑️ Schedule deleted: {id}");
        true
    }

    /// Flip `active`. Returns the new state, or `None` for an unknown id.
    /// A schedule with no upcoming occurrence stays inactive.
    pub fn toggle_schedule(&self, id: &str) -> Option<bool> {
        let now = self.now();
        let mut state = self.lock();
        let RegistryState {
            schedules,
            triggers,
        } = &mut *state;
        let schedule = schedules.iter_mut().find(|s| s.id == id)?;
        schedule.active = !schedule.active;
        triggers.uninstall(id);
        if recurrence::refresh(schedule, now) {
            triggers.install(schedule, now);
        }
        let active = schedule.active;
        tracing::info!(
            "{} Schedule {}: '{}'",
            if active { "▶️" } else { "⏸️" },
            if active { "enabled" } else { "disabled" },
            schedule.flow_name
        );
        self.persist(schedules);
        Some(active)
    }

    // ── Queries ───────────────────────────────────────────

    pub fn get_schedule(&self, id: &str) -> Option<ScheduleConfig> {
        self.lock().schedules.iter().find(|s| s.id == id).cloned()
    }

    /// All schedules, soonest first; schedules with no next run last.
    pub fn get_all_schedules(&self) -> Vec<ScheduleConfig> {
        let mut all = self.settled();
        all.sort_by(|a, b| match (a.next_run, b.next_run) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.created_at.cmp(&b.created_at),
        });
        all
    }

    pub fn schedules_for_flow(&self, flow_id: &str) -> Vec<ScheduleConfig> {
        self.get_all_schedules()
            .into_iter()
            .filter(|s| s.flow_id == flow_id)
            .collect()
    }

    /// The next `limit` upcoming occurrences across active schedules.
    pub fn get_next_runs(&self, limit: usize) -> Vec<NextRun> {
        let mut runs: Vec<NextRun> = self
            .settled()
            .into_iter()
            .filter(|s| s.active)
            .filter_map(|s| {
                Some(NextRun {
                    next_run: s.next_run?,
                    schedule_type: s.schedule_type(),
                    schedule_id: s.id,
                    flow_id: s.flow_id,
                    flow_name: s.flow_name,
                    description: s.description,
                })
            })
            .collect();
        runs.sort_by(|a, b| a.next_run.cmp(&b.next_run));
        runs.truncate(limit);
        runs
    }

    pub fn len(&self) -> usize {
        self.lock().schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().schedules.is_empty()
    }

    /// Snapshot with stale `next_run` values brought up to date. Read-only:
    /// the stored schedules are settled by the dispatcher tick.
    fn settled(&self) -> Vec<ScheduleConfig> {
        let now = self.now();
        let mut snapshot = self.lock().schedules.clone();
        for schedule in snapshot.iter_mut() {
            settle(schedule, now);
        }
        snapshot
    }

    // ── Dispatcher hooks ──────────────────────────────────

    /// Replace the trigger table with triggers for every active schedule.
    /// `next_run` is recomputed from now; missed occurrences are not queued.
    pub fn install_all(&self) -> usize {
        let now = self.now();
        let mut state = self.lock();
        let RegistryState {
            schedules,
            triggers,
        } = &mut *state;
        triggers.clear();
        for schedule in schedules.iter_mut() {
            if recurrence::refresh(schedule, now) {
                triggers.install(schedule, now);
            }
        }
        self.persist(schedules);
        triggers.len()
    }

    pub fn uninstall_all(&self) {
        self.lock().triggers.clear();
    }

    pub fn installed_count(&self) -> usize {
        self.lock().triggers.len()
    }

    pub fn is_installed(&self, schedule_id: &str) -> bool {
        self.lock().triggers.is_installed(schedule_id)
    }

    /// Evaluate all triggers against `now` and do the post-fire bookkeeping
    /// (run count, last run, next run), then settle schedules that went
    /// stale without firing. Returns the schedules whose flow should be
    /// launched. A failing schedule is logged and skipped.
    pub fn collect_due(&self, now: NaiveDateTime) -> Vec<FiredSchedule> {
        let mut state = self.lock();
        let RegistryState {
            schedules,
            triggers,
        } = &mut *state;
        let mut fired = Vec::new();
        let mut changed = false;

        for schedule in schedules.iter_mut() {
            if !schedule.active || !triggers.matches(&schedule.id, now, schedule.next_run) {
                continue;
            }
            triggers.mark_fired(&schedule.id, now);
            changed = true;
            match self.fire(schedule, now) {
                Ok(Some(f)) => fired.push(f),
                Ok(None) => {}
                Err(e) => tracing::error!("❌ Schedule {} failed: {e}", schedule.id),
            }
            if !schedule.active {
                triggers.uninstall(&schedule.id);
                tracing::info!("🏁 Schedule finished: '{}' ({})", schedule.flow_name, schedule.id);
            }
        }

        for schedule in schedules.iter_mut() {
            if settle(schedule, now) {
                changed = true;
                if !schedule.active {
                    triggers.uninstall(&schedule.id);
                }
            }
        }

        if changed {
            self.persist(schedules);
        }
        fired
    }

    fn fire(&self, schedule: &mut ScheduleConfig, now: NaiveDateTime) -> Result<Option<FiredSchedule>> {
        if self.flows.get_flow(&schedule.flow_id).is_none() {
            return Err(FlowPilotError::Scheduler(format!(
                "flow {} no longer exists",
                schedule.flow_id
            )));
        }
        if !recurrence::should_fire_now(schedule, now) {
            recurrence::refresh(schedule, now);
            return Ok(None);
        }
        schedule.run_count += 1;
        schedule.last_run = Some(now);
        recurrence::refresh(schedule, now);
        Ok(Some(FiredSchedule {
            schedule_id: schedule.id.clone(),
            flow_id: schedule.flow_id.clone(),
            flow_name: schedule.flow_name.clone(),
        }))
    }
}

/// Drop elapsed dates and recompute a missing or elapsed `next_run`.
/// An elapsed interval instant is left for the dispatcher to consume.
/// Returns whether anything changed.
fn settle(schedule: &mut ScheduleConfig, now: NaiveDateTime) -> bool {
    let before = (schedule.active, schedule.next_run);
    recurrence::prune_elapsed_dates(schedule, now);
    let stale = match schedule.next_run {
        None => true,
        Some(next) => next <= now && !matches!(schedule.kind, ScheduleKind::Interval { .. }),
    };
    if stale || !schedule.active {
        recurrence::refresh(schedule, now);
    }
    before != (schedule.active, schedule.next_run)
}

fn apply_update(kind: &mut ScheduleKind, update: &ScheduleUpdate, now: NaiveDateTime) -> Result<()> {
    let schedule_type = kind.schedule_type();
    let not_applicable = |field: &str| {
        FlowPilotError::validation(format!(
            "'{field}' cannot be changed on a {schedule_type} schedule"
        ))
    };

    if let Some(new_time) = &update.time {
        let parsed = TimeOfDay::parse(new_time)?;
        match kind {
            ScheduleKind::Daily { time }
            | ScheduleKind::Weekly { time, .. }
            | ScheduleKind::SpecificDates { time, .. }
            | ScheduleKind::Custom { time, .. } => *time = parsed,
            _ => return Err(not_applicable("time")),
        }
    }

    if let Some(new_times) = &update.times {
        let parsed = TimeOfDay::parse_list(new_times)?;
        match kind {
            ScheduleKind::MultipleTimes { times, .. } => *times = parsed,
            _ => return Err(not_applicable("times")),
        }
    }

    if let Some(new_days) = &update.days {
        match kind {
            ScheduleKind::Weekly { days, .. } => *days = DayOfWeek::parse_list(new_days)?,
            ScheduleKind::Custom { days, .. }
            | ScheduleKind::MultipleTimes { days, .. }
            | ScheduleKind::Interval { days, .. } => {
                *days = DayOfWeek::parse_optional_list(new_days)?
            }
            _ => return Err(not_applicable("days")),
        }
    }

    if let Some(new_day_times) = &update.day_times {
        let parsed = parse_day_times(new_day_times)?;
        match kind {
            ScheduleKind::DaySpecific { day_times } => *day_times = parsed,
            _ => return Err(not_applicable("day_times")),
        }
    }

    if update.start_date.is_some() || update.end_date.is_some() {
        let ScheduleKind::Custom {
            start_date,
            end_date,
            ..
        } = kind
        else {
            return Err(not_applicable("start_date/end_date"));
        };
        if let Some(s) = &update.start_date {
            *start_date = Some(parse_date(s)?);
        }
        if let Some(e) = &update.end_date {
            *end_date = Some(parse_date(e)?);
        }
        if let (Some(start), Some(end)) = (*start_date, *end_date) {
            if start >= end {
                return Err(FlowPilotError::validation(format!(
                    "start_date {start} must be before end_date {end}"
                )));
            }
        }
        if end_date.is_some_and(|end| end < now.date()) {
            return Err(FlowPilotError::validation("end_date is in the past"));
        }
    }

    let touches_interval = update.interval_minutes.is_some()
        || update.interval_start_time.is_some()
        || update.interval_end_time.is_some();
    if touches_interval {
        let ScheduleKind::Interval {
            interval_minutes,
            interval_start_time,
            interval_end_time,
            ..
        } = kind
        else {
            return Err(not_applicable("interval"));
        };
        if let Some(minutes) = update.interval_minutes {
            validate_interval(minutes)?;
            *interval_minutes = minutes;
        }
        if let Some(start) = &update.interval_start_time {
            *interval_start_time = TimeOfDay::parse(start)?;
        }
        if let Some(end) = &update.interval_end_time {
            *interval_end_time = TimeOfDay::parse(end)?;
        }
    }
    Ok(())
}
