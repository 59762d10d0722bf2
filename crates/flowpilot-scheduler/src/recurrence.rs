//! Recurrence engine: computes the next trigger instant of a schedule and
//! decides whether "now" qualifies for firing.
//!
//! All instants are local wall-clock times. An instant equal to `now` is
//! treated as already elapsed: every computed instant is strictly after
//! `now`, so a tick landing on the exact trigger second cannot fire twice.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::schedule::{ScheduleConfig, ScheduleKind};
use crate::time::{DayOfWeek, TimeOfDay};

/// Days scanned ahead when looking for a weekday slot (a full week plus today).
const WEEK_SCAN_DAYS: usize = 8;

/// Next instant strictly after `now` at which the schedule should fire.
/// `None` means the schedule has no more occurrences.
pub fn next_run(schedule: &ScheduleConfig, now: NaiveDateTime) -> Option<NaiveDateTime> {
    match &schedule.kind {
        ScheduleKind::Daily { time } => earliest_after(now, now.date(), None, |_| vec![*time]),
        ScheduleKind::Weekly { days, time } => {
            earliest_after(now, now.date(), None, |date| on_days(days, date, &[*time]))
        }
        ScheduleKind::MultipleTimes { times, days } => {
            if days.is_empty() {
                earliest_after(now, now.date(), None, |_| times.clone())
            } else {
                earliest_after(now, now.date(), None, |date| on_days(days, date, times))
            }
        }
        ScheduleKind::DaySpecific { day_times } => earliest_after(now, now.date(), None, |date| {
            day_times
                .get(&DayOfWeek::of(date))
                .cloned()
                .unwrap_or_default()
        }),
        ScheduleKind::SpecificDates {
            time,
            specific_dates,
            specific_date_times,
        } => specific_dates
            .iter()
            .flat_map(|date| {
                date_times(*time, specific_date_times.get(date))
                    .into_iter()
                    .map(move |t| t.on(*date))
            })
            .filter(|instant| *instant > now)
            .min(),
        ScheduleKind::Custom {
            time,
            days,
            start_date,
            end_date,
        } => {
            if end_date.is_some_and(|end| now.date() > end) {
                return None;
            }
            let from = match start_date {
                Some(start) if *start > now.date() => *start,
                _ => now.date(),
            };
            earliest_after(now, from, *end_date, |date| {
                if days.is_empty() {
                    vec![*time]
                } else {
                    on_days(days, date, &[*time])
                }
            })
        }
        ScheduleKind::Interval {
            interval_minutes,
            interval_start_time,
            interval_end_time,
            days,
        } => next_interval(
            interval_anchor(schedule.next_run, now, *interval_minutes),
            *interval_minutes,
            *interval_start_time,
            *interval_end_time,
            days,
        ),
    }
}

/// Decide whether a schedule whose trigger matched should actually fire.
///
/// Side effects: a Custom schedule past its end date is deactivated; a
/// SpecificDates schedule consumes today's date once its last time for
/// today has fired, and is deactivated when no dates remain.
pub fn should_fire_now(schedule: &mut ScheduleConfig, now: NaiveDateTime) -> bool {
    let today = now.date();
    match &mut schedule.kind {
        ScheduleKind::Custom {
            start_date,
            end_date,
            ..
        } => {
            if start_date.is_some_and(|start| today < start) {
                return false;
            }
            if end_date.is_some_and(|end| today > end) {
                schedule.active = false;
                return false;
            }
            true
        }
        ScheduleKind::SpecificDates {
            time,
            specific_dates,
            specific_date_times,
        } => {
            let Some(pos) = specific_dates.iter().position(|d| *d == today) else {
                return false;
            };
            let current = TimeOfDay::of(now);
            let later_today = date_times(*time, specific_date_times.get(&today))
                .iter()
                .any(|t| *t > current);
            if !later_today {
                specific_dates.remove(pos);
                specific_date_times.remove(&today);
            }
            if specific_dates.is_empty() {
                schedule.active = false;
            }
            true
        }
        ScheduleKind::Daily { .. }
        | ScheduleKind::Weekly { .. }
        | ScheduleKind::Interval { .. }
        | ScheduleKind::MultipleTimes { .. }
        | ScheduleKind::DaySpecific { .. } => true,
    }
}

/// Drop specific dates whose every instant has fully elapsed (its minute is
/// over). Returns true when anything was removed.
pub fn prune_elapsed_dates(schedule: &mut ScheduleConfig, now: NaiveDateTime) -> bool {
    let ScheduleKind::SpecificDates {
        time,
        specific_dates,
        specific_date_times,
    } = &mut schedule.kind
    else {
        return false;
    };
    let before = specific_dates.len();
    specific_dates.retain(|date| {
        date_times(*time, specific_date_times.get(date))
            .iter()
            .any(|t| t.on(*date) + Duration::minutes(1) > now)
    });
    specific_date_times.retain(|date, _| specific_dates.contains(date));
    let removed = specific_dates.len() != before;
    if specific_dates.is_empty() {
        schedule.active = false;
    }
    removed
}

/// Recompute `next_run` and enforce the active/next_run invariant: an
/// active schedule always has a next instant, otherwise it is deactivated.
/// Returns whether the schedule is still active.
pub fn refresh(schedule: &mut ScheduleConfig, now: NaiveDateTime) -> bool {
    prune_elapsed_dates(schedule, now);
    if !schedule.active {
        schedule.next_run = None;
        return false;
    }
    schedule.next_run = next_run(schedule, now);
    if schedule.next_run.is_none() {
        schedule.active = false;
    }
    schedule.active
}

/// Whether a time of day lies in `[start, end]`; a window with
/// `end < start` spans midnight.
pub fn in_window(t: NaiveTime, start: TimeOfDay, end: TimeOfDay) -> bool {
    let (start, end) = (start.to_naive(), end.to_naive());
    if start <= end {
        start <= t && t <= end
    } else {
        t >= start || t <= end
    }
}

/// Last grid point at or before `now` on the grid set by an elapsed
/// `next_run`, so consecutive runs stay exactly `minutes` apart however late
/// the tick lands. Without an elapsed instant the grid starts at `now`.
fn interval_anchor(previous: Option<NaiveDateTime>, now: NaiveDateTime, minutes: u32) -> NaiveDateTime {
    let step = i64::from(minutes.max(1));
    match previous {
        Some(prev) if prev <= now => {
            let behind = (now - prev).num_minutes() / step;
            prev + Duration::minutes(behind * step)
        }
        _ => now,
    }
}

/// `anchor + minutes`, snapped into the window and onto an allowed weekday.
/// `anchor` is never after now, so the result is strictly after now.
fn next_interval(
    anchor: NaiveDateTime,
    minutes: u32,
    start: TimeOfDay,
    end: TimeOfDay,
    days: &[DayOfWeek],
) -> Option<NaiveDateTime> {
    let candidate = anchor + Duration::minutes(i64::from(minutes));
    let mut next = clamp_to_window(candidate, start, end)?;
    if days.is_empty() {
        return Some(next);
    }
    for _ in 0..7 {
        if days.contains(&DayOfWeek::of(next.date())) {
            return Some(next);
        }
        next = start.on(next.date().succ_opt()?);
    }
    None
}

/// Snap an instant into the daily window: before the window → window start
/// the same day; after it → window start the next day.
fn clamp_to_window(
    candidate: NaiveDateTime,
    start: TimeOfDay,
    end: TimeOfDay,
) -> Option<NaiveDateTime> {
    let t = candidate.time();
    if in_window(t, start, end) {
        return Some(candidate);
    }
    let date = candidate.date();
    if start.to_naive() <= end.to_naive() && t > end.to_naive() {
        Some(start.on(date.succ_opt()?))
    } else {
        // Before the window, or in the daytime gap of a midnight-spanning one.
        Some(start.on(date))
    }
}

/// Earliest instant strictly after `now`, scanning day by day from `from`
/// for at most a week and never past `until`.
fn earliest_after<F>(
    now: NaiveDateTime,
    from: NaiveDate,
    until: Option<NaiveDate>,
    times_on: F,
) -> Option<NaiveDateTime>
where
    F: Fn(NaiveDate) -> Vec<TimeOfDay>,
{
    let mut date = from;
    for _ in 0..WEEK_SCAN_DAYS {
        if until.is_some_and(|u| date > u) {
            return None;
        }
        let best = times_on(date)
            .into_iter()
            .map(|t| t.on(date))
            .filter(|instant| *instant > now)
            .min();
        if best.is_some() {
            return best;
        }
        date = date.succ_opt()?;
    }
    None
}

fn on_days(days: &[DayOfWeek], date: NaiveDate, times: &[TimeOfDay]) -> Vec<TimeOfDay> {
    if days.contains(&DayOfWeek::of(date)) {
        times.to_vec()
    } else {
        Vec::new()
    }
}

fn date_times(default: TimeOfDay, overrides: Option<&Vec<TimeOfDay>>) -> Vec<TimeOfDay> {
    match overrides {
        Some(times) if !times.is_empty() => times.clone(),
        _ => vec![default],
    }
}
