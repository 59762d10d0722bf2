//! Trigger table: the per-schedule trigger descriptors the dispatcher
//! evaluates each tick. Keyed by schedule id: edits remove by id and
//! re-insert, so a schedule never carries stale triggers.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeSet, HashMap};

use crate::schedule::{ScheduleConfig, ScheduleKind};
use crate::time::{DayOfWeek, TimeOfDay};

/// A single trigger descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trigger {
    /// Matches a wall-clock minute, on one weekday or every day.
    At {
        day: Option<DayOfWeek>,
        time: TimeOfDay,
    },
    /// Matches a wall-clock minute on one calendar date.
    OnDate { date: NaiveDate, time: TimeOfDay },
    /// Matches once the schedule's `next_run` has arrived.
    Due,
}

impl Trigger {
    fn matches_minute(&self, now: NaiveDateTime) -> bool {
        let current = TimeOfDay::of(now);
        match self {
            Trigger::At { day, time } => {
                *time == current && day.is_none_or(|d| d == DayOfWeek::of(now.date()))
            }
            Trigger::OnDate { date, time } => *date == now.date() && *time == current,
            Trigger::Due => false,
        }
    }
}

/// Triggers implied by a schedule rule.
pub fn triggers_for(kind: &ScheduleKind) -> Vec<Trigger> {
    let mut triggers = BTreeSet::new();
    match kind {
        ScheduleKind::Daily { time } => {
            triggers.insert(Trigger::At { day: None, time: *time });
        }
        ScheduleKind::Weekly { days, time } => {
            triggers.extend(days.iter().map(|d| Trigger::At {
                day: Some(*d),
                time: *time,
            }));
        }
        ScheduleKind::Custom { time, days, .. } => {
            if days.is_empty() {
                triggers.insert(Trigger::At { day: None, time: *time });
            } else {
                triggers.extend(days.iter().map(|d| Trigger::At {
                    day: Some(*d),
                    time: *time,
                }));
            }
        }
        ScheduleKind::MultipleTimes { times, days } => {
            for time in times {
                if days.is_empty() {
                    triggers.insert(Trigger::At { day: None, time: *time });
                } else {
                    triggers.extend(days.iter().map(|d| Trigger::At {
                        day: Some(*d),
                        time: *time,
                    }));
                }
            }
        }
        ScheduleKind::DaySpecific { day_times } => {
            for (day, times) in day_times {
                triggers.extend(times.iter().map(|t| Trigger::At {
                    day: Some(*day),
                    time: *t,
                }));
            }
        }
        ScheduleKind::SpecificDates {
            time,
            specific_dates,
            specific_date_times,
        } => {
            for date in specific_dates {
                match specific_date_times.get(date) {
                    Some(times) if !times.is_empty() => {
                        triggers.extend(times.iter().map(|t| Trigger::OnDate {
                            date: *date,
                            time: *t,
                        }));
                    }
                    _ => {
                        triggers.insert(Trigger::OnDate {
                            date: *date,
                            time: *time,
                        });
                    }
                }
            }
        }
        ScheduleKind::Interval { .. } => {
            triggers.insert(Trigger::Due);
        }
    }
    triggers.into_iter().collect()
}

#[derive(Debug, Clone)]
struct Installed {
    triggers: Vec<Trigger>,
    /// Minute the triggers were installed in; wall-clock triggers only
    /// match minutes after it.
    armed_minute: NaiveDateTime,
    last_fired_minute: Option<NaiveDateTime>,
}

/// Installed triggers by schedule id.
#[derive(Debug, Default)]
pub struct TriggerTable {
    installed: HashMap<String, Installed>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the triggers of a schedule.
    pub fn install(&mut self, schedule: &ScheduleConfig, now: NaiveDateTime) {
        let triggers = triggers_for(&schedule.kind);
        tracing::debug!(
            "🪝 Installed {} trigger(s) for schedule {}",
            triggers.len(),
            schedule.id
        );
        self.installed.insert(
            schedule.id.clone(),
            Installed {
                triggers,
                armed_minute: truncate_minute(now),
                last_fired_minute: None,
            },
        );
    }

    pub fn uninstall(&mut self, schedule_id: &str) -> bool {
        self.installed.remove(schedule_id).is_some()
    }

    pub fn clear(&mut self) {
        self.installed.clear();
    }

    pub fn is_installed(&self, schedule_id: &str) -> bool {
        self.installed.contains_key(schedule_id)
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    /// Whether an installed trigger of the schedule matches `now`.
    /// A schedule matches at most once per wall-clock minute.
    pub fn matches(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
        next_run: Option<NaiveDateTime>,
    ) -> bool {
        let Some(entry) = self.installed.get(schedule_id) else {
            return false;
        };
        let minute = truncate_minute(now);
        if entry.last_fired_minute == Some(minute) {
            return false;
        }
        entry.triggers.iter().any(|trigger| match trigger {
            Trigger::Due => next_run.is_some_and(|next| now >= next),
            other => minute > entry.armed_minute && other.matches_minute(now),
        })
    }

    pub fn mark_fired(&mut self, schedule_id: &str, now: NaiveDateTime) {
        if let Some(entry) = self.installed.get_mut(schedule_id) {
            entry.last_fired_minute = Some(truncate_minute(now));
        }
    }
}

fn truncate_minute(instant: NaiveDateTime) -> NaiveDateTime {
    instant
        .with_second(0)
        .and_then(|i| i.with_nanosecond(0))
        .unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn schedule(kind: ScheduleKind) -> ScheduleConfig {
        ScheduleConfig::new("flow", "Flow", kind, None, at(1, 0, 0, 0))
    }

    #[test]
    fn test_weekly_expands_to_one_trigger_per_day() {
        let kind = ScheduleKind::weekly(&["monday", "friday"], "09:00").unwrap();
        let triggers = triggers_for(&kind);
        assert_eq!(triggers.len(), 2);
        assert!(triggers.iter().all(|t| matches!(t, Trigger::At { day: Some(_), .. })));
    }

    #[test]
    fn test_multiple_times_daily_and_weekly() {
        let daily = ScheduleKind::multiple_times::<_, &str>(&["08:00", "18:00"], &[]).unwrap();
        assert_eq!(triggers_for(&daily).len(), 2);
        let weekly = ScheduleKind::multiple_times(&["08:00", "18:00"], &["mon", "tue", "wed"]).unwrap();
        assert_eq!(triggers_for(&weekly).len(), 6);
    }

    #[test]
    fn test_specific_dates_use_per_date_times() {
        let mut overrides = BTreeMap::new();
        overrides.insert("2025-01-05".to_string(), vec!["07:00".to_string(), "19:00".to_string()]);
        let kind = ScheduleKind::specific_dates(
            &["2025-01-03", "2025-01-05"],
            "10:00",
            &overrides,
            at(1, 0, 0, 0).date(),
        )
        .unwrap();
        assert_eq!(triggers_for(&kind).len(), 3);
    }

    #[test]
    fn test_daily_trigger_matches_once_per_minute() {
        let s = schedule(ScheduleKind::daily("09:00").unwrap());
        let mut table = TriggerTable::new();
        table.install(&s, at(1, 8, 0, 0));

        assert!(!table.matches(&s.id, at(1, 8, 59, 59), s.next_run));
        assert!(table.matches(&s.id, at(1, 9, 0, 1), s.next_run));
        table.mark_fired(&s.id, at(1, 9, 0, 1));
        assert!(!table.matches(&s.id, at(1, 9, 0, 30), s.next_run));
        assert!(table.matches(&s.id, at(2, 9, 0, 0), s.next_run));
    }

    #[test]
    fn test_trigger_not_armed_in_install_minute() {
        let s = schedule(ScheduleKind::daily("09:00").unwrap());
        let mut table = TriggerTable::new();
        table.install(&s, at(1, 9, 0, 20));
        assert!(!table.matches(&s.id, at(1, 9, 0, 40), s.next_run));
        assert!(table.matches(&s.id, at(2, 9, 0, 0), s.next_run));
    }

    #[test]
    fn test_weekday_trigger_ignores_other_days() {
        // 2025-01-01 is a Wednesday.
        let s = schedule(ScheduleKind::weekly(&["thursday"], "09:00").unwrap());
        let mut table = TriggerTable::new();
        table.install(&s, at(1, 0, 0, 0));
        assert!(!table.matches(&s.id, at(1, 9, 0, 0), s.next_run));
        assert!(table.matches(&s.id, at(2, 9, 0, 0), s.next_run));
    }

    #[test]
    fn test_due_trigger_follows_next_run() {
        let mut s = schedule(ScheduleKind::interval::<&str>(15, "00:00", "23:59", &[]).unwrap());
        let mut table = TriggerTable::new();
        table.install(&s, at(1, 10, 0, 0));
        s.next_run = Some(at(1, 10, 15, 0));
        assert!(!table.matches(&s.id, at(1, 10, 14, 59), s.next_run));
        assert!(table.matches(&s.id, at(1, 10, 15, 0), s.next_run));
        assert!(table.matches(&s.id, at(1, 10, 15, 0) + Duration::minutes(3), s.next_run));
    }

    #[test]
    fn test_uninstall_and_clear() {
        let s = schedule(ScheduleKind::daily("09:00").unwrap());
        let mut table = TriggerTable::new();
        table.install(&s, at(1, 0, 0, 0));
        table.install(&s, at(1, 0, 0, 0));
        assert_eq!(table.len(), 1);
        assert!(table.uninstall(&s.id));
        assert!(!table.uninstall(&s.id));
        assert!(!table.matches(&s.id, at(2, 9, 0, 0), s.next_run));
        table.install(&s, at(1, 0, 0, 0));
        table.clear();
        assert!(table.is_empty());
    }
}
