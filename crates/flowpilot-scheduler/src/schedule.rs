//! Schedule definitions: the core data model for automatic flow runs.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::time::{DayOfWeek, TimeOfDay, parse_date};
use flowpilot_core::error::{FlowPilotError, Result};

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

/// A recurrence rule bound to a flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub id: String,
    pub flow_id: String,
    /// Flow name captured at creation, for display.
    pub flow_name: String,
    /// When/how the schedule triggers.
    #[serde(flatten)]
    pub kind: ScheduleKind,
    pub active: bool,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub last_run: Option<NaiveDateTime>,
    #[serde(default)]
    pub next_run: Option<NaiveDateTime>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub description: Option<String>,
}

/// How/when a schedule triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every day at one time.
    Daily { time: TimeOfDay },
    /// On the given weekdays at one time.
    Weekly { days: Vec<DayOfWeek>, time: TimeOfDay },
    /// On explicit calendar dates. Dates are removed as they fire.
    SpecificDates {
        time: TimeOfDay,
        specific_dates: Vec<NaiveDate>,
        /// Per-date override of `time`.
        #[serde(default)]
        specific_date_times: BTreeMap<NaiveDate, Vec<TimeOfDay>>,
    },
    /// Weekly (or daily when `days` is empty) inside a date range.
    Custom {
        time: TimeOfDay,
        #[serde(default)]
        days: Vec<DayOfWeek>,
        #[serde(default)]
        start_date: Option<NaiveDate>,
        #[serde(default)]
        end_date: Option<NaiveDate>,
    },
    /// Every N minutes inside a daily window.
    Interval {
        interval_minutes: u32,
        interval_start_time: TimeOfDay,
        interval_end_time: TimeOfDay,
        /// Optional weekday filter; empty means every day.
        #[serde(default)]
        days: Vec<DayOfWeek>,
    },
    /// Several times a day, daily when `days` is empty, weekly otherwise.
    MultipleTimes {
        times: Vec<TimeOfDay>,
        #[serde(default)]
        days: Vec<DayOfWeek>,
    },
    /// Different times for each weekday.
    DaySpecific {
        day_times: BTreeMap<DayOfWeek, Vec<TimeOfDay>>,
    },
}

/// Discriminant of [`ScheduleKind`], for display and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Daily,
    Weekly,
    SpecificDates,
    Custom,
    Interval,
    MultipleTimes,
    DaySpecific,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::SpecificDates => "specific_dates",
            ScheduleType::Custom => "custom",
            ScheduleType::Interval => "interval",
            ScheduleType::MultipleTimes => "multiple_times",
            ScheduleType::DaySpecific => "day_specific",
        };
        f.write_str(name)
    }
}

impl ScheduleKind {
    pub fn daily(time: &str) -> Result<Self> {
        Ok(ScheduleKind::Daily {
            time: TimeOfDay::parse(time)?,
        })
    }

    pub fn weekly<S: AsRef<str>>(days: &[S], time: &str) -> Result<Self> {
        Ok(ScheduleKind::Weekly {
            days: DayOfWeek::parse_list(days)?,
            time: TimeOfDay::parse(time)?,
        })
    }

    /// Dates before `today` are dropped; it is an error if none remain.
    pub fn specific_dates<S: AsRef<str>>(
        dates: &[S],
        time: &str,
        date_times: &BTreeMap<String, Vec<String>>,
        today: NaiveDate,
    ) -> Result<Self> {
        let time = TimeOfDay::parse(time)?;
        if dates.is_empty() {
            return Err(FlowPilotError::validation("at least one date is required"));
        }
        let mut parsed = dates
            .iter()
            .map(|d| parse_date(d.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        parsed.retain(|d| *d >= today);
        parsed.sort();
        parsed.dedup();
        if parsed.is_empty() {
            return Err(FlowPilotError::validation("all selected dates have already passed"));
        }

        let mut specific_date_times = BTreeMap::new();
        for (date, times) in date_times {
            let date = parse_date(date)?;
            let times = TimeOfDay::parse_list(times)
                .map_err(|e| FlowPilotError::validation(format!("{date}: {e}")))?;
            if parsed.contains(&date) {
                specific_date_times.insert(date, times);
            }
        }

        Ok(ScheduleKind::SpecificDates {
            time,
            specific_dates: parsed,
            specific_date_times,
        })
    }

    pub fn custom<S: AsRef<str>>(
        time: &str,
        days: &[S],
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Self> {
        let time = TimeOfDay::parse(time)?;
        let days = DayOfWeek::parse_optional_list(days)?;
        let start_date = start_date.map(parse_date).transpose()?;
        let end_date = end_date.map(parse_date).transpose()?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start >= end {
                return Err(FlowPilotError::validation(format!(
                    "start date {start} must be before end date {end}"
                )));
            }
        }
        Ok(ScheduleKind::Custom {
            time,
            days,
            start_date,
            end_date,
        })
    }

    pub fn interval<S: AsRef<str>>(
        interval_minutes: u32,
        start_time: &str,
        end_time: &str,
        days: &[S],
    ) -> Result<Self> {
        validate_interval(interval_minutes)?;
        Ok(ScheduleKind::Interval {
            interval_minutes,
            interval_start_time: TimeOfDay::parse(start_time)?,
            interval_end_time: TimeOfDay::parse(end_time)?,
            days: DayOfWeek::parse_optional_list(days)?,
        })
    }

    pub fn multiple_times<S: AsRef<str>, D: AsRef<str>>(times: &[S], days: &[D]) -> Result<Self> {
        Ok(ScheduleKind::MultipleTimes {
            times: TimeOfDay::parse_list(times)?,
            days: DayOfWeek::parse_optional_list(days)?,
        })
    }

    pub fn day_specific(day_times: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        Ok(ScheduleKind::DaySpecific {
            day_times: parse_day_times(day_times)?,
        })
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            ScheduleKind::Daily { .. } => ScheduleType::Daily,
            ScheduleKind::Weekly { .. } => ScheduleType::Weekly,
            ScheduleKind::SpecificDates { .. } => ScheduleType::SpecificDates,
            ScheduleKind::Custom { .. } => ScheduleType::Custom,
            ScheduleKind::Interval { .. } => ScheduleType::Interval,
            ScheduleKind::MultipleTimes { .. } => ScheduleType::MultipleTimes,
            ScheduleKind::DaySpecific { .. } => ScheduleType::DaySpecific,
        }
    }

    /// Human-readable summary used when no description is supplied.
    pub fn default_description(&self) -> String {
        match self {
            ScheduleKind::Daily { time } => format!("Every day at {time}"),
            ScheduleKind::Weekly { days, time } => {
                format!("Every {} at {time}", join(days))
            }
            ScheduleKind::SpecificDates { specific_dates, .. } => {
                format!("Runs on {} specific dates", specific_dates.len())
            }
            ScheduleKind::Custom { .. } => "Custom schedule".to_string(),
            ScheduleKind::Interval {
                interval_minutes,
                interval_start_time,
                interval_end_time,
                ..
            } => format!(
                "Every {interval_minutes} minutes ({interval_start_time}-{interval_end_time})"
            ),
            ScheduleKind::MultipleTimes { times, .. } => {
                format!("Runs {} times a day: {}", times.len(), join(times))
            }
            ScheduleKind::DaySpecific { .. } => "Specific times per weekday".to_string(),
        }
    }
}

pub(crate) fn validate_interval(minutes: u32) -> Result<()> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        return Err(FlowPilotError::validation(format!(
            "interval must be between {MIN_INTERVAL_MINUTES} and {MAX_INTERVAL_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(())
}

pub(crate) fn parse_day_times(
    day_times: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<DayOfWeek, Vec<TimeOfDay>>> {
    if day_times.is_empty() {
        return Err(FlowPilotError::validation("at least one weekday is required"));
    }
    let mut parsed = BTreeMap::new();
    for (day, times) in day_times {
        let day: DayOfWeek = day.parse()?;
        let times = TimeOfDay::parse_list(times)
            .map_err(|e| FlowPilotError::validation(format!("{day}: {e}")))?;
        parsed.entry(day).or_insert_with(Vec::new).extend(times);
    }
    for times in parsed.values_mut() {
        times.sort();
        times.dedup();
    }
    Ok(parsed)
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScheduleConfig {
    /// Wrap a validated rule into a fresh, active schedule.
    pub fn new(
        flow_id: &str,
        flow_name: &str,
        kind: ScheduleKind,
        description: Option<String>,
        now: NaiveDateTime,
    ) -> Self {
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| kind.default_description());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            flow_name: flow_name.to_string(),
            kind,
            active: true,
            created_at: now,
            last_run: None,
            next_run: None,
            run_count: 0,
            description: Some(description),
        }
    }

    pub fn schedule_type(&self) -> ScheduleType {
        self.kind.schedule_type()
    }
}
