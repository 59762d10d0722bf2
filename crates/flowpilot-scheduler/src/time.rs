//! Wall-clock value types used by schedules: `HH:MM` times and weekdays.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use flowpilot_core::error::{FlowPilotError, Result};

/// A time of day with minute precision, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(FlowPilotError::validation(format!(
                "invalid time {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Parse `HH:MM` (a single-digit hour is accepted).
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || FlowPilotError::validation(format!("invalid time '{s}', expected HH:MM"));
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }

    /// Parse a list of times, rejecting an empty list.
    pub fn parse_list<S: AsRef<str>>(times: &[S]) -> Result<Vec<Self>> {
        if times.is_empty() {
            return Err(FlowPilotError::validation("at least one time is required"));
        }
        let mut parsed = times
            .iter()
            .map(|t| Self::parse(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// The instant this time falls on for the given date.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.to_naive())
    }

    /// Truncate an instant to its wall-clock minute.
    pub fn of(instant: NaiveDateTime) -> Self {
        Self {
            hour: instant.hour(),
            minute: instant.minute(),
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = FlowPilotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Day of the week, persisted as its lowercase English name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn of(date: NaiveDate) -> Self {
        Self::from(date.weekday())
    }

    /// Parse a list of weekday names, rejecting an empty list.
    pub fn parse_list<S: AsRef<str>>(days: &[S]) -> Result<Vec<Self>> {
        if days.is_empty() {
            return Err(FlowPilotError::validation("at least one weekday is required"));
        }
        Self::parse_optional_list(days)
    }

    /// Parse a possibly empty list of weekday names.
    pub fn parse_optional_list<S: AsRef<str>>(days: &[S]) -> Result<Vec<Self>> {
        let mut parsed = days
            .iter()
            .map(|d| d.as_ref().parse())
            .collect::<Result<Vec<Self>>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = FlowPilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => Ok(DayOfWeek::Monday),
            "tuesday" | "tue" => Ok(DayOfWeek::Tuesday),
            "wednesday" | "wed" => Ok(DayOfWeek::Wednesday),
            "thursday" | "thu" => Ok(DayOfWeek::Thursday),
            "friday" | "fri" => Ok(DayOfWeek::Friday),
            "saturday" | "sat" => Ok(DayOfWeek::Saturday),
            "sunday" | "sun" => Ok(DayOfWeek::Sunday),
            other => Err(FlowPilotError::validation(format!("unknown weekday '{other}'"))),
        }
    }
}

/// Source of "now" for the registry and dispatcher.
pub type Clock = std::sync::Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// The local wall clock.
pub fn system_clock() -> Clock {
    std::sync::Arc::new(|| chrono::Local::now().naive_local())
}

/// Parse an ISO `YYYY-MM-DD` date (a trailing time part is ignored).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| FlowPilotError::validation(format!("invalid date '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(TimeOfDay::parse("09:05").unwrap().to_string(), "09:05");
        assert_eq!(TimeOfDay::parse("7:30").unwrap().to_string(), "07:30");
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("12:60").is_err());
        assert!(TimeOfDay::parse("12:5").is_err());
        assert!(TimeOfDay::parse("noon").is_err());
        assert!(TimeOfDay::parse("+1:00").is_err());
    }

    #[test]
    fn test_parse_time_list_sorts_and_dedups() {
        let times = TimeOfDay::parse_list(&["18:00", "08:00", "18:00"]).unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].to_string(), "08:00");
        assert!(TimeOfDay::parse_list::<&str>(&[]).is_err());
    }

    #[test]
    fn test_weekday_names() {
        assert_eq!("Monday".parse::<DayOfWeek>().unwrap(), DayOfWeek::Monday);
        assert_eq!("sat".parse::<DayOfWeek>().unwrap(), DayOfWeek::Saturday);
        assert!("funday".parse::<DayOfWeek>().is_err());
        assert!(DayOfWeek::parse_list::<&str>(&[]).is_err());
        assert_eq!(
            serde_json::to_string(&DayOfWeek::Friday).unwrap(),
            "\"friday\""
        );
    }

    #[test]
    fn test_time_serde_as_string() {
        let t = TimeOfDay::parse("06:45").unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"06:45\"");
        let back: TimeOfDay = serde_json::from_str("\"06:45\"").unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<TimeOfDay>("\"6h45\"").is_err());
    }

    #[test]
    fn test_parse_date() {
        let d = parse_date("2025-06-18").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 6, 18).unwrap());
        assert_eq!(parse_date("2025-06-18T10:00:00").unwrap(), d);
        assert!(parse_date("18/06/2025").is_err());
    }
}
