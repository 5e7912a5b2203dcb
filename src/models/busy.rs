use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_END: &str = "unknown";

/// End of an imported busy interval. The source calendar may not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalEnd {
    At(DateTime<Utc>),
    Unknown,
}

impl IntervalEnd {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            IntervalEnd::At(at) => Some(*at),
            IntervalEnd::Unknown => None,
        }
    }
}

impl fmt::Display for IntervalEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalEnd::At(at) => write!(f, "{}", at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            IntervalEnd::Unknown => f.write_str(UNKNOWN_END),
        }
    }
}

impl Serialize for IntervalEnd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IntervalEnd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case(UNKNOWN_END) {
            return Ok(IntervalEnd::Unknown);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| IntervalEnd::At(at.with_timezone(&Utc)))
            .map_err(de::Error::custom)
    }
}

/// A stretch of time taken by an imported calendar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub start: DateTime<Utc>,
    pub end: IntervalEnd,
}

impl BusyInterval {
    /// Where this interval stops blocking time, or `None` when the policy
    /// says an open-ended interval blocks nothing.
    pub fn blocking_end(&self, policy: UnknownEndPolicy, tz: Tz) -> Option<DateTime<Utc>> {
        match self.end {
            IntervalEnd::At(end) => Some(end),
            IntervalEnd::Unknown => match policy {
                UnknownEndPolicy::Ignore => None,
                UnknownEndPolicy::DefaultDuration(minutes) => {
                    Some(self.start + Duration::minutes(i64::from(minutes)))
                }
                UnknownEndPolicy::BlockRestOfDay => {
                    let local_day = self.start.with_timezone(&tz).date_naive();
                    let next_day = local_day.succ_opt().unwrap_or(local_day);
                    Some(local_midnight(next_day, tz))
                }
            },
        }
    }

    pub fn blocks(&self, start: DateTime<Utc>, end: DateTime<Utc>, policy: UnknownEndPolicy, tz: Tz) -> bool {
        match self.blocking_end(policy, tz) {
            Some(blocked_until) => self.start < end && start < blocked_until,
            None => false,
        }
    }
}

/// How intervals without an end take part in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownEndPolicy {
    /// Block from the start until local midnight.
    #[default]
    BlockRestOfDay,
    /// Treat the interval as blocking nothing.
    Ignore,
    /// Assume a fixed length in minutes.
    DefaultDuration(u32),
}

impl FromStr for UnknownEndPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "rest-of-day" => Ok(UnknownEndPolicy::BlockRestOfDay),
            "ignore" => Ok(UnknownEndPolicy::Ignore),
            other => other
                .strip_prefix("minutes:")
                .and_then(|m| m.parse::<u32>().ok())
                .filter(|m| *m > 0)
                .map(UnknownEndPolicy::DefaultDuration)
                .ok_or_else(|| format!("unknown end policy `{}`", s)),
        }
    }
}

/// The closed `[start, end]` range a schedule must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CoverageWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if start > end {
            return Err(format!("window start {} is after end {}", start, end));
        }
        Ok(Self { start, end })
    }

    /// Monday 00:00 through Sunday 23:59:59.999 of the week containing `reference`, in `tz`.
    pub fn week_of(reference: DateTime<Utc>, tz: Tz) -> Self {
        let local = reference.with_timezone(&tz).date_naive();
        let monday = local - Duration::days(i64::from(local.weekday().num_days_from_monday()));
        let next_monday = monday + Duration::days(7);
        Self {
            start: local_midnight(monday, tz),
            end: local_midnight(next_monday, tz) - Duration::milliseconds(1),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

pub(crate) fn local_midnight(day: NaiveDate, tz: Tz) -> DateTime<Utc> {
    local_to_utc(day.and_time(chrono::NaiveTime::MIN), tz)
}

/// Resolves a wall-clock time in `tz`, taking the earlier instant on DST
/// overlaps and reading gap times as UTC offsets from the zone.
pub(crate) fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_end_serializes_unknown_verbatim() {
        let interval = BusyInterval {
            summary: Some("dentist".to_string()),
            start: Utc.with_ymd_and_hms(2025, 2, 10, 9, 0, 0).unwrap(),
            end: IntervalEnd::Unknown,
        };
        let json = serde_json::to_value(&interval).unwrap();
        assert_eq!(json["end"], "unknown");
        assert_eq!(json["start"], "2025-02-10T09:00:00Z");

        let back: BusyInterval = serde_json::from_value(json).unwrap();
        assert_eq!(back, interval);
    }

    #[test]
    fn week_of_spans_monday_to_sunday() {
        // Thursday
        let reference = Utc.with_ymd_and_hms(2025, 2, 13, 15, 30, 0).unwrap();
        let window = CoverageWindow::week_of(reference, chrono_tz::UTC);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap());
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2025, 2, 17, 0, 0, 0).unwrap() - Duration::milliseconds(1)
        );
        assert!(window.contains(reference));
    }

    #[test]
    fn week_of_respects_zone() {
        // Monday 02:00 UTC is still Sunday evening in New York.
        let reference = Utc.with_ymd_and_hms(2025, 2, 17, 2, 0, 0).unwrap();
        let window = CoverageWindow::week_of(reference, chrono_tz::America::New_York);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 2, 10, 5, 0, 0).unwrap());
    }

    #[test]
    fn unknown_end_policies() {
        let interval = BusyInterval {
            summary: None,
            start: Utc.with_ymd_and_hms(2025, 2, 10, 9, 0, 0).unwrap(),
            end: IntervalEnd::Unknown,
        };
        let tz = chrono_tz::UTC;
        assert_eq!(interval.blocking_end(UnknownEndPolicy::Ignore, tz), None);
        assert_eq!(
            interval.blocking_end(UnknownEndPolicy::DefaultDuration(30), tz),
            Some(Utc.with_ymd_and_hms(2025, 2, 10, 9, 30, 0).unwrap())
        );
        assert_eq!(
            interval.blocking_end(UnknownEndPolicy::BlockRestOfDay, tz),
            Some(Utc.with_ymd_and_hms(2025, 2, 11, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("ignore".parse(), Ok(UnknownEndPolicy::Ignore));
        assert_eq!("Rest-Of-Day".parse(), Ok(UnknownEndPolicy::BlockRestOfDay));
        assert_eq!("minutes:45".parse(), Ok(UnknownEndPolicy::DefaultDuration(45)));
        assert!("minutes:0".parse::<UnknownEndPolicy>().is_err());
        assert!("sometimes".parse::<UnknownEndPolicy>().is_err());
    }
}
