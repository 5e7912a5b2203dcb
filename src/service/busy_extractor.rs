//! Turns an uploaded iCalendar file into the busy intervals a schedule must avoid.
//!
//! Extraction is lossy on purpose: an entry whose start cannot be read is
//! skipped, an entry without an end keeps [`IntervalEnd::Unknown`]. Only a file
//! that is not a calendar at all is an error.

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use ical::property::Property;

use crate::models::busy::{local_midnight, local_to_utc, BusyInterval, CoverageWindow, IntervalEnd};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("calendar file could not be parsed: {0}")]
    Parse(String),
    #[error("file does not contain a VCALENDAR")]
    NoCalendar,
}

pub fn extract_busy_intervals(
    raw: &[u8],
    window: &CoverageWindow,
    default_tz: Tz,
) -> Result<Vec<BusyInterval>, ExtractionError> {
    let parser = ical::IcalParser::new(raw);
    let mut calendars = 0usize;
    let mut intervals = Vec::new();
    let mut skipped = 0usize;

    for calendar in parser {
        let calendar = calendar.map_err(|e| ExtractionError::Parse(e.to_string()))?;
        calendars += 1;
        for event in &calendar.events {
            match read_interval(&event.properties, default_tz) {
                Some(interval) if window.contains(interval.start) => intervals.push(interval),
                Some(_) => {}
                None => skipped += 1,
            }
        }
    }

    if calendars == 0 {
        return Err(ExtractionError::NoCalendar);
    }
    tracing::debug!(
        kept = intervals.len(),
        skipped,
        window_start = %window.start,
        window_end = %window.end,
        "extracted busy intervals"
    );
    Ok(intervals)
}

fn read_interval(properties: &[Property], default_tz: Tz) -> Option<BusyInterval> {
    let start = match find(properties, "DTSTART").and_then(|p| parse_time(p, default_tz)) {
        Some(start) => start,
        None => {
            tracing::debug!("skipping VEVENT without a readable DTSTART");
            return None;
        }
    };

    let end = find(properties, "DTEND")
        .and_then(|p| parse_time(p, default_tz))
        .or_else(|| {
            find(properties, "DURATION")
                .and_then(|p| p.value.as_deref())
                .and_then(parse_duration)
                .and_then(|d| start.checked_add_signed(d))
        })
        .map_or(IntervalEnd::Unknown, IntervalEnd::At);

    let summary = find(properties, "SUMMARY")
        .and_then(|p| p.value.clone())
        .map(|s| unescape_text(&s));

    Some(BusyInterval { summary, start, end })
}

fn find<'a>(properties: &'a [Property], name: &str) -> Option<&'a Property> {
    properties.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

fn param<'a>(property: &'a Property, name: &str) -> Option<&'a str> {
    property
        .params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

fn parse_time(property: &Property, default_tz: Tz) -> Option<DateTime<Utc>> {
    let value = property.value.as_deref()?.trim();
    let tz = match param(property, "TZID") {
        Some(tzid) => Tz::from_str(tzid.trim_matches('"')).unwrap_or_else(|_| {
            tracing::warn!(tzid, "unknown TZID, using default zone");
            default_tz
        }),
        None => default_tz,
    };

    if value.len() == 8 {
        let day = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(local_midnight(day, tz));
    }
    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Some(local_to_utc(naive, tz));
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Parses a positive RFC 5545 duration such as `PT1H30M` or `P1W`.
fn parse_duration(raw: &str) -> Option<Duration> {
    let body = raw.trim().strip_prefix('+').unwrap_or(raw.trim());
    let body = body.strip_prefix('P')?;
    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    for c in body.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => number.push(c),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                let part = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(n)?,
                    ('D', false) => Duration::try_days(n)?,
                    ('H', true) => Duration::try_hours(n)?,
                    ('M', true) => Duration::try_minutes(n)?,
                    ('S', true) => Duration::try_seconds(n)?,
                    _ => return None,
                };
                total = total.checked_add(&part)?;
            }
        }
    }
    if !number.is_empty() || total <= Duration::zero() {
        return None;
    }
    Some(total)
}

fn unescape_text(raw: &str) -> String {
    raw.replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> CoverageWindow {
        CoverageWindow::new(
            Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 16, 23, 59, 59).unwrap(),
        )
        .unwrap()
    }

    fn calendar(events: &str) -> Vec<u8> {
        format!(
            "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//test//EN\n{}END:VCALENDAR\n",
            events
        )
        .into_bytes()
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("PT1H30M"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("P1W"), Some(Duration::days(7)));
        assert_eq!(parse_duration("P1DT2H"), Some(Duration::hours(26)));
        assert_eq!(parse_duration("-PT15M"), None);
        assert_eq!(parse_duration("PT"), None);
        assert_eq!(parse_duration("P1H"), None);
    }

    #[test]
    fn reads_tzid_and_utc_values() {
        let raw = calendar(
            "BEGIN:VEVENT\nSUMMARY:Standup\nDTSTART;TZID=America/New_York:20250211T090000\nDTEND:20250211T143000Z\nEND:VEVENT\n",
        );
        let intervals = extract_busy_intervals(&raw, &window(), chrono_tz::UTC).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].summary.as_deref(), Some("Standup"));
        assert_eq!(intervals[0].start, Utc.with_ymd_and_hms(2025, 2, 11, 14, 0, 0).unwrap());
        assert_eq!(
            intervals[0].end,
            IntervalEnd::At(Utc.with_ymd_and_hms(2025, 2, 11, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn end_falls_back_to_duration_then_unknown() {
        let raw = calendar(
            "BEGIN:VEVENT\nSUMMARY:Gym\nDTSTART:20250212T180000Z\nDURATION:PT1H\nEND:VEVENT\n\
             BEGIN:VEVENT\nSUMMARY:Open\nDTSTART:20250213T180000Z\nEND:VEVENT\n",
        );
        let intervals = extract_busy_intervals(&raw, &window(), chrono_tz::UTC).unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(
            intervals[0].end,
            IntervalEnd::At(Utc.with_ymd_and_hms(2025, 2, 12, 19, 0, 0).unwrap())
        );
        assert_eq!(intervals[1].end, IntervalEnd::Unknown);
    }

    #[test]
    fn duration_past_the_calendar_range_leaves_end_unknown() {
        assert!(parse_duration("P20000000W").is_some());
        let raw = calendar(
            "BEGIN:VEVENT\nSUMMARY:Sabbatical\nDTSTART:20250211T090000Z\nDURATION:P20000000W\nEND:VEVENT\n",
        );
        let intervals = extract_busy_intervals(&raw, &window(), chrono_tz::UTC).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].end, IntervalEnd::Unknown);
    }

    #[test]
    fn unreadable_start_is_skipped_silently() {
        let raw = calendar(
            "BEGIN:VEVENT\nSUMMARY:Broken\nDTSTART:someday\nEND:VEVENT\n\
             BEGIN:VEVENT\nSUMMARY:No start\nEND:VEVENT\n\
             BEGIN:VEVENT\nSUMMARY:Fine\nDTSTART:20250214\nEND:VEVENT\n",
        );
        let intervals = extract_busy_intervals(&raw, &window(), chrono_tz::UTC).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].summary.as_deref(), Some("Fine"));
        assert_eq!(intervals[0].start, Utc.with_ymd_and_hms(2025, 2, 14, 0, 0, 0).unwrap());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let raw = calendar(
            "BEGIN:VEVENT\nDTSTART:20250210T000000Z\nEND:VEVENT\n\
             BEGIN:VEVENT\nDTSTART:20250216T235959Z\nEND:VEVENT\n\
             BEGIN:VEVENT\nDTSTART:20250217T000000Z\nEND:VEVENT\n",
        );
        let intervals = extract_busy_intervals(&raw, &window(), chrono_tz::UTC).unwrap();
        assert_eq!(intervals.len(), 2);
    }

    #[test]
    fn empty_input_is_not_a_calendar() {
        assert!(matches!(
            extract_busy_intervals(b"", &window(), chrono_tz::UTC),
            Err(ExtractionError::NoCalendar)
        ));
    }
}
