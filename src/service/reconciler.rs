//! Turns the generation service's reply into events the store can accept.
//!
//! The reply is untrusted text. It is parsed as a JSON array (with one repair
//! pass for code fences and surrounding prose), every element is checked
//! field by field, survivors get ids that are unique for the session, and
//! collisions with existing calendar time are annotated rather than dropped.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::busy::{local_to_utc, BusyInterval, UnknownEndPolicy};
use crate::models::event::{
    check_interval, sort_events, Event, EventId, EventTags, ValidationError, MAX_PROGRESS,
};
use crate::service::ids::IdAllocator;

const TEXT_FIELDS: [&str; 2] = ["text", "title"];
const START_FIELDS: [&str; 3] = ["start", "starttime", "start_time"];
const END_FIELDS: [&str; 3] = ["end", "endtime", "end_time"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedResponseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response JSON is {0}, expected an array of events")]
    NotAnArray(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Keep current events and add the accepted candidates.
    #[default]
    Append,
    /// Accepted candidates replace the current events.
    Replace,
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(MergeMode::Append),
            "replace" => Ok(MergeMode::Replace),
            other => Err(format!("unknown merge mode `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedCandidate {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub dropped_count: usize,
    pub overlap_count: usize,
    pub busy_conflict_count: usize,
    pub rejected: Vec<RejectedCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub events: Vec<Event>,
    /// Ids of the events that came from this response.
    pub accepted: Vec<EventId>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    mode: MergeMode,
    tz: Tz,
    busy: Vec<BusyInterval>,
    unknown_end: UnknownEndPolicy,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(chrono_tz::UTC)
    }
}

/// Reconciles with default settings: append mode, naive times read as UTC.
pub fn reconcile(raw: &str, current: &[Event]) -> Result<Reconciliation, MalformedResponseError> {
    let mut ids = IdAllocator::seeded(current);
    Reconciler::default().reconcile(raw, current, &mut ids)
}

impl Reconciler {
    pub fn new(tz: Tz) -> Self {
        Self {
            mode: MergeMode::Append,
            tz,
            busy: Vec::new(),
            unknown_end: UnknownEndPolicy::default(),
        }
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Also annotate candidates that land on imported busy time.
    pub fn with_busy(mut self, busy: Vec<BusyInterval>, unknown_end: UnknownEndPolicy) -> Self {
        self.busy = busy;
        self.unknown_end = unknown_end;
        self
    }

    /// `ids` must already know every id in `current`. It is only advanced
    /// when the response parses; on error it is left as it was.
    pub fn reconcile(
        &self,
        raw: &str,
        current: &[Event],
        ids: &mut IdAllocator,
    ) -> Result<Reconciliation, MalformedResponseError> {
        let candidates = parse_candidate_array(raw)?;

        let mut working = ids.clone();
        for event in current {
            working.observe(event.id);
        }

        let mut diagnostics = Diagnostics::default();
        let mut accepted = Vec::new();

        for (index, value) in candidates.iter().enumerate() {
            let candidate = match self.validate(value) {
                Ok(candidate) => candidate,
                Err(err) => {
                    diagnostics.dropped_count += 1;
                    diagnostics.rejected.push(RejectedCandidate {
                        index,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let id = working.claim(candidate.id);
            let overlaps_current = current
                .iter()
                .any(|event| event.overlaps(candidate.start, candidate.end));
            let overlaps_busy = self.busy.iter().any(|interval| {
                interval.blocks(candidate.start, candidate.end, self.unknown_end, self.tz)
            });
            if overlaps_current {
                diagnostics.overlap_count += 1;
            }
            if overlaps_busy {
                diagnostics.busy_conflict_count += 1;
            }

            accepted.push(Event {
                id,
                text: candidate.text,
                start: candidate.start,
                end: candidate.end,
                tags: candidate.tags,
                overlap: overlaps_current || overlaps_busy,
            });
        }

        if diagnostics.dropped_count > 0 {
            tracing::warn!(
                dropped = diagnostics.dropped_count,
                total = candidates.len(),
                "dropped invalid schedule candidates"
            );
        }
        tracing::info!(
            accepted = accepted.len(),
            overlaps = diagnostics.overlap_count,
            busy_conflicts = diagnostics.busy_conflict_count,
            "reconciled schedule response"
        );

        let accepted_ids: Vec<EventId> = accepted.iter().map(|event| event.id).collect();
        let mut events = match self.mode {
            MergeMode::Append => current.iter().cloned().chain(accepted).collect(),
            MergeMode::Replace => accepted,
        };
        sort_events(&mut events);
        *ids = working;

        Ok(Reconciliation {
            events,
            accepted: accepted_ids,
            diagnostics,
        })
    }

    fn validate(&self, value: &Value) -> Result<Candidate, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let text = string_field(object, &TEXT_FIELDS, "text")?;
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let start = self.time_field(object, &START_FIELDS, "start")?;
        let end = self.time_field(object, &END_FIELDS, "end")?;
        check_interval(start, end)?;
        let tags = tags_field(object)?;

        Ok(Candidate {
            id: id_field(object),
            text: text.to_string(),
            start,
            end,
            tags,
        })
    }

    fn time_field(
        &self,
        object: &Map<String, Value>,
        names: &[&str],
        field: &'static str,
    ) -> Result<DateTime<Utc>, ValidationError> {
        let raw = string_field(object, names, field)?;
        parse_timestamp(raw.trim(), self.tz).ok_or_else(|| ValidationError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
    }
}

struct Candidate {
    id: Option<EventId>,
    text: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tags: Option<EventTags>,
}

fn parse_candidate_array(raw: &str) -> Result<Vec<Value>, MalformedResponseError> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(err) => repair(raw).ok_or_else(|| MalformedResponseError::InvalidJson(err.to_string()))?,
    };
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Err(MalformedResponseError::NotAnArray("null")),
        Value::Bool(_) => Err(MalformedResponseError::NotAnArray("a boolean")),
        Value::Number(_) => Err(MalformedResponseError::NotAnArray("a number")),
        Value::String(_) => Err(MalformedResponseError::NotAnArray("a string")),
        Value::Object(_) => Err(MalformedResponseError::NotAnArray("an object")),
    }
}

/// Second chance for replies wrapped in a code fence or in prose: take the
/// outermost `[`..`]` slice.
fn repair(raw: &str) -> Option<Value> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    value.is_array().then_some(value)
}

fn string_field<'a>(
    object: &'a Map<String, Value>,
    names: &[&str],
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    let value = names
        .iter()
        .find_map(|name| object.get(*name))
        .filter(|value| !value.is_null())
        .ok_or(ValidationError::MissingField(field))?;
    value.as_str().ok_or(ValidationError::NotAString(field))
}

fn id_field(object: &Map<String, Value>) -> Option<EventId> {
    match object.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn tags_field(object: &Map<String, Value>) -> Result<Option<EventTags>, ValidationError> {
    let tags = match object.get("tags") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(tags)) => tags,
        Some(_) => return Err(ValidationError::InvalidTags),
    };
    let color = tags.get("color").and_then(Value::as_str).map(str::to_string);
    let progress = match tags.get("progress") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let progress = value.as_u64().ok_or(ValidationError::InvalidTags)?;
            if progress > u64::from(MAX_PROGRESS) {
                return Err(ValidationError::ProgressOutOfRange(progress));
            }
            u8::try_from(progress).ok()
        }
    };
    if color.is_none() && progress.is_none() {
        return Ok(None);
    }
    Ok(Some(EventTags { color, progress }))
}

/// RFC 3339 with an offset, or a naive ISO local time read in `tz`.
pub fn parse_timestamp(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| local_to_utc(naive, tz))
}
