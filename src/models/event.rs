use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EventId = u64;

pub const DEFAULT_COLOR: &str = "#3d85c6";
pub const DEFAULT_PROGRESS: u8 = 0;
pub const MAX_PROGRESS: u8 = 100;

/// Colors offered by the event edit form.
pub const PALETTE: [(&str, &str); 11] = [
    ("Dark Green", "#228B22"),
    ("Green", "#6aa84f"),
    ("Yellow", "#f1c232"),
    ("Orange", "#e69138"),
    ("Crimson", "#DC143C"),
    ("Light Coral", "#F08080"),
    ("Purple", "#9370DB"),
    ("Turquoise", "#40E0D0"),
    ("Light Blue", "#ADD8E6"),
    ("Sky Blue", "#87CEEB"),
    ("Blue", "#3d85c6"),
];

/// Resolves a palette name (case-insensitive) or passes a `#rrggbb` value through.
pub fn resolve_color(name_or_hex: &str) -> Option<String> {
    let trimmed = name_or_hex.trim();
    if trimmed.starts_with('#')
        && trimmed.len() == 7
        && trimmed[1..].chars().all(|c| c.is_ascii_hexdigit())
    {
        return Some(trimmed.to_string());
    }
    PALETTE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
        .map(|(_, hex)| hex.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl EventTags {
    pub fn color_or_default(&self) -> &str {
        self.color.as_deref().unwrap_or(DEFAULT_COLOR)
    }

    pub fn progress_or_default(&self) -> u8 {
        self.progress.unwrap_or(DEFAULT_PROGRESS)
    }
}

/// A scheduled work item. This is the persisted shape of the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub text: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<EventTags>,
    /// Set when the event collided with existing calendar time when it was generated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overlap: bool,
}

/// A user-created event that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub text: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub tags: Option<EventTags>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("candidate is not a JSON object")]
    NotAnObject,
    #[error("missing `{0}` field")]
    MissingField(&'static str),
    #[error("`{0}` field must be a string")]
    NotAString(&'static str),
    #[error("event text is empty")]
    EmptyText,
    #[error("`{field}` is not a valid timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("start {start} is not before end {end}")]
    NonPositiveDuration {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("progress {0} is out of range 0-100")]
    ProgressOutOfRange(u64),
    #[error("`tags` must be an object")]
    InvalidTags,
}

pub fn check_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ValidationError> {
    if start < end {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveDuration { start, end })
    }
}

fn check_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        Err(ValidationError::EmptyText)
    } else {
        Ok(())
    }
}

fn check_tags(tags: Option<&EventTags>) -> Result<(), ValidationError> {
    match tags.and_then(|t| t.progress) {
        Some(progress) if progress > MAX_PROGRESS => {
            Err(ValidationError::ProgressOutOfRange(u64::from(progress)))
        }
        _ => Ok(()),
    }
}

impl Event {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text(&self.text)?;
        check_interval(self.start, self.end)?;
        check_tags(self.tags.as_ref())
    }

    /// Half-open `[start, end)` intersection test.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }

    pub fn color(&self) -> &str {
        self.tags
            .as_ref()
            .map_or(DEFAULT_COLOR, EventTags::color_or_default)
    }

    pub fn progress(&self) -> u8 {
        self.tags
            .as_ref()
            .map_or(DEFAULT_PROGRESS, EventTags::progress_or_default)
    }
}

impl EventDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text(&self.text)?;
        check_interval(self.start, self.end)?;
        check_tags(self.tags.as_ref())
    }

    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            text: self.text,
            start: self.start,
            end: self.end,
            tags: self.tags,
            overlap: false,
        }
    }
}

/// Sorts events into calendar order.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
}
