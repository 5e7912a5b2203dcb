use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use crate::models::busy::{BusyInterval, CoverageWindow, IntervalEnd, UnknownEndPolicy};
use crate::service::generation::ChatMessage;

pub const INPUT_DATA_MARKER: &str = "Input data (JSON):";

const SYSTEM_PROMPT: &str = "You are a strict JSON weekly planning engine. You read a list of goals and a list of busy \
times and reply ONLY with a single JSON array of scheduled work sessions, with no markdown, no backticks, and no extra text.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("at least one goal is required to request a schedule")]
pub struct EmptyGoalsError;

/// Everything the generation service needs to plan one window.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    goals: Vec<String>,
    busy: Vec<BusyInterval>,
    reference: DateTime<Utc>,
    window: CoverageWindow,
    unknown_end: UnknownEndPolicy,
    tz: Tz,
}

impl ScheduleRequest {
    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    pub fn busy(&self) -> &[BusyInterval] {
        &self.busy
    }

    pub fn reference(&self) -> DateTime<Utc> {
        self.reference
    }

    pub fn window(&self) -> CoverageWindow {
        self.window
    }

    /// The structured part of the request, embedded verbatim in the prompt.
    pub fn input_data(&self) -> Value {
        let busy: Vec<Value> = self
            .busy
            .iter()
            .map(|interval| {
                let mut entry = json!({
                    "summary": interval.summary,
                    "start": rfc3339(interval.start),
                    "end": interval.end.to_string(),
                });
                if interval.end == IntervalEnd::Unknown {
                    if let Some(until) = interval.blocking_end(self.unknown_end, self.tz) {
                        entry["blocks_until"] = Value::String(rfc3339(until));
                    }
                }
                entry
            })
            .collect();
        json!({
            "goals": self.goals,
            "busy": busy,
            "window": {
                "start": rfc3339(self.window.start),
                "end": rfc3339(self.window.end),
            },
            "reference": rfc3339(self.reference),
            "timezone": self.tz.name(),
        })
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        // A Value always serializes.
        let data = serde_json::to_string_pretty(&self.input_data()).unwrap_or_default();
        let prompt = format!(
            "I want to work on the goals listed under \"goals\" during the window under \"window\".\n\
             Task: produce a detailed schedule that covers every day of the window.\n\
             Rules:\n\
             - Each entry is one work session with a specific, actionable title for one goal.\n\
             - Never schedule anything that overlaps an entry under \"busy\". An entry whose \"end\" is \"unknown\" \
               blocks time until its \"blocks_until\" value, or only its start time if that is absent.\n\
             - Every session must start and end inside the window, with start before end.\n\
             - Use the user's timezone ({tz}) for choosing sensible hours.\n\
             - Output ONLY raw JSON, no prose, markdown, or code fences.\n\
             - The JSON shape must be exactly:\n\
             [{{\"text\":\"<string>\",\"start\":\"<RFC3339 datetime>\",\"end\":\"<RFC3339 datetime>\"}}]\n\
             {marker}\n{data}",
            tz = self.tz.name(),
            marker = INPUT_DATA_MARKER,
            data = data,
        );
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleRequestBuilder {
    tz: Tz,
    unknown_end: UnknownEndPolicy,
}

impl ScheduleRequestBuilder {
    pub fn new(tz: Tz, unknown_end: UnknownEndPolicy) -> Self {
        Self { tz, unknown_end }
    }

    /// Builds a request covering the Monday-to-Sunday week around `reference`.
    pub fn build(
        &self,
        goals: &[String],
        busy: &[BusyInterval],
        reference: DateTime<Utc>,
    ) -> Result<ScheduleRequest, EmptyGoalsError> {
        self.build_for_window(goals, busy, reference, CoverageWindow::week_of(reference, self.tz))
    }

    pub fn build_for_window(
        &self,
        goals: &[String],
        busy: &[BusyInterval],
        reference: DateTime<Utc>,
        window: CoverageWindow,
    ) -> Result<ScheduleRequest, EmptyGoalsError> {
        let goals: Vec<String> = goals
            .iter()
            .filter(|goal| !goal.trim().is_empty())
            .cloned()
            .collect();
        if goals.is_empty() {
            return Err(EmptyGoalsError);
        }
        Ok(ScheduleRequest {
            goals,
            busy: busy.to_vec(),
            reference,
            window,
            unknown_end: self.unknown_end,
            tz: self.tz,
        })
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
