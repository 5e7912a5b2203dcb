//! Request handling for the HTTP surface, independent of the server framework.
//! Each handler returns a status and a JSON body; `runtime` wires them to routes.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use warp::http::StatusCode;

use crate::models::busy::CoverageWindow;
use crate::models::event::{Event, EventDraft, EventId};
use crate::models::goal::GoalId;
use crate::service::generation::{ChatMessage, GenerationError};
use crate::service::schedule_service::{ScheduleController, ScheduleError};

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiReply {
    fn ok<T: Serialize>(body: &T) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    fn with_status<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(err) => Self::error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }

    fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!(ErrorMessage {
                error: message.into()
            }),
        }
    }
}

impl From<ScheduleError> for ApiReply {
    fn from(err: ScheduleError) -> Self {
        let status = match &err {
            ScheduleError::EmptyGoals(_) | ScheduleError::Extraction(_) => StatusCode::BAD_REQUEST,
            ScheduleError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ScheduleError::NotFound(_) => StatusCode::NOT_FOUND,
            ScheduleError::RetiredId(_) | ScheduleError::Blocked(_) => StatusCode::CONFLICT,
            ScheduleError::Malformed(_) => StatusCode::BAD_GATEWAY,
            ScheduleError::Generation(cause) => generation_status(cause),
            ScheduleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        ApiReply::error(status, err.to_string())
    }
}

fn generation_status(err: &GenerationError) -> StatusCode {
    match err {
        GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GenerationError::MissingApiKey => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Deserialize)]
pub struct GoalBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct BusyImportBody {
    pub ics: String,
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleBody {
    #[serde(default)]
    pub reference: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
}

pub async fn list_events(controller: &ScheduleController) -> ApiReply {
    ApiReply::ok(&controller.events().await)
}

pub async fn calendar(controller: &ScheduleController, query: CalendarQuery) -> ApiReply {
    if query.from > query.to {
        return ApiReply::error(StatusCode::BAD_REQUEST, "`from` must not be after `to`");
    }
    ApiReply::ok(&controller.calendar_view(query.from, query.to).await)
}

pub async fn create_event(controller: &ScheduleController, draft: EventDraft) -> ApiReply {
    match controller.on_user_create(draft).await {
        Ok(event) => ApiReply::with_status(StatusCode::CREATED, &event),
        Err(err) => err.into(),
    }
}

pub async fn update_event(controller: &ScheduleController, id: EventId, event: Event) -> ApiReply {
    if event.id != id {
        return ApiReply::error(StatusCode::BAD_REQUEST, "path id and body id differ");
    }
    match controller.on_user_edit(event.clone()).await {
        Ok(()) => ApiReply::ok(&event),
        Err(err) => err.into(),
    }
}

pub async fn delete_event(controller: &ScheduleController, id: EventId) -> ApiReply {
    match controller.on_user_delete(id).await {
        Ok(()) => ApiReply::ok(&json!({ "deleted": id })),
        Err(err) => err.into(),
    }
}

pub async fn list_goals(controller: &ScheduleController) -> ApiReply {
    ApiReply::ok(&controller.goals().await)
}

pub async fn add_goal(controller: &ScheduleController, body: GoalBody) -> ApiReply {
    match controller.add_goal(&body.text).await {
        Some(goal) => ApiReply::with_status(StatusCode::CREATED, &goal),
        None => ApiReply::error(StatusCode::BAD_REQUEST, "goal text is empty"),
    }
}

pub async fn remove_goal(controller: &ScheduleController, id: GoalId) -> ApiReply {
    if controller.remove_goal(id).await {
        ApiReply::ok(&json!({ "deleted": id }))
    } else {
        ApiReply::error(StatusCode::NOT_FOUND, format!("no goal with id {}", id))
    }
}

pub async fn list_blocked(controller: &ScheduleController) -> ApiReply {
    ApiReply::ok(&controller.blocked_days().await)
}

pub async fn block_day(controller: &ScheduleController, day: NaiveDate) -> ApiReply {
    let added = controller.on_block_day(day).await;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    ApiReply::with_status(status, &json!({ "blocked": day }))
}

pub async fn unblock_day(controller: &ScheduleController, day: NaiveDate) -> ApiReply {
    if controller.on_unblock_day(day).await {
        ApiReply::ok(&json!({ "unblocked": day }))
    } else {
        ApiReply::error(StatusCode::NOT_FOUND, format!("{} is not blocked", day))
    }
}

pub async fn import_busy(controller: &ScheduleController, body: BusyImportBody, now: DateTime<Utc>) -> ApiReply {
    let week = CoverageWindow::week_of(now, controller.options().tz);
    let window = match CoverageWindow::new(
        body.window_start.unwrap_or(week.start),
        body.window_end.unwrap_or(week.end),
    ) {
        Ok(window) => window,
        Err(message) => return ApiReply::error(StatusCode::BAD_REQUEST, message),
    };
    match controller.import_busy(body.ics.as_bytes(), window).await {
        Ok(intervals) => ApiReply::ok(&intervals),
        Err(err) => err.into(),
    }
}

pub async fn generate_schedule(
    controller: &ScheduleController,
    body: ScheduleBody,
    now: DateTime<Utc>,
    timeout: Duration,
) -> ApiReply {
    match controller
        .generate_schedule(body.reference.unwrap_or(now), timeout)
        .await
    {
        Ok(outcome) => ApiReply::ok(&outcome),
        Err(err) => err.into(),
    }
}

pub async fn relay_chat(controller: &ScheduleController, body: ChatBody) -> ApiReply {
    let Some(messages) = body.messages.filter(|m| !m.is_empty()) else {
        return ApiReply::error(StatusCode::BAD_REQUEST, "Messages are required");
    };
    match controller.relay_chat(&messages).await {
        Ok(content) => ApiReply::ok(&ChatMessage::assistant(content)),
        Err(err) => {
            tracing::error!(error = %err, "chat relay failed");
            ApiReply::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
