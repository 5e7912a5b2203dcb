use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;
use warp::http::StatusCode;

use goalPlanner::handlers::api::{self, BusyImportBody, CalendarQuery, ChatBody, GoalBody, ScheduleBody};
use goalPlanner::models::event::EventDraft;
use goalPlanner::service::generation::{ChatMessage, ChatRole, GenerationClient, GenerationError, RetryPolicy};
use goalPlanner::service::schedule_service::{PlannerOptions, ScheduleController};
use goalPlanner::store::{MemoryBackend, QueuedStore};

struct CannedGeneration(&'static str);

#[async_trait]
impl GenerationClient for CannedGeneration {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        match messages.last() {
            Some(last) if last.role == ChatRole::User && last.content == "ping" => Ok("pong".to_string()),
            _ => Ok(self.0.to_string()),
        }
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, day, hour, 0, 0).unwrap()
}

async fn controller(reply: &'static str) -> ScheduleController {
    let store = QueuedStore::spawn(MemoryBackend::new());
    let options = PlannerOptions {
        retry: RetryPolicy::none(),
        ..PlannerOptions::default()
    };
    ScheduleController::new(Arc::new(store), Arc::new(CannedGeneration(reply)), options)
        .await
        .unwrap()
}

const CALENDAR: &str = "BEGIN:VCALENDAR\n\
VERSION:2.0\n\
BEGIN:VEVENT\n\
SUMMARY:Inside\n\
DTSTART:20250210T090000\n\
DTEND:20250210T100000\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
SUMMARY:Outside\n\
DTSTART:20250220T090000\n\
DTEND:20250220T100000\n\
END:VEVENT\n\
END:VCALENDAR\n";

#[tokio::test]
async fn event_crud_round_trip() {
    let controller = controller("[]").await;

    let created = api::create_event(
        &controller,
        EventDraft {
            text: "Write".to_string(),
            start: at(11, 9),
            end: at(11, 10),
            tags: None,
        },
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["id"], 1);

    let mut event: goalPlanner::models::event::Event = serde_json::from_value(created.body).unwrap();
    event.text = "Write more".to_string();
    let updated = api::update_event(&controller, 1, event.clone()).await;
    assert_eq!(updated.status, StatusCode::OK);

    let mismatched = api::update_event(&controller, 2, event).await;
    assert_eq!(mismatched.status, StatusCode::BAD_REQUEST);

    let listed = api::list_events(&controller).await;
    assert_eq!(listed.body[0]["text"], "Write more");

    assert_eq!(api::delete_event(&controller, 1).await.status, StatusCode::OK);
    assert_eq!(api::delete_event(&controller, 1).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_draft_is_unprocessable() {
    let controller = controller("[]").await;
    let reply = api::create_event(
        &controller,
        EventDraft {
            text: "Backwards".to_string(),
            start: at(11, 10),
            end: at(11, 9),
            tags: None,
        },
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(reply.body["error"].is_string());
}

#[tokio::test]
async fn calendar_view_fills_tag_defaults() {
    let controller = controller("[]").await;
    controller
        .on_user_create(EventDraft {
            text: "Gym".to_string(),
            start: at(12, 18),
            end: at(12, 19),
            tags: None,
        })
        .await
        .unwrap();

    let reply = api::calendar(
        &controller,
        CalendarQuery {
            from: at(12, 0),
            to: at(13, 0),
        },
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body[0]["color"], "#3d85c6");
    assert_eq!(reply.body[0]["progress"], 0);

    let empty = api::calendar(
        &controller,
        CalendarQuery {
            from: at(14, 0),
            to: at(15, 0),
        },
    )
    .await;
    assert_eq!(empty.body, json!([]));

    let inverted = api::calendar(
        &controller,
        CalendarQuery {
            from: at(15, 0),
            to: at(14, 0),
        },
    )
    .await;
    assert_eq!(inverted.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn goals_are_listed_and_removed() {
    let controller = controller("[]").await;
    let added = api::add_goal(
        &controller,
        GoalBody {
            text: "Learn piano".to_string(),
        },
    )
    .await;
    assert_eq!(added.status, StatusCode::CREATED);
    let blank = api::add_goal(&controller, GoalBody { text: "  ".to_string() }).await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);

    let id = added.body["id"].as_u64().unwrap();
    assert_eq!(api::list_goals(&controller).await.body[0]["text"], "Learn piano");
    assert_eq!(api::remove_goal(&controller, id).await.status, StatusCode::OK);
    assert_eq!(api::remove_goal(&controller, id).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blocked_day_statuses() {
    let controller = controller("[]").await;
    let day = NaiveDate::from_ymd_opt(2025, 2, 12).unwrap();

    assert_eq!(api::block_day(&controller, day).await.status, StatusCode::CREATED);
    assert_eq!(api::block_day(&controller, day).await.status, StatusCode::OK);
    let listed = api::list_blocked(&controller).await;
    assert_eq!(listed.body, json!(["2025-02-12"]));

    let refused = api::create_event(
        &controller,
        EventDraft {
            text: "Write".to_string(),
            start: at(12, 9),
            end: at(12, 10),
            tags: None,
        },
    )
    .await;
    assert_eq!(refused.status, StatusCode::CONFLICT);
    assert!(api::list_events(&controller).await.body.as_array().unwrap().is_empty());

    assert_eq!(api::unblock_day(&controller, day).await.status, StatusCode::OK);
    assert_eq!(api::unblock_day(&controller, day).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn busy_import_keeps_only_window_starts() {
    let controller = controller("[]").await;
    let reply = api::import_busy(
        &controller,
        BusyImportBody {
            ics: CALENDAR.to_string(),
            window_start: Some(at(10, 0)),
            window_end: Some(Utc.with_ymd_and_hms(2025, 2, 16, 23, 59, 59).unwrap()),
        },
        at(12, 12),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    let intervals = reply.body.as_array().unwrap();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0]["summary"], "Inside");
    assert_eq!(controller.busy().await.len(), 1);
}

#[tokio::test]
async fn busy_import_defaults_to_current_week() {
    let controller = controller("[]").await;
    let reply = api::import_busy(
        &controller,
        BusyImportBody {
            ics: CALENDAR.to_string(),
            window_start: None,
            window_end: None,
        },
        at(20, 12),
    )
    .await;
    let intervals = reply.body.as_array().unwrap();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0]["summary"], "Outside");
}

#[tokio::test]
async fn garbage_calendar_is_a_bad_request() {
    let controller = controller("[]").await;
    let reply = api::import_busy(
        &controller,
        BusyImportBody {
            ics: "this is not a calendar".to_string(),
            window_start: None,
            window_end: None,
        },
        at(12, 12),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedule_statuses() {
    let empty = controller("[]").await;
    let reply = api::generate_schedule(&empty, ScheduleBody::default(), at(12, 12), Duration::from_secs(5)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let broken = controller("not json").await;
    broken.add_goal("Anything").await;
    let reply = api::generate_schedule(&broken, ScheduleBody::default(), at(12, 12), Duration::from_secs(5)).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);

    let working = controller(r#"[{"text":"Practice","start":"2025-02-12T17:00:00Z","end":"2025-02-12T18:00:00Z"}]"#).await;
    working.add_goal("Learn piano").await;
    let reply = api::generate_schedule(
        &working,
        ScheduleBody {
            reference: Some(at(12, 8)),
        },
        at(1, 0),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["accepted"], json!([1]));
    assert_eq!(reply.body["diagnostics"]["dropped_count"], 0);
}

#[tokio::test]
async fn chat_relay_requires_messages() {
    let controller = controller("[]").await;

    let missing = api::relay_chat(&controller, ChatBody { messages: None }).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["error"], "Messages are required");

    let reply = api::relay_chat(
        &controller,
        ChatBody {
            messages: Some(vec![ChatMessage::user("ping")]),
        },
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "role": "assistant", "content": "pong" }));
}
