use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use warp::Filter;

use crate::handlers::api::{self, ApiReply};
use crate::models::event::{Event, EventDraft, EventId};
use crate::models::goal::GoalId;
use crate::service::schedule_service::ScheduleController;

const MAX_BODY_BYTES: u64 = 1024 * 1024;

fn with_controller(
    controller: Arc<ScheduleController>,
) -> impl Filter<Extract = (Arc<ScheduleController>,), Error = Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn respond(reply: ApiReply) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::with_status(
        warp::reply::json(&reply.body),
        reply.status,
    ))
}

/// Every route of the planner API.
pub fn routes(
    controller: Arc<ScheduleController>,
    generation_timeout: Duration,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list_events = warp::path!("events")
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and_then(|c: Arc<ScheduleController>| async move { respond(api::list_events(&c).await) });

    let create_event = warp::path!("events")
        .and(warp::post())
        .and(with_controller(controller.clone()))
        .and(json_body::<EventDraft>())
        .and_then(|c: Arc<ScheduleController>, draft: EventDraft| async move {
            respond(api::create_event(&c, draft).await)
        });

    let update_event = warp::path!("events" / EventId)
        .and(warp::put())
        .and(with_controller(controller.clone()))
        .and(json_body::<Event>())
        .and_then(|id: EventId, c: Arc<ScheduleController>, event: Event| async move {
            respond(api::update_event(&c, id, event).await)
        });

    let delete_event = warp::path!("events" / EventId)
        .and(warp::delete())
        .and(with_controller(controller.clone()))
        .and_then(|id: EventId, c: Arc<ScheduleController>| async move {
            respond(api::delete_event(&c, id).await)
        });

    let calendar = warp::path!("calendar")
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and(warp::query::<api::CalendarQuery>())
        .and_then(|c: Arc<ScheduleController>, query: api::CalendarQuery| async move {
            respond(api::calendar(&c, query).await)
        });

    let list_goals = warp::path!("goals")
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and_then(|c: Arc<ScheduleController>| async move { respond(api::list_goals(&c).await) });

    let add_goal = warp::path!("goals")
        .and(warp::post())
        .and(with_controller(controller.clone()))
        .and(json_body::<api::GoalBody>())
        .and_then(|c: Arc<ScheduleController>, body: api::GoalBody| async move {
            respond(api::add_goal(&c, body).await)
        });

    let remove_goal = warp::path!("goals" / GoalId)
        .and(warp::delete())
        .and(with_controller(controller.clone()))
        .and_then(|id: GoalId, c: Arc<ScheduleController>| async move {
            respond(api::remove_goal(&c, id).await)
        });

    let list_blocked = warp::path!("blocked")
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and_then(|c: Arc<ScheduleController>| async move { respond(api::list_blocked(&c).await) });

    let block_day = warp::path!("blocked" / NaiveDate)
        .and(warp::put())
        .and(with_controller(controller.clone()))
        .and_then(|day: NaiveDate, c: Arc<ScheduleController>| async move {
            respond(api::block_day(&c, day).await)
        });

    let unblock_day = warp::path!("blocked" / NaiveDate)
        .and(warp::delete())
        .and(with_controller(controller.clone()))
        .and_then(|day: NaiveDate, c: Arc<ScheduleController>| async move {
            respond(api::unblock_day(&c, day).await)
        });

    let import_busy = warp::path!("busy")
        .and(warp::post())
        .and(with_controller(controller.clone()))
        .and(json_body::<api::BusyImportBody>())
        .and_then(|c: Arc<ScheduleController>, body: api::BusyImportBody| async move {
            respond(api::import_busy(&c, body, Utc::now()).await)
        });

    let schedule = warp::path!("schedule")
        .and(warp::post())
        .and(with_controller(controller.clone()))
        .and(
            json_body::<api::ScheduleBody>()
                .or(warp::any().map(api::ScheduleBody::default))
                .unify(),
        )
        .and_then(move |c: Arc<ScheduleController>, body: api::ScheduleBody| async move {
            respond(api::generate_schedule(&c, body, Utc::now(), generation_timeout).await)
        });

    let chat = warp::path!("api" / "chat")
        .and(warp::post())
        .and(with_controller(controller))
        .and(json_body::<api::ChatBody>())
        .and_then(|c: Arc<ScheduleController>, body: api::ChatBody| async move {
            respond(api::relay_chat(&c, body).await)
        });

    list_events
        .or(create_event)
        .or(update_event)
        .or(delete_event)
        .or(calendar)
        .or(list_goals)
        .or(add_goal)
        .or(remove_goal)
        .or(list_blocked)
        .or(block_day)
        .or(unblock_day)
        .or(import_busy)
        .or(schedule)
        .or(chat)
}

pub async fn run_api(controller: Arc<ScheduleController>, bind_addr: SocketAddr, generation_timeout: Duration) {
    let mut updates = controller.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let count = updates.borrow_and_update().len();
            tracing::debug!(count, "calendar updated");
        }
    });

    tracing::info!(%bind_addr, "planner API listening");
    warp::serve(routes(controller, generation_timeout))
        .run(bind_addr)
        .await;
}
