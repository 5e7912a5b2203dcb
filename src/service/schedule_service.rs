use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::busy::{BusyInterval, CoverageWindow, UnknownEndPolicy};
use crate::models::event::{check_interval, sort_events, Event, EventDraft, EventId, ValidationError};
use crate::models::goal::{Goal, GoalId, GoalList};
use crate::service::busy_extractor::{extract_busy_intervals, ExtractionError};
use crate::service::generation::{
    complete_with_retry, ChatMessage, GenerationClient, GenerationError, RetryPolicy,
};
use crate::service::ids::IdAllocator;
use crate::service::reconciler::{Diagnostics, MalformedResponseError, MergeMode, Reconciler};
use crate::service::request_builder::{EmptyGoalsError, ScheduleRequestBuilder};
use crate::store::{EventStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    EmptyGoals(#[from] EmptyGoalsError),
    #[error(transparent)]
    Malformed(#[from] MalformedResponseError),
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("no event with id {0}")]
    NotFound(EventId),
    #[error("event id {0} belonged to a deleted event and cannot be reused")]
    RetiredId(EventId),
    #[error("{0} is blocked")]
    Blocked(NaiveDate),
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    pub tz: Tz,
    pub unknown_end: UnknownEndPolicy,
    pub merge_mode: MergeMode,
    pub retry: RetryPolicy,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            tz: chrono_tz::UTC,
            unknown_end: UnknownEndPolicy::default(),
            merge_mode: MergeMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleOutcome {
    pub events: Vec<Event>,
    pub accepted: Vec<EventId>,
    pub diagnostics: Diagnostics,
}

/// One calendar cell as the grid draws it, with tag defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub id: EventId,
    pub text: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub color: String,
    pub progress: u8,
    pub overlap: bool,
}

impl From<&Event> for CalendarEntry {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            text: event.text.clone(),
            start: event.start,
            end: event.end,
            color: event.color().to_string(),
            progress: event.progress(),
            overlap: event.overlap,
        }
    }
}

struct PlannerState {
    events: Vec<Event>,
    ids: IdAllocator,
    goals: GoalList,
    busy: Vec<BusyInterval>,
    blocked: BTreeSet<NaiveDate>,
}

impl PlannerState {
    /// First blocked local day that `[start, end)` touches.
    fn blocked_day(&self, start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> Option<NaiveDate> {
        if self.blocked.is_empty() {
            return None;
        }
        let first = start.with_timezone(&tz).date_naive();
        let last = (end - chrono::Duration::nanoseconds(1)).with_timezone(&tz).date_naive();
        if last < first {
            return None;
        }
        self.blocked.range(first..=last).next().copied()
    }

    fn check_unblocked(&self, start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> Result<(), ScheduleError> {
        match self.blocked_day(start, end, tz) {
            Some(day) => Err(ScheduleError::Blocked(day)),
            None => Ok(()),
        }
    }
}

/// Owns the session: the stored events plus the transient goal list,
/// imported busy time and blocked days. Every mutation saves the full
/// collection first and only then updates memory, so a failed save changes
/// nothing.
pub struct ScheduleController {
    store: Arc<dyn EventStore>,
    client: Arc<dyn GenerationClient>,
    options: PlannerOptions,
    state: Arc<Mutex<PlannerState>>,
    updates: Arc<watch::Sender<Vec<Event>>>,
}

impl ScheduleController {
    pub async fn new(
        store: Arc<dyn EventStore>,
        client: Arc<dyn GenerationClient>,
        options: PlannerOptions,
    ) -> Result<Self, StoreError> {
        let mut events = store.load().await?;
        sort_events(&mut events);
        tracing::info!(count = events.len(), "loaded events");
        let (updates, _) = watch::channel(events.clone());
        Ok(Self {
            store,
            client,
            options,
            state: Arc::new(Mutex::new(PlannerState {
                ids: IdAllocator::seeded(&events),
                events,
                goals: GoalList::new(),
                busy: Vec::new(),
                blocked: BTreeSet::new(),
            })),
            updates: Arc::new(updates),
        })
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    pub async fn events(&self) -> Vec<Event> {
        self.state.lock().await.events.clone()
    }

    /// Receives the full event list after every successful change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Event>> {
        self.updates.subscribe()
    }

    pub async fn calendar_view(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<CalendarEntry> {
        let state = self.state.lock().await;
        state
            .events
            .iter()
            .filter(|event| event.overlaps(from, to))
            .map(CalendarEntry::from)
            .collect()
    }

    async fn lock_for_write(&self) -> OwnedMutexGuard<PlannerState> {
        self.state.clone().lock_owned().await
    }

    /// Saves `events` and then installs them together with `ids`.
    ///
    /// The write runs on its own task holding the state lock, so memory
    /// follows the store even if the caller stops waiting midway.
    async fn commit(
        &self,
        mut state: OwnedMutexGuard<PlannerState>,
        mut events: Vec<Event>,
        ids: IdAllocator,
    ) -> Result<(), StoreError> {
        sort_events(&mut events);
        let store = self.store.clone();
        let updates = self.updates.clone();
        let write = tokio::spawn(async move {
            store.save(&events).await?;
            state.events = events;
            state.ids = ids;
            updates.send_replace(state.events.clone());
            Ok::<(), StoreError>(())
        });
        write
            .await
            .map_err(|e| StoreError::Io(io::Error::other(format!("event write task failed: {}", e))))?
    }

    /// Replaces the stored event with the same id, or inserts it if absent.
    /// A new time range must not touch a blocked day.
    pub async fn on_user_edit(&self, event: Event) -> Result<(), ScheduleError> {
        event.validate()?;
        let state = self.lock_for_write().await;
        let mut events = state.events.clone();
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(slot) => {
                if (slot.start, slot.end) != (event.start, event.end) {
                    state.check_unblocked(event.start, event.end, self.options.tz)?;
                }
                *slot = event.clone();
            }
            None if state.ids.is_used(event.id) => return Err(ScheduleError::RetiredId(event.id)),
            None => {
                state.check_unblocked(event.start, event.end, self.options.tz)?;
                events.push(event.clone());
            }
        }
        let mut ids = state.ids.clone();
        ids.observe(event.id);
        self.commit(state, events, ids).await?;
        tracing::info!(id = event.id, "event edited");
        Ok(())
    }

    /// Moves or resizes an event. A user-placed time clears the overlap mark.
    pub async fn on_user_move(
        &self,
        id: EventId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Event, ScheduleError> {
        check_interval(start, end)?;
        let state = self.lock_for_write().await;
        state.check_unblocked(start, end, self.options.tz)?;
        let mut events = state.events.clone();
        let slot = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ScheduleError::NotFound(id))?;
        slot.start = start;
        slot.end = end;
        slot.overlap = false;
        let moved = slot.clone();
        let ids = state.ids.clone();
        self.commit(state, events, ids).await?;
        tracing::info!(id, "event moved");
        Ok(moved)
    }

    pub async fn on_user_delete(&self, id: EventId) -> Result<(), ScheduleError> {
        let state = self.lock_for_write().await;
        if !state.events.iter().any(|e| e.id == id) {
            return Err(ScheduleError::NotFound(id));
        }
        let events: Vec<Event> = state.events.iter().filter(|e| e.id != id).cloned().collect();
        let ids = state.ids.clone();
        self.commit(state, events, ids).await?;
        tracing::info!(id, "event deleted");
        Ok(())
    }

    pub async fn on_user_create(&self, draft: EventDraft) -> Result<Event, ScheduleError> {
        draft.validate()?;
        let state = self.lock_for_write().await;
        state.check_unblocked(draft.start, draft.end, self.options.tz)?;
        let mut ids = state.ids.clone();
        let event = draft.into_event(ids.mint());
        let mut events = state.events.clone();
        events.push(event.clone());
        self.commit(state, events, ids).await?;
        tracing::info!(id = event.id, "event created");
        Ok(event)
    }

    pub async fn add_goal(&self, text: &str) -> Option<Goal> {
        self.state.lock().await.goals.add(text)
    }

    pub async fn remove_goal(&self, id: GoalId) -> bool {
        self.state.lock().await.goals.remove(id)
    }

    pub async fn goals(&self) -> Vec<Goal> {
        self.state.lock().await.goals.list().to_vec()
    }

    /// Reads busy time from a calendar file and keeps it for the next schedule request.
    pub async fn import_busy(
        &self,
        raw: &[u8],
        window: CoverageWindow,
    ) -> Result<Vec<BusyInterval>, ScheduleError> {
        let intervals = extract_busy_intervals(raw, &window, self.options.tz)?;
        self.state.lock().await.busy = intervals.clone();
        Ok(intervals)
    }

    pub async fn busy(&self) -> Vec<BusyInterval> {
        self.state.lock().await.busy.clone()
    }

    /// Marks a local day as closed to new or moved events. Returns false if
    /// it was already blocked.
    pub async fn on_block_day(&self, day: NaiveDate) -> bool {
        let added = self.state.lock().await.blocked.insert(day);
        if added {
            tracing::info!(%day, "day blocked");
        }
        added
    }

    pub async fn on_unblock_day(&self, day: NaiveDate) -> bool {
        let removed = self.state.lock().await.blocked.remove(&day);
        if removed {
            tracing::info!(%day, "day unblocked");
        }
        removed
    }

    pub async fn blocked_days(&self) -> Vec<NaiveDate> {
        self.state.lock().await.blocked.iter().copied().collect()
    }

    /// Asks the generation service for a week plan and stores the result.
    ///
    /// Nothing is written unless the reply arrives within `timeout` and
    /// parses. The state lock is not held while waiting on the service.
    pub async fn generate_schedule(
        &self,
        reference: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let request_id = Uuid::new_v4();
        let (goals, busy) = {
            let state = self.state.lock().await;
            (state.goals.texts(), state.busy.clone())
        };
        let builder = ScheduleRequestBuilder::new(self.options.tz, self.options.unknown_end);
        let request = builder.build(&goals, &busy, reference)?;
        tracing::info!(
            %request_id,
            goals = request.goals().len(),
            busy = request.busy().len(),
            window_start = %request.window().start,
            "requesting schedule"
        );

        let messages = request.to_messages();
        let reply = tokio::time::timeout(
            timeout,
            complete_with_retry(self.client.as_ref(), &messages, self.options.retry),
        )
        .await
        .map_err(|_| GenerationError::Timeout(timeout))??;

        let reconciler = Reconciler::new(self.options.tz)
            .with_mode(self.options.merge_mode)
            .with_busy(busy, self.options.unknown_end);

        let state = self.lock_for_write().await;
        let mut ids = state.ids.clone();
        let reconciliation = match reconciler.reconcile(&reply, &state.events, &mut ids) {
            Ok(reconciliation) => reconciliation,
            Err(err) => {
                tracing::warn!(%request_id, error = %err, "schedule response rejected");
                return Err(err.into());
            }
        };
        self.commit(state, reconciliation.events.clone(), ids).await?;
        tracing::info!(
            %request_id,
            accepted = reconciliation.accepted.len(),
            dropped = reconciliation.diagnostics.dropped_count,
            "schedule stored"
        );

        Ok(ScheduleOutcome {
            events: reconciliation.events,
            accepted: reconciliation.accepted,
            diagnostics: reconciliation.diagnostics,
        })
    }

    /// Stateless pass-through to the generation service.
    pub async fn relay_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        self.client.complete(messages).await
    }
}
