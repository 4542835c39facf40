//! Calendar store: events, meeting preparation and outcomes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use super::base::{impl_store_state, LoadMode, RequestStatus, StoreCell};
use super::debounce::Debouncer;
use super::{list_query, resource_path, sync};
use crate::api::{ApiClient, Subscription, WsClient};
use crate::normalize;
use crate::types::{
    Attendee, CalendarEvent, CalendarStats, EventFilter, EventType, MeetingOutcome, OutcomeInput,
    Preparation, RsvpStatus,
};

const EVENTS_PATH: &str = "/api/calendar/events";
const STATS_PATH: &str = "/api/calendar/stats";

pub const EVENTS: [&str; 4] = [
    "event:created",
    "event:updated",
    "event:deleted",
    "event:preparation_ready",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarState {
    pub events: Vec<CalendarEvent>,
    pub selected: Option<CalendarEvent>,
    pub stats: Option<CalendarStats>,
    pub filter: EventFilter,
    pub search_query: String,
    pub status: RequestStatus,
}

impl_store_state!(CalendarState);

impl CalendarState {
    /// Events starting at or after `now`, soonest first.
    pub fn upcoming_events(&self, now: DateTime<Utc>) -> Vec<&CalendarEvent> {
        let mut upcoming: Vec<&CalendarEvent> =
            self.events.iter().filter(|e| e.start >= now).collect();
        upcoming.sort_by_key(|e| e.start);
        upcoming
    }

    pub fn find(&self, id: &str) -> Option<&CalendarEvent> {
        self.events
            .iter()
            .find(|e| e.id == id)
            .or_else(|| self.selected.as_ref().filter(|e| e.id == id))
    }

    fn for_each_copy(&mut self, id: &str, mut f: impl FnMut(&mut CalendarEvent)) -> bool {
        let mut found = false;
        for event in self
            .events
            .iter_mut()
            .chain(self.selected.as_mut())
            .filter(|e| e.id == id)
        {
            f(event);
            found = true;
        }
        found
    }
}

/// Fields accepted by `POST /api/calendar/events`. The caller guarantees
/// `end > start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
}

// =============================================================================
// Normalization
// =============================================================================

fn is_placeholder(entry: &str) -> bool {
    entry.trim().eq_ignore_ascii_case("none")
}

pub fn normalize_preparation(raw: &Value) -> Preparation {
    let entries = |keys: &[&str]| -> Vec<String> {
        normalize::string_list(raw, keys)
            .into_iter()
            .filter(|s| !is_placeholder(s))
            .collect()
    };
    let single = |keys: &[&str]| normalize::text(raw, keys).filter(|s| !is_placeholder(s));
    Preparation {
        talking_points: entries(&["talking_points", "talkingPoints"]),
        recent_interactions: entries(&["recent_interactions", "recentInteractions"]),
        deal_context: single(&["deal_context", "dealContext"]),
        competitor_intel: single(&["competitor_intel", "competitorIntel", "competitive_intel"]),
    }
}

/// Outcome as stored server-side (sentiment already signed).
pub fn normalize_outcome(raw: &Value) -> MeetingOutcome {
    MeetingOutcome {
        summary: normalize::string_or(raw, &["summary", "notes"], ""),
        next_steps: normalize::string_list(raw, &["next_steps", "nextSteps"]),
        sentiment: normalize::number_or(raw, &["sentiment"], 0.0)
            .round()
            .clamp(-50.0, 50.0) as i32,
        rating: normalize::count(raw, &["rating"]).clamp(1, 5) as u8,
    }
}

fn normalize_attendee(raw: &Value) -> Option<Attendee> {
    match raw {
        Value::String(email) if !email.trim().is_empty() => Some(Attendee {
            name: crate::util::name_from_email(email),
            email: email.trim().to_string(),
            status: RsvpStatus::Pending,
        }),
        Value::Object(_) => {
            let email = normalize::string_or(raw, &["email"], "");
            let name = normalize::text(raw, &["name", "display_name", "displayName"])
                .unwrap_or_else(|| crate::util::name_from_email(&email));
            if email.is_empty() && name.is_empty() {
                return None;
            }
            Some(Attendee {
                name,
                email,
                status: RsvpStatus::parse(
                    normalize::string(raw, &["status", "response_status", "responseStatus", "rsvp"])
                        .as_deref(),
                ),
            })
        }
        _ => None,
    }
}

pub fn normalize_stats(raw: &Value) -> CalendarStats {
    let raw = normalize::entity(raw, "stats");
    CalendarStats {
        today_count: normalize::count(raw, &["today_count", "todayCount", "events_today"]),
        week_count: normalize::count(raw, &["week_count", "weekCount", "events_this_week"]),
        pending_outcomes: normalize::count(raw, &["pending_outcomes", "pendingOutcomes"]),
        prepared_count: normalize::count(raw, &["prepared_count", "preparedCount"]),
    }
}

/// Keys `normalize_event` accepts for each aliased field.
pub const EVENT_FIELDS: &[&[&str]] = &[
    &["start", "start_time", "startTime", "start_at", "startAt", "date"],
    &["end", "end_time", "endTime", "end_at", "endAt", "duration", "duration_minutes", "durationMinutes"],
    &["title", "summary", "name"],
    &["description", "notes"],
    &["type", "event_type", "eventType"],
    &["meeting_url", "meetingUrl", "meeting_link", "meetingLink"],
    &["contact_id", "contactId", "contact"],
    &["contact_name", "contactName", "contact"],
    &["deal_id", "dealId", "deal"],
    &["ai_insights", "aiInsights", "insights"],
    &["preparation", "prep", "ai_preparation", "aiPreparation"],
    &["outcome", "meeting_outcome", "meetingOutcome"],
];

pub fn normalize_event(raw: &Value) -> CalendarEvent {
    let raw = normalize::entity(raw, "event");
    let contact = normalize::field(raw, &["contact"]).filter(|c| c.is_object());
    let deal = normalize::field(raw, &["deal"]).filter(|d| d.is_object());

    let start = normalize::date_or(
        raw,
        &["start", "start_time", "startTime", "start_at", "startAt", "date"],
        normalize::now(),
    );
    let end_fallback = normalize::number(raw, &["duration", "duration_minutes", "durationMinutes"])
        .filter(|minutes| *minutes > 0.0)
        .and_then(|minutes| Duration::try_minutes(minutes as i64))
        .and_then(|duration| start.checked_add_signed(duration))
        .unwrap_or(start);
    let created_at = normalize::date_or(raw, &["created_at", "createdAt"], start);

    CalendarEvent {
        id: normalize::string_or(raw, &["id", "_id"], ""),
        title: normalize::string_or(raw, &["title", "summary", "name"], ""),
        description: normalize::text(raw, &["description", "notes"]),
        start,
        end: normalize::date_or(raw, &["end", "end_time", "endTime", "end_at", "endAt"], end_fallback),
        event_type: EventType::parse(normalize::string(raw, &["type", "event_type", "eventType"]).as_deref()),
        location: normalize::text(raw, &["location"]),
        meeting_url: normalize::text(raw, &["meeting_url", "meetingUrl", "meeting_link", "meetingLink"]),
        contact_id: normalize::text(raw, &["contact_id", "contactId"])
            .or_else(|| contact.and_then(|c| normalize::text(c, &["id"]))),
        contact_name: normalize::text(raw, &["contact_name", "contactName"])
            .or_else(|| contact.and_then(|c| normalize::text(c, &["name", "full_name", "fullName"]))),
        deal_id: normalize::text(raw, &["deal_id", "dealId"])
            .or_else(|| deal.and_then(|d| normalize::text(d, &["id"]))),
        attendees: normalize::array(raw, &["attendees"])
            .iter()
            .filter_map(normalize_attendee)
            .collect(),
        insights: normalize::insights(raw, &["ai_insights", "aiInsights", "insights"]),
        preparation: normalize::field(raw, &["preparation", "prep", "ai_preparation", "aiPreparation"])
            .filter(|p| p.is_object())
            .map(normalize_preparation)
            .filter(|p| !p.is_empty()),
        outcome: normalize::field(raw, &["outcome", "meeting_outcome", "meetingOutcome"])
            .filter(|o| o.is_object())
            .map(normalize_outcome),
        created_at,
        updated_at: normalize::date_or(raw, &["updated_at", "updatedAt"], created_at),
    }
}

/// A response that carries a whole event rather than just a sub-object.
fn looks_like_event(payload: &Value) -> bool {
    let inner = normalize::entity(payload, "event");
    normalize::field(inner, &["start", "start_time", "startTime"]).is_some()
}

// =============================================================================
// Store
// =============================================================================

pub struct CalendarStore {
    api: Arc<ApiClient>,
    cell: StoreCell<CalendarState>,
    initialized: AtomicBool,
    search: Debouncer,
    this: Weak<CalendarStore>,
}

impl CalendarStore {
    pub fn new(api: Arc<ApiClient>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api,
            cell: StoreCell::new("CalendarStore"),
            initialized: AtomicBool::new(false),
            search: Debouncer::default(),
            this: this.clone(),
        })
    }

    pub fn snapshot(&self) -> CalendarState {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<CalendarState> {
        self.cell.subscribe()
    }

    pub fn clear_error(&self) {
        self.cell.clear_error();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn selected_id(&self) -> Option<String> {
        self.cell.read(|s| s.selected.as_ref().map(|e| e.id.clone()))
    }

    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("CalendarStore: initializing");
        tokio::join!(self.fetch_events(), self.fetch_stats());
    }

    pub fn reset(&self) {
        self.search.cancel();
        self.initialized.store(false, Ordering::SeqCst);
        self.cell.reset();
    }

    pub async fn set_filter(&self, filter: EventFilter) {
        if self.cell.read(|s| s.filter == filter) {
            return;
        }
        self.cell.update(|s| s.filter = filter);
        if self.is_initialized() {
            self.fetch_events().await;
        }
    }

    /// Must be called inside a tokio runtime.
    pub fn set_search_query(&self, query: &str) {
        if self.cell.read(|s| s.search_query == query) {
            return;
        }
        self.cell.update(|s| s.search_query = query.to_string());
        if !self.is_initialized() {
            return;
        }
        let this = self.this.clone();
        self.search.arm(async move {
            if let Some(store) = this.upgrade() {
                store.fetch_events().await;
            }
        });
    }

    pub fn select(&self, event: Option<CalendarEvent>) {
        self.cell.update(|s| s.selected = event);
    }

    pub fn clear_selection(&self) {
        self.select(None);
    }

    pub async fn fetch_events(&self) -> Option<Vec<CalendarEvent>> {
        let query = self
            .cell
            .read(|s| list_query(s.filter.as_query(), &s.search_query));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get_with_query(EVENTS_PATH, &query).await?;
                    Ok(normalize::list_items(&payload, &["events"])
                        .iter()
                        .map(normalize_event)
                        .collect::<Vec<_>>())
                },
                |state, events| {
                    state.events = events.clone();
                    if let Some(selected) = state.selected.as_ref() {
                        if let Some(fresh) = events.iter().find(|e| e.id == selected.id) {
                            state.selected = Some(fresh.clone());
                        }
                    }
                },
            )
            .await
    }

    pub async fn fetch_event(&self, id: &str) -> Option<CalendarEvent> {
        let path = resource_path(EVENTS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get(&path).await?;
                    Ok(normalize_event(&payload))
                },
                |state, event| {
                    state.selected = Some(event.clone());
                    sync::replace_by_id(&mut state.events, &mut None, event.clone());
                },
            )
            .await
    }

    pub async fn fetch_stats(&self) -> Option<CalendarStats> {
        self.cell
            .execute(
                LoadMode::Background,
                async {
                    let payload: Value = self.api.get(STATS_PATH).await?;
                    Ok(normalize_stats(&payload))
                },
                |state, stats| state.stats = Some(stats.clone()),
            )
            .await
    }

    pub async fn create_event(&self, event: &NewEvent) -> Option<CalendarEvent> {
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.post(EVENTS_PATH, event).await?;
                    Ok(normalize_event(&payload))
                },
                |state, event| sync::upsert_front(&mut state.events, &mut state.selected, event.clone()),
            )
            .await
    }

    pub async fn update_event(&self, id: &str, updates: &Value) -> Option<CalendarEvent> {
        let path = resource_path(EVENTS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.put(&path, updates).await?;
                    Ok(normalize_event(&payload))
                },
                |state, event| {
                    sync::replace_by_id(&mut state.events, &mut state.selected, event.clone());
                },
            )
            .await
    }

    pub async fn delete_event(&self, id: &str) -> bool {
        let path = resource_path(EVENTS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let _: Value = self.api.delete(&path).await?;
                    Ok(())
                },
                |state, _| {
                    sync::remove_by_id(&mut state.events, &mut state.selected, id);
                },
            )
            .await
            .is_some()
    }

    /// Record a post-meeting outcome. The UI slider (0–100) is sent as a
    /// signed −50..+50 sentiment and the rating is clamped to 1–5.
    pub async fn record_outcome(&self, id: &str, input: OutcomeInput) -> Option<MeetingOutcome> {
        let path = format!("{}/outcome", resource_path(EVENTS_PATH, id));
        let outcome = input.into_outcome();
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.post(&path, &outcome).await?;
                    if looks_like_event(&payload) {
                        let event = normalize_event(&payload);
                        return Ok((Some(event), outcome.clone()));
                    }
                    Ok((None, outcome.clone()))
                },
                |state, result: &(Option<CalendarEvent>, MeetingOutcome)| match result {
                    (Some(event), _) => {
                        sync::replace_by_id(&mut state.events, &mut state.selected, event.clone());
                    }
                    (None, outcome) => {
                        state.for_each_copy(id, |e| e.outcome = Some(outcome.clone()));
                    }
                },
            )
            .await
            .map(|(event, outcome)| event.and_then(|e| e.outcome).unwrap_or(outcome))
    }

    /// Ask the backend to generate a briefing. The result may arrive in the
    /// response or later via `event:preparation_ready`.
    pub async fn request_preparation(&self, id: &str) -> Option<Preparation> {
        let path = format!("{}/prepare", resource_path(EVENTS_PATH, id));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.post(&path, &Value::Null).await?;
                    let preparation = if looks_like_event(&payload) {
                        normalize_event(&payload).preparation
                    } else {
                        let raw = normalize::field(&payload, &["preparation", "prep"]).unwrap_or(&payload);
                        Some(normalize_preparation(raw)).filter(|p| !p.is_empty())
                    };
                    Ok(preparation.unwrap_or_default())
                },
                |state, preparation| {
                    if !preparation.is_empty() {
                        state.for_each_copy(id, |e| e.preparation = Some(preparation.clone()));
                    }
                },
            )
            .await
    }

    // -------------------------------------------------------------------------
    // Realtime
    // -------------------------------------------------------------------------

    pub fn apply_realtime(&self, event: &str, data: &Value) -> bool {
        let mut handled = false;
        self.cell.update(|state| {
            handled = apply_event(state, event, data);
        });
        if !handled {
            log::debug!("CalendarStore: ignored {}", event);
        }
        handled
    }

    pub fn bind_realtime(&self, ws: &WsClient) -> Vec<Subscription> {
        EVENTS
            .iter()
            .map(|event| {
                let this = self.this.clone();
                let name = *event;
                ws.on(
                    name,
                    Arc::new(move |data: &Value| {
                        if let Some(store) = this.upgrade() {
                            store.apply_realtime(name, data);
                        }
                    }),
                )
            })
            .collect()
    }
}

fn apply_event(state: &mut CalendarState, event: &str, data: &Value) -> bool {
    match event {
        "event:created" => {
            let event = normalize_event(data);
            if event.id.is_empty() {
                return false;
            }
            sync::upsert_front(&mut state.events, &mut state.selected, event);
            true
        }
        "event:updated" => {
            let Some(id) = sync::event_id(data, &["eventId", "event_id"]) else {
                return false;
            };
            let patch = sync::event_patch(normalize::entity(data, "event"));
            sync::patch_by_id(
                &mut state.events,
                &mut state.selected,
                &id,
                patch,
                EVENT_FIELDS,
                normalize_event,
            )
        }
        "event:deleted" => match sync::event_id(data, &["eventId", "event_id"]) {
            Some(id) => sync::remove_by_id(&mut state.events, &mut state.selected, &id),
            None => false,
        },
        "event:preparation_ready" => {
            let Some(id) = sync::event_id(data, &["eventId", "event_id"]) else {
                return false;
            };
            let Some(raw) = normalize::field(data, &["preparation", "prep"]).filter(|p| p.is_object())
            else {
                return false;
            };
            let preparation = normalize_preparation(raw);
            state.for_each_copy(&id, |e| e.preparation = Some(preparation.clone()))
        }
        _ => false,
    }
}
