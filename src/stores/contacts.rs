//! Contacts store: list, selection, stats, and contact push events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::base::{impl_store_state, LoadMode, RequestStatus, StoreCell};
use super::debounce::Debouncer;
use super::{list_query, resource_path, sync};
use crate::api::{ApiClient, Subscription, WsClient};
use crate::normalize;
use crate::types::{
    Communication, CommunicationKind, Contact, ContactFilter, ContactStats, HealthTier,
};

const CONTACTS_PATH: &str = "/api/contacts";
const STATS_PATH: &str = "/api/contacts/stats";

/// Churn risk at or above this marks a contact at risk regardless of health.
pub const AT_RISK_CHURN_THRESHOLD: f64 = 50.0;

pub const EVENTS: [&str; 5] = [
    "contact:created",
    "contact:updated",
    "contact:deleted",
    "contact:health_updated",
    "contact:insight_added",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactsState {
    pub contacts: Vec<Contact>,
    pub selected: Option<Contact>,
    pub stats: Option<ContactStats>,
    pub filter: ContactFilter,
    pub search_query: String,
    pub status: RequestStatus,
}

impl_store_state!(ContactsState);

impl ContactsState {
    pub fn high_value_contacts(&self) -> Vec<&Contact> {
        self.contacts
            .iter()
            .filter(|c| c.health_tier() == HealthTier::High)
            .collect()
    }

    pub fn at_risk_contacts(&self) -> Vec<&Contact> {
        self.contacts
            .iter()
            .filter(|c| c.churn_risk >= AT_RISK_CHURN_THRESHOLD || c.health_tier() == HealthTier::Low)
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.id == id)
            .or_else(|| self.selected.as_ref().filter(|c| c.id == id))
    }
}

/// Fields accepted by `POST /api/contacts`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// =============================================================================
// Normalization
// =============================================================================

pub fn normalize_communication(raw: &Value) -> Communication {
    let occurred_at = normalize::date_or(
        raw,
        &["occurred_at", "occurredAt", "date", "timestamp", "created_at", "createdAt"],
        normalize::now(),
    );
    Communication {
        id: normalize::text(raw, &["id", "_id"])
            .unwrap_or_else(|| format!("comm-{}", occurred_at.timestamp_millis())),
        kind: CommunicationKind::parse(normalize::string(raw, &["type", "kind", "channel"]).as_deref()),
        subject: normalize::string_or(raw, &["subject", "title"], ""),
        summary: normalize::string_or(raw, &["summary", "content", "description", "body"], ""),
        sentiment: normalize::number(raw, &["sentiment", "sentiment_score", "sentimentScore"]),
        occurred_at,
    }
}

/// Aggregates from the stats endpoint. Malformed fields read as zero.
pub fn normalize_stats(raw: &Value) -> ContactStats {
    let raw = normalize::entity(raw, "stats");
    ContactStats {
        total_contacts: normalize::count(raw, &["total_contacts", "totalContacts", "total"]),
        high_value: normalize::count(raw, &["high_value", "highValue"]),
        at_risk: normalize::count(raw, &["at_risk", "atRisk"]),
        average_health_score: normalize::number_or(
            raw,
            &["average_health_score", "averageHealthScore", "avg_health_score"],
            0.0,
        ),
        new_this_month: normalize::count(raw, &["new_this_month", "newThisMonth"]),
    }
}

/// Keys `normalize_contact` accepts for each aliased field.
pub const CONTACT_FIELDS: &[&[&str]] = &[
    &["first_name", "firstName", "name", "full_name", "fullName"],
    &["last_name", "lastName", "name", "full_name", "fullName"],
    &["phone", "phone_number", "phoneNumber"],
    &["company", "company_name", "companyName"],
    &["title", "job_title", "jobTitle"],
    &["avatar", "avatar_url", "avatarUrl"],
    &["health_score", "healthScore"],
    &["churn_risk", "churnRisk"],
    &["deal_count", "dealCount", "deals_count"],
    &["total_deal_value", "totalDealValue", "lifetime_value"],
    &["communications", "communication_history", "communicationHistory", "interactions"],
    &["ai_insights", "aiInsights", "insights"],
    &["last_contacted_at", "lastContactedAt", "last_contact", "lastContact"],
];

pub fn normalize_contact(raw: &Value) -> Contact {
    let raw = normalize::entity(raw, "contact");

    let mut first_name = normalize::string(raw, &["first_name", "firstName"]);
    let mut last_name = normalize::string(raw, &["last_name", "lastName"]);
    if first_name.is_none() && last_name.is_none() {
        if let Some(name) = normalize::text(raw, &["name", "full_name", "fullName"]) {
            let mut parts = name.trim().splitn(2, ' ');
            first_name = parts.next().map(str::to_string);
            last_name = parts.next().map(|s| s.trim().to_string());
        }
    }

    let mut communications: Vec<Communication> = normalize::array(
        raw,
        &["communications", "communication_history", "communicationHistory", "interactions"],
    )
    .iter()
    .filter(|item| item.is_object())
    .map(normalize_communication)
    .collect();
    communications.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

    let created_at = normalize::date_or(raw, &["created_at", "createdAt"], normalize::now());

    Contact {
        id: normalize::string_or(raw, &["id", "_id"], ""),
        first_name: first_name.unwrap_or_default(),
        last_name: last_name.unwrap_or_default(),
        email: normalize::string_or(raw, &["email"], ""),
        phone: normalize::text(raw, &["phone", "phone_number", "phoneNumber"]),
        company: normalize::name_or_text(raw, &["company", "company_name", "companyName"]),
        title: normalize::text(raw, &["title", "job_title", "jobTitle"]),
        avatar: normalize::text(raw, &["avatar", "avatar_url", "avatarUrl"]),
        health_score: normalize::score(raw, &["health_score", "healthScore"], 50.0),
        churn_risk: normalize::score(raw, &["churn_risk", "churnRisk"], 0.0),
        deal_count: normalize::count(raw, &["deal_count", "dealCount", "deals_count"]),
        total_deal_value: normalize::number_or(
            raw,
            &["total_deal_value", "totalDealValue", "lifetime_value"],
            0.0,
        ),
        communications,
        insights: normalize::insights(raw, &["ai_insights", "aiInsights", "insights"]),
        tags: normalize::tags(raw, &["tags"]),
        notes: normalize::string_or(raw, &["notes"], ""),
        last_contacted_at: normalize::date(
            raw,
            &["last_contacted_at", "lastContactedAt", "last_contact", "lastContact"],
        ),
        created_at,
        updated_at: normalize::date_or(raw, &["updated_at", "updatedAt"], created_at),
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct ContactsStore {
    api: Arc<ApiClient>,
    cell: StoreCell<ContactsState>,
    initialized: AtomicBool,
    search: Debouncer,
    this: Weak<ContactsStore>,
}

impl ContactsStore {
    pub fn new(api: Arc<ApiClient>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api,
            cell: StoreCell::new("ContactsStore"),
            initialized: AtomicBool::new(false),
            search: Debouncer::default(),
            this: this.clone(),
        })
    }

    pub fn snapshot(&self) -> ContactsState {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<ContactsState> {
        self.cell.subscribe()
    }

    pub fn clear_error(&self) {
        self.cell.clear_error();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn selected_id(&self) -> Option<String> {
        self.cell.read(|s| s.selected.as_ref().map(|c| c.id.clone()))
    }

    /// Load the list and stats once per store instance.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("ContactsStore: initializing");
        tokio::join!(self.fetch_contacts(), self.fetch_stats());
    }

    /// Drop all state, including the initialized flag (used on logout).
    pub fn reset(&self) {
        self.search.cancel();
        self.initialized.store(false, Ordering::SeqCst);
        self.cell.reset();
    }

    /// Change the filter; refetches immediately once initialized.
    pub async fn set_filter(&self, filter: ContactFilter) {
        let changed = self.cell.read(|s| s.filter != filter);
        if !changed {
            return;
        }
        self.cell.update(|s| s.filter = filter);
        if self.is_initialized() {
            self.fetch_contacts().await;
        }
    }

    /// Change the search query; refetches after the debounce window once
    /// initialized. Must be called inside a tokio runtime.
    pub fn set_search_query(&self, query: &str) {
        let changed = self.cell.read(|s| s.search_query != query);
        if !changed {
            return;
        }
        self.cell.update(|s| s.search_query = query.to_string());
        if !self.is_initialized() {
            return;
        }
        let this = self.this.clone();
        self.search.arm(async move {
            if let Some(store) = this.upgrade() {
                store.fetch_contacts().await;
            }
        });
    }

    pub fn select(&self, contact: Option<Contact>) {
        self.cell.update(|s| s.selected = contact);
    }

    pub fn clear_selection(&self) {
        self.select(None);
    }

    pub async fn fetch_contacts(&self) -> Option<Vec<Contact>> {
        let query = self
            .cell
            .read(|s| list_query(s.filter.as_query(), &s.search_query));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get_with_query(CONTACTS_PATH, &query).await?;
                    Ok(normalize::list_items(&payload, &["contacts"])
                        .iter()
                        .map(normalize_contact)
                        .collect::<Vec<_>>())
                },
                |state, contacts| {
                    state.contacts = contacts.clone();
                    if let Some(selected) = state.selected.as_ref() {
                        if let Some(fresh) = contacts.iter().find(|c| c.id == selected.id) {
                            state.selected = Some(fresh.clone());
                        }
                    }
                },
            )
            .await
    }

    /// Fetch one contact and make it the selection.
    pub async fn fetch_contact(&self, id: &str) -> Option<Contact> {
        let path = resource_path(CONTACTS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get(&path).await?;
                    Ok(normalize_contact(&payload))
                },
                |state, contact| {
                    state.selected = Some(contact.clone());
                    sync::replace_by_id(&mut state.contacts, &mut None, contact.clone());
                },
            )
            .await
    }

    pub async fn fetch_stats(&self) -> Option<ContactStats> {
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

    pub async fn create_contact(&self, contact: &NewContact) -> Option<Contact> {
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.post(CONTACTS_PATH, contact).await?;
                    Ok(normalize_contact(&payload))
                },
                |state, contact| {
                    sync::upsert_front(&mut state.contacts, &mut state.selected, contact.clone())
                },
            )
            .await
    }

    /// Send a partial update; the response replaces the list entry and the
    /// selection when ids match.
    pub async fn update_contact(&self, id: &str, updates: &Value) -> Option<Contact> {
        let path = resource_path(CONTACTS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.put(&path, updates).await?;
                    Ok(normalize_contact(&payload))
                },
                |state, contact| {
                    sync::replace_by_id(&mut state.contacts, &mut state.selected, contact.clone());
                },
            )
            .await
    }

    pub async fn delete_contact(&self, id: &str) -> bool {
        let path = resource_path(CONTACTS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let _: Value = self.api.delete(&path).await?;
                    Ok(())
                },
                |state, _| {
                    sync::remove_by_id(&mut state.contacts, &mut state.selected, id);
                },
            )
            .await
            .is_some()
    }

    /// Append a note: it is added to the notes text and recorded as the newest
    /// communication entry.
    pub async fn add_note(&self, id: &str, note: &str) -> Option<Communication> {
        let path = format!("{}/notes", resource_path(CONTACTS_PATH, id));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.post(&path, &json!({ "content": note })).await?;
                    let mut entry = normalize_communication(normalize::entity(&payload, "note"));
                    entry.kind = CommunicationKind::Note;
                    if entry.summary.is_empty() {
                        entry.summary = note.to_string();
                    }
                    if entry.subject.is_empty() {
                        entry.subject = "Note".to_string();
                    }
                    Ok(entry)
                },
                |state, entry| {
                    let apply = |contact: &mut Contact| {
                        if contact.notes.trim().is_empty() {
                            contact.notes = note.to_string();
                        } else {
                            contact.notes = format!("{}\n\n{}", contact.notes, note);
                        }
                        contact.communications.insert(0, entry.clone());
                        contact.updated_at = entry.occurred_at;
                    };
                    if let Some(contact) = state.contacts.iter_mut().find(|c| c.id == id) {
                        apply(contact);
                    }
                    if let Some(selected) = state.selected.as_mut().filter(|c| c.id == id) {
                        apply(selected);
                    }
                },
            )
            .await
    }

    // -------------------------------------------------------------------------
    // Realtime
    // -------------------------------------------------------------------------

    /// Apply one push event. Returns false for events this store ignores or
    /// that name an unknown contact.
    pub fn apply_realtime(&self, event: &str, data: &Value) -> bool {
        let mut handled = false;
        self.cell.update(|state| {
            handled = apply_event(state, event, data);
        });
        if !handled {
            log::debug!("ContactsStore: ignored {}", event);
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

fn apply_event(state: &mut ContactsState, event: &str, data: &Value) -> bool {
    match event {
        "contact:created" => {
            let contact = normalize_contact(data);
            if contact.id.is_empty() {
                return false;
            }
            sync::upsert_front(&mut state.contacts, &mut state.selected, contact);
            true
        }
        "contact:updated" => {
            let Some(id) = sync::event_id(data, &["contactId", "contact_id"]) else {
                return false;
            };
            let patch = sync::event_patch(normalize::entity(data, "contact"));
            sync::patch_by_id(
                &mut state.contacts,
                &mut state.selected,
                &id,
                patch,
                CONTACT_FIELDS,
                normalize_contact,
            )
        }
        "contact:deleted" => match sync::event_id(data, &["contactId", "contact_id"]) {
            Some(id) => sync::remove_by_id(&mut state.contacts, &mut state.selected, &id),
            None => false,
        },
        "contact:health_updated" => {
            let Some(id) = sync::event_id(data, &["contactId", "contact_id"]) else {
                return false;
            };
            let mut patch = Map::new();
            if let Some(score) = normalize::number(data, &["health_score", "healthScore", "score"]) {
                patch.insert("healthScore".into(), json!(score.clamp(0.0, 100.0)));
            }
            if let Some(risk) = normalize::number(data, &["churn_risk", "churnRisk"]) {
                patch.insert("churnRisk".into(), json!(risk.clamp(0.0, 100.0)));
            }
            if patch.is_empty() {
                return false;
            }
            sync::patch_by_id(
                &mut state.contacts,
                &mut state.selected,
                &id,
                &Value::Object(patch),
                CONTACT_FIELDS,
                normalize_contact,
            )
        }
        "contact:insight_added" => {
            let Some(id) = sync::event_id(data, &["contactId", "contact_id"]) else {
                return false;
            };
            let raw = normalize::field(data, &["insight"]).unwrap_or(data);
            let insight = normalize::insight(raw);
            let mut found = false;
            let mut add = |contact: &mut Contact| {
                contact.insights.retain(|i| i.id != insight.id);
                contact.insights.insert(0, insight.clone());
                found = true;
            };
            if let Some(contact) = state.contacts.iter_mut().find(|c| c.id == id) {
                add(contact);
            }
            if let Some(selected) = state.selected.as_mut().filter(|c| c.id == id) {
                add(selected);
            }
            found
        }
        _ => false,
    }
}
