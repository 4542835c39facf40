//! Deals store: pipeline list, stage changes, and deal push events.

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
    ConfidenceTier, Deal, DealActivity, DealFilter, DealStage, DealStats, PipelineStageSummary,
    Priority,
};

const DEALS_PATH: &str = "/api/deals";
const STATS_PATH: &str = "/api/deals/stats";
const PIPELINE_PATH: &str = "/api/deals/pipeline";

pub const STAGE_CHANGE_ACTIVITY: &str = "stage_change";

pub const EVENTS: [&str; 5] = [
    "deal:created",
    "deal:updated",
    "deal:deleted",
    "deal:stage_changed",
    "deal:insight_added",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealsState {
    pub deals: Vec<Deal>,
    pub selected: Option<Deal>,
    pub stats: Option<DealStats>,
    pub pipeline: Vec<PipelineStageSummary>,
    pub filter: DealFilter,
    pub search_query: String,
    pub status: RequestStatus,
}

impl_store_state!(DealsState);

impl DealsState {
    /// Deals grouped by stage, every stage present, in pipeline order.
    pub fn deals_by_stage(&self) -> Vec<(DealStage, Vec<&Deal>)> {
        DealStage::ALL
            .iter()
            .map(|stage| {
                let deals = self.deals.iter().filter(|d| d.stage == *stage).collect();
                (*stage, deals)
            })
            .collect()
    }

    pub fn open_pipeline_value(&self) -> f64 {
        self.deals
            .iter()
            .filter(|d| !d.stage.is_closed())
            .map(|d| d.value)
            .sum()
    }

    pub fn weighted_pipeline_value(&self) -> f64 {
        self.deals
            .iter()
            .filter(|d| !d.stage.is_closed())
            .map(Deal::weighted_value)
            .sum()
    }

    pub fn find(&self, id: &str) -> Option<&Deal> {
        self.deals
            .iter()
            .find(|d| d.id == id)
            .or_else(|| self.selected.as_ref().filter(|d| d.id == id))
    }
}

/// Fields accepted by `POST /api/deals`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeal {
    pub title: String,
    pub value: f64,
    pub stage: DealStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_close_date: Option<chrono::NaiveDate>,
    pub priority: Priority,
}

// =============================================================================
// Normalization
// =============================================================================

pub fn normalize_activity(raw: &Value) -> DealActivity {
    let occurred_at = normalize::date_or(
        raw,
        &["occurred_at", "occurredAt", "date", "timestamp", "created_at", "createdAt"],
        normalize::now(),
    );
    DealActivity {
        id: normalize::text(raw, &["id", "_id"])
            .unwrap_or_else(|| format!("activity-{}", occurred_at.timestamp_millis())),
        kind: normalize::text(raw, &["type", "kind"]).unwrap_or_else(|| "note".to_string()),
        description: normalize::string_or(raw, &["description", "content", "summary"], ""),
        occurred_at,
    }
}

pub fn normalize_stats(raw: &Value) -> DealStats {
    let raw = normalize::entity(raw, "stats");
    DealStats {
        total_value: normalize::number_or(raw, &["total_value", "totalValue", "total_pipeline"], 0.0),
        weighted_value: normalize::number_or(raw, &["weighted_value", "weightedValue"], 0.0),
        win_rate: normalize::number_or(raw, &["win_rate", "winRate"], 0.0),
        average_deal_size: normalize::number_or(
            raw,
            &["average_deal_size", "averageDealSize", "avg_deal_size"],
            0.0,
        ),
        open_deals: normalize::count(raw, &["open_deals", "openDeals"]),
        won_deals: normalize::count(raw, &["won_deals", "wonDeals"]),
        lost_deals: normalize::count(raw, &["lost_deals", "lostDeals"]),
    }
}

const PROBABILITY_KEYS: &[&str] =
    &["probability", "ai_probability", "aiProbability", "close_probability", "closeProbability"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "confidence_level", "confidenceLevel"];

/// Keys `normalize_deal` accepts for each aliased field.
pub const DEAL_FIELDS: &[&[&str]] = &[
    &["title", "name"],
    &["contact_id", "contactId", "contact"],
    &["contact_name", "contactName", "contact"],
    &["company", "company_name", "companyName"],
    &["value", "amount"],
    &["stage", "status"],
    PROBABILITY_KEYS,
    CONFIDENCE_KEYS,
    &["expected_close_date", "expectedCloseDate", "close_date", "closeDate"],
    &["activities", "activity_log", "activityLog"],
    &["ai_insights", "aiInsights", "insights"],
    &["risk_factors", "riskFactors"],
    &["positive_signals", "positiveSignals"],
];

pub fn normalize_deal(raw: &Value) -> Deal {
    let raw = normalize::entity(raw, "deal");
    let contact = normalize::field(raw, &["contact"]).filter(|c| c.is_object());

    let contact_name = normalize::text(raw, &["contact_name", "contactName"]).or_else(|| {
        contact.and_then(|c| {
            normalize::text(c, &["name", "full_name", "fullName"]).or_else(|| {
                let first = normalize::string_or(c, &["first_name", "firstName"], "");
                let last = normalize::string_or(c, &["last_name", "lastName"], "");
                Some(format!("{} {}", first, last).trim().to_string()).filter(|n| !n.is_empty())
            })
        })
    });

    let probability = normalize::score(raw, PROBABILITY_KEYS, 0.0);

    let mut activities: Vec<DealActivity> =
        normalize::array(raw, &["activities", "activity_log", "activityLog"])
            .iter()
            .filter(|item| item.is_object())
            .map(normalize_activity)
            .collect();
    activities.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

    let created_at = normalize::date_or(raw, &["created_at", "createdAt"], normalize::now());

    Deal {
        id: normalize::string_or(raw, &["id", "_id"], ""),
        title: normalize::string_or(raw, &["title", "name"], ""),
        contact_id: normalize::text(raw, &["contact_id", "contactId"])
            .or_else(|| contact.and_then(|c| normalize::text(c, &["id"]))),
        contact_name,
        company: normalize::name_or_text(raw, &["company", "company_name", "companyName"]),
        value: normalize::number_or(raw, &["value", "amount"], 0.0),
        stage: DealStage::parse(normalize::string(raw, &["stage", "status"]).as_deref()),
        probability,
        confidence: ConfidenceTier::parse_or_derive(
            normalize::string(raw, CONFIDENCE_KEYS).as_deref(),
            probability,
        ),
        priority: Priority::parse(normalize::string(raw, &["priority"]).as_deref()),
        expected_close_date: normalize::date(
            raw,
            &["expected_close_date", "expectedCloseDate", "close_date", "closeDate"],
        ),
        activities,
        insights: normalize::insights(raw, &["ai_insights", "aiInsights", "insights"]),
        risk_factors: normalize::string_list(raw, &["risk_factors", "riskFactors"]),
        positive_signals: normalize::string_list(raw, &["positive_signals", "positiveSignals"]),
        tags: normalize::tags(raw, &["tags"]),
        created_at,
        updated_at: normalize::date_or(raw, &["updated_at", "updatedAt"], created_at),
    }
}

/// Pipeline buckets: a list of `{stage, count, value}` or an object keyed by
/// stage name.
pub fn normalize_pipeline(payload: &Value) -> Vec<PipelineStageSummary> {
    let summary = |stage: DealStage, raw: &Value| PipelineStageSummary {
        stage,
        count: normalize::count(raw, &["count", "deal_count", "dealCount"]),
        value: normalize::number_or(raw, &["value", "total_value", "totalValue"], 0.0),
    };

    let items = normalize::list_items(payload, &["pipeline", "stages"]);
    let mut buckets: Vec<PipelineStageSummary> = if !items.is_empty() {
        items
            .iter()
            .filter_map(|raw| {
                let stage = DealStage::try_parse(&normalize::string(raw, &["stage", "name"])?)?;
                Some(summary(stage, raw))
            })
            .collect()
    } else {
        let map = normalize::entity(payload, "pipeline");
        DealStage::ALL
            .iter()
            .filter_map(|stage| {
                let snake = stage.as_str().replace('-', "_");
                let raw = normalize::field(map, &[stage.as_str(), snake.as_str()])?;
                Some(summary(*stage, raw))
            })
            .collect()
    };
    buckets.sort_by_key(|b| b.stage);
    buckets
}

// =============================================================================
// Store
// =============================================================================

pub struct DealsStore {
    api: Arc<ApiClient>,
    cell: StoreCell<DealsState>,
    initialized: AtomicBool,
    search: Debouncer,
    this: Weak<DealsStore>,
}

impl DealsStore {
    pub fn new(api: Arc<ApiClient>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api,
            cell: StoreCell::new("DealsStore"),
            initialized: AtomicBool::new(false),
            search: Debouncer::default(),
            this: this.clone(),
        })
    }

    pub fn snapshot(&self) -> DealsState {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<DealsState> {
        self.cell.subscribe()
    }

    pub fn clear_error(&self) {
        self.cell.clear_error();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn selected_id(&self) -> Option<String> {
        self.cell.read(|s| s.selected.as_ref().map(|d| d.id.clone()))
    }

    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("DealsStore: initializing");
        tokio::join!(self.fetch_deals(), self.fetch_stats(), self.fetch_pipeline());
    }

    pub fn reset(&self) {
        self.search.cancel();
        self.initialized.store(false, Ordering::SeqCst);
        self.cell.reset();
    }

    pub async fn set_filter(&self, filter: DealFilter) {
        if self.cell.read(|s| s.filter == filter) {
            return;
        }
        self.cell.update(|s| s.filter = filter);
        if self.is_initialized() {
            self.fetch_deals().await;
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
                store.fetch_deals().await;
            }
        });
    }

    pub fn select(&self, deal: Option<Deal>) {
        self.cell.update(|s| s.selected = deal);
    }

    pub fn clear_selection(&self) {
        self.select(None);
    }

    pub async fn fetch_deals(&self) -> Option<Vec<Deal>> {
        let query = self
            .cell
            .read(|s| list_query(s.filter.as_query(), &s.search_query));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get_with_query(DEALS_PATH, &query).await?;
                    Ok(normalize::list_items(&payload, &["deals"])
                        .iter()
                        .map(normalize_deal)
                        .collect::<Vec<_>>())
                },
                |state, deals| {
                    state.deals = deals.clone();
                    if let Some(selected) = state.selected.as_ref() {
                        if let Some(fresh) = deals.iter().find(|d| d.id == selected.id) {
                            state.selected = Some(fresh.clone());
                        }
                    }
                },
            )
            .await
    }

    pub async fn fetch_deal(&self, id: &str) -> Option<Deal> {
        let path = resource_path(DEALS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get(&path).await?;
                    Ok(normalize_deal(&payload))
                },
                |state, deal| {
                    state.selected = Some(deal.clone());
                    sync::replace_by_id(&mut state.deals, &mut None, deal.clone());
                },
            )
            .await
    }

    pub async fn fetch_stats(&self) -> Option<DealStats> {
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

    pub async fn fetch_pipeline(&self) -> Option<Vec<PipelineStageSummary>> {
        self.cell
            .execute(
                LoadMode::Background,
                async {
                    let payload: Value = self.api.get(PIPELINE_PATH).await?;
                    Ok(normalize_pipeline(&payload))
                },
                |state, pipeline| state.pipeline = pipeline.clone(),
            )
            .await
    }

    pub async fn create_deal(&self, deal: &NewDeal) -> Option<Deal> {
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.post(DEALS_PATH, deal).await?;
                    Ok(normalize_deal(&payload))
                },
                |state, deal| sync::upsert_front(&mut state.deals, &mut state.selected, deal.clone()),
            )
            .await
    }

    pub async fn update_deal(&self, id: &str, updates: &Value) -> Option<Deal> {
        let path = resource_path(DEALS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.put(&path, updates).await?;
                    Ok(normalize_deal(&payload))
                },
                |state, deal| {
                    sync::replace_by_id(&mut state.deals, &mut state.selected, deal.clone());
                },
            )
            .await
    }

    pub async fn delete_deal(&self, id: &str) -> bool {
        let path = resource_path(DEALS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let _: Value = self.api.delete(&path).await?;
                    Ok(())
                },
                |state, _| {
                    sync::remove_by_id(&mut state.deals, &mut state.selected, id);
                },
            )
            .await
            .is_some()
    }

    /// Move a deal to `stage`. On success the server's copy replaces the local
    /// one and a stage-change activity is prepended.
    pub async fn update_stage(&self, id: &str, stage: DealStage) -> Option<Deal> {
        let path = format!("{}/stage", resource_path(DEALS_PATH, id));
        let previous = self.cell.read(|s| s.find(id).map(|d| d.stage));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self
                        .api
                        .patch(&path, &json!({ "stage": stage.as_str() }))
                        .await?;
                    let mut deal = normalize_deal(&payload);
                    if deal.id.is_empty() {
                        deal.id = id.to_string();
                    }
                    deal.activities.insert(0, stage_change_activity(previous, deal.stage));
                    Ok(deal)
                },
                |state, deal| {
                    sync::replace_by_id(&mut state.deals, &mut state.selected, deal.clone());
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
            log::debug!("DealsStore: ignored {}", event);
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

fn stage_change_activity(previous: Option<DealStage>, stage: DealStage) -> DealActivity {
    let occurred_at = normalize::now();
    let description = match previous {
        Some(previous) if previous != stage => {
            format!("Stage changed from {} to {}", previous.as_str(), stage.as_str())
        }
        _ => format!("Stage set to {}", stage.as_str()),
    };
    DealActivity {
        id: format!("activity-{}", occurred_at.timestamp_millis()),
        kind: STAGE_CHANGE_ACTIVITY.to_string(),
        description,
        occurred_at,
    }
}

/// A probability change without an explicit tier re-derives the tier.
fn with_derived_confidence(patch: &Value) -> Value {
    let mut patch = patch.clone();
    let probability = normalize::number(&patch, PROBABILITY_KEYS);
    let has_tier = normalize::field(&patch, CONFIDENCE_KEYS).is_some();
    if let (Some(probability), false, Some(fields)) = (probability, has_tier, patch.as_object_mut()) {
        let tier = ConfidenceTier::from_probability(probability.clamp(0.0, 100.0));
        fields.insert("confidence".into(), json!(tier));
    }
    patch
}

fn apply_event(state: &mut DealsState, event: &str, data: &Value) -> bool {
    match event {
        "deal:created" => {
            let deal = normalize_deal(data);
            if deal.id.is_empty() {
                return false;
            }
            sync::upsert_front(&mut state.deals, &mut state.selected, deal);
            true
        }
        "deal:updated" => {
            let Some(id) = sync::event_id(data, &["dealId", "deal_id"]) else {
                return false;
            };
            let patch = with_derived_confidence(sync::event_patch(normalize::entity(data, "deal")));
            sync::patch_by_id(
                &mut state.deals,
                &mut state.selected,
                &id,
                &patch,
                DEAL_FIELDS,
                normalize_deal,
            )
        }
        "deal:deleted" => match sync::event_id(data, &["dealId", "deal_id"]) {
            Some(id) => sync::remove_by_id(&mut state.deals, &mut state.selected, &id),
            None => false,
        },
        "deal:stage_changed" => {
            let Some(id) = sync::event_id(data, &["dealId", "deal_id"]) else {
                return false;
            };
            let Some(stage) = normalize::string(data, &["stage", "new_stage", "newStage"])
                .as_deref()
                .and_then(DealStage::try_parse)
            else {
                return false;
            };
            let previous = state.find(&id).map(|d| d.stage);
            let mut patch = Map::new();
            patch.insert("stage".into(), json!(stage.as_str()));
            if let Some(probability) = normalize::number(data, &["probability"]) {
                let probability = probability.clamp(0.0, 100.0);
                patch.insert("probability".into(), json!(probability));
                let confidence = normalize::string(data, &["confidence"])
                    .map(|c| ConfidenceTier::parse_or_derive(Some(c.as_str()), probability))
                    .unwrap_or_else(|| ConfidenceTier::from_probability(probability));
                patch.insert("confidence".into(), json!(confidence));
            }
            let patched = sync::patch_by_id(
                &mut state.deals,
                &mut state.selected,
                &id,
                &Value::Object(patch),
                DEAL_FIELDS,
                normalize_deal,
            );
            if patched && previous != Some(stage) {
                let activity = stage_change_activity(previous, stage);
                for deal in state
                    .deals
                    .iter_mut()
                    .chain(state.selected.as_mut())
                    .filter(|d| d.id == id)
                {
                    deal.activities.insert(0, activity.clone());
                }
            }
            patched
        }
        "deal:insight_added" => {
            let Some(id) = sync::event_id(data, &["dealId", "deal_id"]) else {
                return false;
            };
            let raw = normalize::field(data, &["insight"]).unwrap_or(data);
            let insight = normalize::insight(raw);
            let mut found = false;
            for deal in state
                .deals
                .iter_mut()
                .chain(state.selected.as_mut())
                .filter(|d| d.id == id)
            {
                deal.insights.retain(|i| i.id != insight.id);
                deal.insights.insert(0, insight.clone());
                found = true;
            }
            found
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TokenStore;
    use crate::storage::MemoryStorage;

    fn store() -> Arc<DealsStore> {
        let tokens = Arc::new(TokenStore::load(Arc::new(MemoryStorage::new())));
        DealsStore::new(Arc::new(ApiClient::new("http://127.0.0.1:9", tokens)))
    }

    fn raw_deal(id: &str, stage: &str, value: f64, probability: f64) -> Value {
        json!({
            "id": id,
            "title": format!("Deal {}", id),
            "contact": {"id": "c1", "first_name": "Ada", "last_name": "Lovelace"},
            "value": value,
            "stage": stage,
            "ai_probability": probability,
            "expected_close_date": "2026-11-30",
            "risk_factors": ["Budget freeze", {"description": "Competitor pilot"}, ""],
            "tags": [{"name": "enterprise"}],
            "activities": [
                {"id": "a1", "type": "email", "description": "Sent deck", "date": "2026-09-01T09:00:00Z"},
                {"id": "a2", "type": "call", "description": "Discovery", "date": "2026-09-03T09:00:00Z"}
            ]
        })
    }

    #[test]
    fn test_normalize_deal() {
        let deal = normalize_deal(&raw_deal("d1", "closed_won", 50000.0, 82.0));
        assert_eq!(deal.stage, DealStage::ClosedWon);
        assert_eq!(deal.confidence, ConfidenceTier::High);
        assert_eq!(deal.contact_id.as_deref(), Some("c1"));
        assert_eq!(deal.contact_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(deal.risk_factors, vec!["Budget freeze", "Competitor pilot"]);
        assert_eq!(deal.activities[0].id, "a2");
        assert_eq!(
            deal.expected_close_date.unwrap().to_rfc3339(),
            "2026-11-30T00:00:00+00:00"
        );
        assert_eq!(normalize_deal(&serde_json::to_value(&deal).unwrap()), deal);
    }

    #[test]
    fn test_pipeline_values_ignore_closed_deals() {
        let state = DealsState {
            deals: vec![
                normalize_deal(&raw_deal("d1", "proposal", 100000.0, 50.0)),
                normalize_deal(&raw_deal("d2", "negotiation", 40000.0, 75.0)),
                normalize_deal(&raw_deal("d3", "closed-won", 999999.0, 100.0)),
            ],
            ..Default::default()
        };
        assert_eq!(state.open_pipeline_value(), 140000.0);
        assert_eq!(state.weighted_pipeline_value(), 80000.0);

        let grouped = state.deals_by_stage();
        assert_eq!(grouped.len(), 6);
        assert_eq!(grouped[0].0, DealStage::Prospect);
        assert!(grouped[0].1.is_empty());
        assert_eq!(grouped[2].1[0].id, "d1");
        assert_eq!(grouped[4].1[0].id, "d3");
    }

    #[test]
    fn test_normalize_pipeline_shapes() {
        let list = json!([
            {"stage": "negotiation", "count": 2, "value": 90000},
            {"stage": "prospect", "count": 5, "total_value": 120000},
            {"stage": "unknown", "count": 1}
        ]);
        let buckets = normalize_pipeline(&list);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].stage, DealStage::Prospect);
        assert_eq!(buckets[0].value, 120000.0);

        let keyed = json!({"pipeline": {"closed_won": {"count": 3, "value": 300}}});
        let buckets = normalize_pipeline(&keyed);
        assert_eq!(buckets, vec![PipelineStageSummary { stage: DealStage::ClosedWon, count: 3, value: 300.0 }]);
    }

    #[tokio::test]
    async fn test_updated_event_with_alias_keys_replaces_stored_values() {
        let store = store();
        assert!(store.apply_realtime(
            "deal:created",
            &json!({"id": "d1", "title": "Renewal", "amount": 1000, "ai_probability": 20})
        ));
        assert_eq!(store.snapshot().deals[0].confidence, ConfidenceTier::Low);

        assert!(store.apply_realtime(
            "deal:updated",
            &json!({"id": "d1", "amount": 90000, "ai_probability": 85})
        ));
        let deal = store.snapshot().find("d1").cloned().unwrap();
        assert_eq!(deal.value, 90000.0);
        assert_eq!(deal.probability, 85.0);
        assert_eq!(deal.confidence, ConfidenceTier::High);
        assert_eq!(deal.title, "Renewal");

        // An explicit tier from the server wins over the derived one
        assert!(store.apply_realtime(
            "deal:updated",
            &json!({"dealId": "d1", "changes": {"close_probability": 90, "confidence_level": "medium"}})
        ));
        let deal = store.snapshot().find("d1").cloned().unwrap();
        assert_eq!(deal.probability, 90.0);
        assert_eq!(deal.confidence, ConfidenceTier::Medium);
        assert_eq!(deal.value, 90000.0);
    }

    #[tokio::test]
    async fn test_stage_changed_event_patches_and_logs_activity() {
        let store = store();
        store.apply_realtime("deal:created", &raw_deal("d1", "proposal", 10000.0, 30.0));
        store.select(store.snapshot().find("d1").cloned());

        assert!(store.apply_realtime(
            "deal:stage_changed",
            &json!({"dealId": "d1", "stage": "negotiation", "probability": 72})
        ));
        let snap = store.snapshot();
        for deal in [&snap.deals[0], snap.selected.as_ref().unwrap()] {
            assert_eq!(deal.stage, DealStage::Negotiation);
            assert_eq!(deal.probability, 72.0);
            assert_eq!(deal.confidence, ConfidenceTier::High);
            assert_eq!(deal.activities[0].kind, STAGE_CHANGE_ACTIVITY);
            assert_eq!(deal.activities[0].description, "Stage changed from proposal to negotiation");
            // Untouched by the patch
            assert_eq!(deal.tags, vec!["enterprise"]);
        }

        assert!(!store.apply_realtime("deal:stage_changed", &json!({"dealId": "d1", "stage": "limbo"})));
        assert!(store.apply_realtime("deal:deleted", &json!("d1")));
        assert!(store.snapshot().selected.is_none());
    }
}
