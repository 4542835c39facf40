//! Dashboard store: metrics, forecast, action items and AI insights.
//!
//! Action items come from two places: the server, and the client-side
//! forecast rules below. Forecast items carry `origin = forecast` and an id
//! under [`FORECAST_ACTION_PREFIX`]; every forecast fetch replaces exactly that
//! set and never touches server items, whatever their ids look like.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::base::{impl_store_state, LoadMode, RequestStatus, StoreCell};
use super::{resource_path, sync};
use crate::api::{ApiClient, Subscription, WsClient};
use crate::normalize;
use crate::types::{
    ActionItem, ActionItemOrigin, ActionKind, AiInsight, DashboardMetrics, Forecast, Priority,
};

const METRICS_PATH: &str = "/api/dashboard/metrics";
const FORECAST_PATH: &str = "/api/dashboard/forecast";
const ACTION_ITEMS_PATH: &str = "/api/dashboard/action-items";
const INSIGHTS_PATH: &str = "/api/dashboard/insights";

pub const FORECAST_ACTION_PREFIX: &str = "forecast-";
pub const COVERAGE_HEALTHY_ID: &str = "forecast-coverage-healthy";
pub const COVERAGE_LOW_ID: &str = "forecast-coverage-low";
pub const NO_DEALS_CLOSING_ID: &str = "forecast-no-deals";

/// Pipeline-to-forecast ratio at or above which coverage is healthy.
pub const HEALTHY_COVERAGE_RATIO: f64 = 3.0;
/// Ratio below which coverage is flagged.
pub const LOW_COVERAGE_RATIO: f64 = 2.0;
/// Deals closing this period needed alongside a healthy ratio.
pub const HEALTHY_MIN_CLOSING: u32 = 2;

pub const EVENTS: [&str; 3] = [
    "dashboard:metrics_updated",
    "action_item:created",
    "insight:created",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub metrics: Option<DashboardMetrics>,
    pub forecast: Option<Forecast>,
    pub action_items: Vec<ActionItem>,
    pub insights: Vec<AiInsight>,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub status: RequestStatus,
}

impl_store_state!(DashboardState);

impl DashboardState {
    pub fn forecast_action_items(&self) -> impl Iterator<Item = &ActionItem> {
        self.action_items
            .iter()
            .filter(|item| item.origin == ActionItemOrigin::Forecast)
    }

    /// Replace forecast-derived items, leaving server items in place.
    fn replace_forecast_items(&mut self, derived: Vec<ActionItem>) {
        self.action_items
            .retain(|item| item.origin != ActionItemOrigin::Forecast);
        for item in derived.into_iter().rev() {
            self.action_items.insert(0, item);
        }
    }

    /// Replace server items, keeping forecast-derived items first.
    fn replace_server_items(&mut self, items: Vec<ActionItem>) {
        self.action_items
            .retain(|item| item.origin == ActionItemOrigin::Forecast);
        self.action_items.extend(items);
    }
}

// =============================================================================
// Forecast rules
// =============================================================================

fn forecast_item(id: &str, kind: ActionKind, priority: Priority, title: String, description: String) -> ActionItem {
    ActionItem {
        id: id.to_string(),
        kind,
        title,
        description,
        priority,
        entity_type: Some("forecast".to_string()),
        entity_id: None,
        origin: ActionItemOrigin::Forecast,
        created_at: normalize::now(),
    }
}

/// Action items implied by the forecast.
///
/// - coverage ≥ 3× and ≥ 2 deals closing → success
/// - coverage < 2× → warning
/// - no deals closing this period → warning, checked on its own
///
/// Coverage is `total_pipeline / monthly_forecast`; with no forecast there is
/// no ratio and neither coverage item is produced.
pub fn derive_forecast_actions(forecast: &Forecast) -> Vec<ActionItem> {
    let mut items = Vec::new();
    let ratio = (forecast.monthly_forecast > 0.0)
        .then(|| forecast.total_pipeline / forecast.monthly_forecast);

    match ratio {
        Some(ratio)
            if ratio >= HEALTHY_COVERAGE_RATIO
                && forecast.deals_closing_this_month >= HEALTHY_MIN_CLOSING =>
        {
            items.push(forecast_item(
                COVERAGE_HEALTHY_ID,
                ActionKind::Success,
                Priority::Low,
                "Pipeline coverage is healthy".to_string(),
                format!(
                    "Pipeline covers {:.1}x the forecast with {} deals closing this month",
                    ratio, forecast.deals_closing_this_month
                ),
            ));
        }
        Some(ratio) if ratio < LOW_COVERAGE_RATIO => {
            items.push(forecast_item(
                COVERAGE_LOW_ID,
                ActionKind::Warning,
                Priority::High,
                "Pipeline coverage is low".to_string(),
                format!(
                    "Pipeline covers only {:.1}x the forecast; add qualified opportunities",
                    ratio
                ),
            ));
        }
        _ => {}
    }

    if forecast.deals_closing_this_month == 0 {
        items.push(forecast_item(
            NO_DEALS_CLOSING_ID,
            ActionKind::Warning,
            Priority::High,
            "No deals closing this month".to_string(),
            "Nothing in the pipeline is expected to close this period".to_string(),
        ));
    }

    items
}

// =============================================================================
// Normalization
// =============================================================================

pub fn normalize_action_item(raw: &Value) -> ActionItem {
    let raw = normalize::entity(raw, "action_item");
    let created_at = normalize::date_or(raw, &["created_at", "createdAt"], normalize::now());
    ActionItem {
        id: normalize::text(raw, &["id", "_id"])
            .unwrap_or_else(|| format!("action-{}", created_at.timestamp_millis())),
        kind: ActionKind::parse(normalize::string(raw, &["type", "kind"]).as_deref()),
        title: normalize::string_or(raw, &["title"], ""),
        description: normalize::string_or(raw, &["description", "message"], ""),
        priority: Priority::parse(normalize::string(raw, &["priority"]).as_deref()),
        entity_type: normalize::text(raw, &["entity_type", "entityType"]),
        entity_id: normalize::text(raw, &["entity_id", "entityId"]),
        origin: match normalize::string(raw, &["origin"]).as_deref() {
            Some("forecast") => ActionItemOrigin::Forecast,
            _ => ActionItemOrigin::Server,
        },
        created_at,
    }
}

/// Server payloads are always server-origin, whatever they claim.
fn server_action_item(raw: &Value) -> ActionItem {
    ActionItem {
        origin: ActionItemOrigin::Server,
        ..normalize_action_item(raw)
    }
}

const TOTAL_CONTACTS_KEYS: &[&str] = &["total_contacts", "totalContacts"];
const ACTIVE_DEALS_KEYS: &[&str] = &["active_deals", "activeDeals"];
const PIPELINE_VALUE_KEYS: &[&str] = &["pipeline_value", "pipelineValue"];
const REVENUE_KEYS: &[&str] =
    &["revenue_this_month", "revenueThisMonth", "won_this_month", "wonThisMonth"];
const CONVERSION_RATE_KEYS: &[&str] = &["conversion_rate", "conversionRate"];
const UNREAD_MESSAGES_KEYS: &[&str] = &["unread_messages", "unreadMessages"];
const UPCOMING_EVENTS_KEYS: &[&str] =
    &["upcoming_events", "upcomingEvents", "meetings_today", "meetingsToday"];

/// Keys `normalize_metrics` accepts for each field.
pub const METRIC_FIELDS: &[&[&str]] = &[
    TOTAL_CONTACTS_KEYS,
    ACTIVE_DEALS_KEYS,
    PIPELINE_VALUE_KEYS,
    REVENUE_KEYS,
    CONVERSION_RATE_KEYS,
    UNREAD_MESSAGES_KEYS,
    UPCOMING_EVENTS_KEYS,
];

/// Headline metrics. Null, missing or non-numeric fields read as zero.
pub fn normalize_metrics(raw: &Value) -> DashboardMetrics {
    let raw = normalize::entity(raw, "metrics");
    DashboardMetrics {
        total_contacts: normalize::count(raw, TOTAL_CONTACTS_KEYS),
        active_deals: normalize::count(raw, ACTIVE_DEALS_KEYS),
        pipeline_value: normalize::number_or(raw, PIPELINE_VALUE_KEYS, 0.0),
        revenue_this_month: normalize::number_or(raw, REVENUE_KEYS, 0.0),
        conversion_rate: normalize::number_or(raw, CONVERSION_RATE_KEYS, 0.0),
        unread_messages: normalize::count(raw, UNREAD_MESSAGES_KEYS),
        upcoming_events: normalize::count(raw, UPCOMING_EVENTS_KEYS),
    }
}

pub fn normalize_forecast(raw: &Value) -> Forecast {
    let raw = normalize::entity(raw, "forecast");
    Forecast {
        total_pipeline: normalize::number_or(raw, &["total_pipeline", "totalPipeline"], 0.0),
        monthly_forecast: normalize::number_or(
            raw,
            &["monthly_forecast", "monthlyForecast", "weighted_forecast", "weightedForecast"],
            0.0,
        ),
        quarterly_forecast: normalize::number_or(
            raw,
            &["quarterly_forecast", "quarterlyForecast"],
            0.0,
        ),
        deals_closing_this_month: normalize::count(
            raw,
            &["deals_closing_this_month", "dealsClosingThisMonth", "deals_closing", "dealsClosing"],
        ),
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct DashboardStore {
    api: Arc<ApiClient>,
    cell: StoreCell<DashboardState>,
    initialized: AtomicBool,
    this: Weak<DashboardStore>,
}

impl DashboardStore {
    pub fn new(api: Arc<ApiClient>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api,
            cell: StoreCell::new("DashboardStore"),
            initialized: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn snapshot(&self) -> DashboardState {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<DashboardState> {
        self.cell.subscribe()
    }

    pub fn clear_error(&self) {
        self.cell.clear_error();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("DashboardStore: initializing");
        self.load_all(LoadMode::Foreground).await;
    }

    /// Reload everything without the loading indicator.
    pub async fn refresh(&self) {
        self.load_all(LoadMode::Background).await;
    }

    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.cell.reset();
    }

    async fn load_all(&self, mode: LoadMode) {
        tokio::join!(
            self.load_metrics(mode),
            self.load_forecast(mode),
            self.load_action_items(LoadMode::Background),
            self.load_insights(LoadMode::Background),
        );
        self.cell.update(|s| s.last_refreshed = Some(normalize::now()));
    }

    pub async fn fetch_metrics(&self) -> Option<DashboardMetrics> {
        self.load_metrics(LoadMode::Foreground).await
    }

    /// Fetch the forecast and regenerate the forecast-derived action items.
    pub async fn fetch_forecast(&self) -> Option<Forecast> {
        self.load_forecast(LoadMode::Foreground).await
    }

    pub async fn fetch_action_items(&self) -> Option<Vec<ActionItem>> {
        self.load_action_items(LoadMode::Foreground).await
    }

    pub async fn fetch_insights(&self) -> Option<Vec<AiInsight>> {
        self.load_insights(LoadMode::Foreground).await
    }

    async fn load_metrics(&self, mode: LoadMode) -> Option<DashboardMetrics> {
        self.cell
            .execute(
                mode,
                async {
                    let payload: Value = self.api.get(METRICS_PATH).await?;
                    Ok(normalize_metrics(&payload))
                },
                |state, metrics| state.metrics = Some(metrics.clone()),
            )
            .await
    }

    async fn load_forecast(&self, mode: LoadMode) -> Option<Forecast> {
        self.cell
            .execute(
                mode,
                async {
                    let payload: Value = self.api.get(FORECAST_PATH).await?;
                    Ok(normalize_forecast(&payload))
                },
                |state, forecast| {
                    state.replace_forecast_items(derive_forecast_actions(forecast));
                    state.forecast = Some(forecast.clone());
                },
            )
            .await
    }

    async fn load_action_items(&self, mode: LoadMode) -> Option<Vec<ActionItem>> {
        self.cell
            .execute(
                mode,
                async {
                    let payload: Value = self.api.get(ACTION_ITEMS_PATH).await?;
                    Ok(normalize::list_items(&payload, &["action_items", "actionItems"])
                        .iter()
                        .map(server_action_item)
                        .collect::<Vec<_>>())
                },
                |state, items| state.replace_server_items(items.clone()),
            )
            .await
    }

    async fn load_insights(&self, mode: LoadMode) -> Option<Vec<AiInsight>> {
        self.cell
            .execute(
                mode,
                async {
                    let payload: Value = self.api.get(INSIGHTS_PATH).await?;
                    Ok(normalize::list_items(&payload, &["insights"])
                        .iter()
                        .filter(|raw| raw.is_object())
                        .map(normalize::insight)
                        .collect::<Vec<_>>())
                },
                |state, insights| state.insights = insights.clone(),
            )
            .await
    }

    /// Dismiss an action item. Forecast items are client-side only and are
    /// dropped locally; server items are dismissed through the API first.
    pub async fn dismiss_action_item(&self, id: &str) -> bool {
        let origin = self.cell.read(|s| {
            s.action_items
                .iter()
                .find(|item| item.id == id)
                .map(|item| item.origin)
        });
        match origin {
            None => false,
            Some(ActionItemOrigin::Forecast) => {
                self.cell.update(|s| {
                    s.action_items
                        .retain(|item| !(item.id == id && item.origin == ActionItemOrigin::Forecast))
                });
                true
            }
            Some(ActionItemOrigin::Server) => {
                let path = format!("{}/dismiss", resource_path(ACTION_ITEMS_PATH, id));
                self.cell
                    .execute(
                        LoadMode::Background,
                        async {
                            let _: Value = self.api.post(&path, &Value::Null).await?;
                            Ok(())
                        },
                        |state, _| {
                            state.action_items.retain(|item| {
                                !(item.id == id && item.origin == ActionItemOrigin::Server)
                            })
                        },
                    )
                    .await
                    .is_some()
            }
        }
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
            log::debug!("DashboardStore: ignored {}", event);
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

fn apply_event(state: &mut DashboardState, event: &str, data: &Value) -> bool {
    match event {
        "dashboard:metrics_updated" => {
            let patch = normalize::entity(data, "metrics");
            if !patch.is_object() {
                return false;
            }
            let mut merged = match serde_json::to_value(state.metrics.clone().unwrap_or_default()) {
                Ok(value) => value,
                Err(_) => return false,
            };
            normalize::merge_patch(&mut merged, patch, METRIC_FIELDS);
            state.metrics = Some(normalize_metrics(&merged));
            true
        }
        "action_item:created" => {
            let item = server_action_item(data);
            if item.title.is_empty() && item.description.is_empty() {
                return false;
            }
            match state
                .action_items
                .iter()
                .position(|i| i.id == item.id && i.origin == ActionItemOrigin::Server)
            {
                Some(index) => state.action_items[index] = item,
                None => {
                    // Newest server item goes right after the forecast block.
                    let at = state.forecast_action_items().count();
                    state.action_items.insert(at, item);
                }
            }
            true
        }
        "insight:created" => {
            let raw = normalize::field(data, &["insight"]).unwrap_or(data);
            if !raw.is_object() {
                return false;
            }
            sync::upsert_front(&mut state.insights, &mut None, normalize::insight(raw));
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forecast(total: f64, monthly: f64, closing: u32) -> Forecast {
        Forecast {
            total_pipeline: total,
            monthly_forecast: monthly,
            quarterly_forecast: monthly * 3.0,
            deals_closing_this_month: closing,
        }
    }

    fn ids(items: &[ActionItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_zero_deals_checked_independently_of_ratio() {
        let parsed = normalize_forecast(&json!({
            "total_pipeline": 600000,
            "monthly_forecast": 100000,
            "deals_closing_this_month": 0
        }));
        let items = derive_forecast_actions(&parsed);
        assert_eq!(ids(&items), vec![NO_DEALS_CLOSING_ID]);
        assert_eq!(items[0].kind, ActionKind::Warning);
    }

    #[test]
    fn test_malformed_forecast_fields_read_as_zero() {
        let parsed = normalize_forecast(&json!({
            "total_pipeline": "600000",
            "monthly_forecast": null,
            "quarterly_forecast": {"q": 1},
            "deals_closing_this_month": 0
        }));
        assert_eq!(parsed, forecast(600000.0, 0.0, 0));
        // No ratio without a forecast, but the closing check still runs
        assert_eq!(ids(&derive_forecast_actions(&parsed)), vec![NO_DEALS_CLOSING_ID]);

        let both = normalize_forecast(&json!({
            "forecast": {"total_pipeline": 600000, "totalPipeline": 1, "monthlyForecast": 100000, "dealsClosing": 3}
        }));
        assert_eq!(both.total_pipeline, 600000.0);
        assert_eq!(both.monthly_forecast, 100000.0);
        assert_eq!(both.deals_closing_this_month, 3);
    }

    #[test]
    fn test_normalize_metrics_is_total() {
        let metrics = normalize_metrics(&json!({
            "metrics": {"total_contacts": null, "activeDeals": "7", "pipeline_value": 1.5e6, "conversion_rate": "n/a"}
        }));
        assert_eq!(metrics.total_contacts, 0);
        assert_eq!(metrics.active_deals, 7);
        assert_eq!(metrics.pipeline_value, 1.5e6);
        assert_eq!(metrics.conversion_rate, 0.0);
        assert_eq!(normalize_metrics(&serde_json::to_value(&metrics).unwrap()), metrics);
    }

    #[test]
    fn test_forecast_rules() {
        let healthy = derive_forecast_actions(&forecast(900000.0, 100000.0, 4));
        assert_eq!(ids(&healthy), vec![COVERAGE_HEALTHY_ID]);
        assert_eq!(healthy[0].kind, ActionKind::Success);

        let thin = derive_forecast_actions(&forecast(150000.0, 100000.0, 0));
        assert_eq!(ids(&thin), vec![COVERAGE_LOW_ID, NO_DEALS_CLOSING_ID]);

        // Between 2x and 3x: nothing to say
        assert!(derive_forecast_actions(&forecast(250000.0, 100000.0, 3)).is_empty());

        // No forecast: no ratio
        assert!(derive_forecast_actions(&forecast(250000.0, 0.0, 1)).is_empty());

        for item in derive_forecast_actions(&forecast(1.0, 1.0, 0)) {
            assert!(item.id.starts_with(FORECAST_ACTION_PREFIX));
            assert_eq!(item.origin, ActionItemOrigin::Forecast);
        }
    }

    #[test]
    fn test_regeneration_leaves_server_items_alone() {
        let mut state = DashboardState::default();
        let colliding = server_action_item(&json!({
            "id": "forecast-no-deals",
            "type": "opportunity",
            "title": "Server item with a forecast-like id",
            "origin": "forecast"
        }));
        assert_eq!(colliding.origin, ActionItemOrigin::Server);
        state.replace_server_items(vec![colliding]);

        state.replace_forecast_items(derive_forecast_actions(&forecast(600000.0, 100000.0, 0)));
        assert_eq!(state.action_items.len(), 2);

        // Healthy forecast clears the derived warning, not the server item
        state.replace_forecast_items(derive_forecast_actions(&forecast(900000.0, 100000.0, 5)));
        assert_eq!(ids(&state.action_items), vec![COVERAGE_HEALTHY_ID, NO_DEALS_CLOSING_ID]);
        assert_eq!(state.action_items[1].origin, ActionItemOrigin::Server);
        assert_eq!(state.action_items[1].title, "Server item with a forecast-like id");
    }

    #[test]
    fn test_realtime_events() {
        let mut state = DashboardState::default();
        state.metrics = Some(DashboardMetrics {
            total_contacts: 10,
            pipeline_value: 5000.0,
            ..Default::default()
        });
        assert!(apply_event(
            &mut state,
            "dashboard:metrics_updated",
            &json!({"pipeline_value": 7500, "unread_messages": 3})
        ));
        let metrics = state.metrics.as_ref().unwrap();
        assert_eq!(metrics.pipeline_value, 7500.0);
        assert_eq!(metrics.unread_messages, 3);
        assert_eq!(metrics.total_contacts, 10);

        assert!(apply_event(
            &mut state,
            "dashboard:metrics_updated",
            &json!({"won_this_month": 5000, "meetings_today": 4})
        ));
        let metrics = state.metrics.as_ref().unwrap();
        assert_eq!(metrics.revenue_this_month, 5000.0);
        assert_eq!(metrics.upcoming_events, 4);
        assert_eq!(metrics.pipeline_value, 7500.0);

        state.replace_forecast_items(derive_forecast_actions(&forecast(1.0, 1.0, 0)));
        assert!(apply_event(
            &mut state,
            "action_item:created",
            &json!({"id": "a1", "type": "warning", "title": "Deal stalled", "priority": "high"})
        ));
        assert_eq!(state.action_items[0].origin, ActionItemOrigin::Forecast);
        assert_eq!(state.action_items.last().unwrap().id, "a1");

        assert!(apply_event(
            &mut state,
            "insight:created",
            &json!({"insight": {"id": "i1", "type": "trend", "title": "Win rate up"}})
        ));
        assert_eq!(state.insights[0].title, "Win rate up");
        assert!(!apply_event(&mut state, "insight:created", &json!("nope")));
    }
}
