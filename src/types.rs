use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowercase alphanumerics only, so `closed_won`, `closed-won` and `closedWon`
/// compare equal.
fn token(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

// =============================================================================
// Shared
// =============================================================================

/// Three-tier priority used by deals, conversations, action items and message
/// urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("high") | Some("urgent") | Some("critical") => Priority::High,
            Some("low") => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Opportunity,
    Risk,
    Recommendation,
    Trend,
    #[default]
    Info,
}

impl InsightKind {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("opportunity") => InsightKind::Opportunity,
            Some("risk") | Some("warning") => InsightKind::Risk,
            Some("recommendation") | Some("suggestion") => InsightKind::Recommendation,
            Some("trend") => InsightKind::Trend,
            _ => InsightKind::Info,
        }
    }
}

/// AI-generated observation attached to an entity or the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiInsight {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    /// 0–100
    pub confidence: f64,
    pub actionable: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Contacts
// =============================================================================

/// Health score thresholds: `>= 70` high, `>= 40` medium, otherwise low.
pub const HEALTH_HIGH_THRESHOLD: f64 = 70.0;
pub const HEALTH_MEDIUM_THRESHOLD: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTier {
    High,
    Medium,
    Low,
}

impl HealthTier {
    pub fn from_score(score: f64) -> Self {
        if score >= HEALTH_HIGH_THRESHOLD {
            HealthTier::High
        } else if score >= HEALTH_MEDIUM_THRESHOLD {
            HealthTier::Medium
        } else {
            HealthTier::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationKind {
    Email,
    Call,
    Meeting,
    Note,
    #[default]
    Message,
}

impl CommunicationKind {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("email") => CommunicationKind::Email,
            Some("call") | Some("phone") => CommunicationKind::Call,
            Some("meeting") => CommunicationKind::Meeting,
            Some("note") => CommunicationKind::Note,
            _ => CommunicationKind::Message,
        }
    }
}

/// One entry of a contact's communication history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommunicationKind,
    pub subject: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// 0–100
    pub health_score: f64,
    /// Churn risk percentage, 0–100
    pub churn_risk: f64,
    pub deal_count: u32,
    pub total_deal_value: f64,
    /// Newest first
    pub communications: Vec<Communication>,
    pub insights: Vec<AiInsight>,
    pub tags: Vec<String>,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Full name, or a name derived from the email when the contact has none.
    pub fn display_name(&self) -> String {
        let name = self.full_name();
        if name.is_empty() {
            crate::util::name_from_email(&self.email)
        } else {
            name
        }
    }

    pub fn health_tier(&self) -> HealthTier {
        HealthTier::from_score(self.health_score)
    }
}

/// Aggregates from `/api/contacts/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactStats {
    pub total_contacts: u32,
    pub high_value: u32,
    pub at_risk: u32,
    pub average_health_score: f64,
    pub new_this_month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ContactFilter {
    #[default]
    All,
    HighValue,
    AtRisk,
    Recent,
}

impl ContactFilter {
    /// Query value; `None` means the parameter is omitted.
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            ContactFilter::All => None,
            ContactFilter::HighValue => Some("high-value"),
            ContactFilter::AtRisk => Some("at-risk"),
            ContactFilter::Recent => Some("recent"),
        }
    }
}

// =============================================================================
// Deals
// =============================================================================

/// Pipeline stage. Declaration order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DealStage {
    #[default]
    Prospect,
    Qualified,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl DealStage {
    pub const ALL: [DealStage; 6] = [
        DealStage::Prospect,
        DealStage::Qualified,
        DealStage::Proposal,
        DealStage::Negotiation,
        DealStage::ClosedWon,
        DealStage::ClosedLost,
    ];

    pub fn parse(value: Option<&str>) -> Self {
        value.and_then(Self::try_parse).unwrap_or_default()
    }

    pub fn try_parse(value: &str) -> Option<Self> {
        match token(value).as_str() {
            "prospect" | "lead" => Some(DealStage::Prospect),
            "qualified" => Some(DealStage::Qualified),
            "proposal" => Some(DealStage::Proposal),
            "negotiation" => Some(DealStage::Negotiation),
            "closedwon" | "won" => Some(DealStage::ClosedWon),
            "closedlost" | "lost" => Some(DealStage::ClosedLost),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DealStage::Prospect => "prospect",
            DealStage::Qualified => "qualified",
            DealStage::Proposal => "proposal",
            DealStage::Negotiation => "negotiation",
            DealStage::ClosedWon => "closed-won",
            DealStage::ClosedLost => "closed-lost",
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, DealStage::ClosedWon | DealStage::ClosedLost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Explicit tier if the payload names one, otherwise derived from the
    /// close probability.
    pub fn parse_or_derive(value: Option<&str>, probability: f64) -> Self {
        match value.map(token).as_deref() {
            Some("high") => ConfidenceTier::High,
            Some("medium") => ConfidenceTier::Medium,
            Some("low") => ConfidenceTier::Low,
            _ => Self::from_probability(probability),
        }
    }

    pub fn from_probability(probability: f64) -> Self {
        if probability >= 70.0 {
            ConfidenceTier::High
        } else if probability >= 40.0 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Activity log entry on a deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealActivity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub value: f64,
    pub stage: DealStage,
    /// AI close probability, 0–100
    pub probability: f64,
    pub confidence: ConfidenceTier,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_close_date: Option<DateTime<Utc>>,
    /// Newest first
    pub activities: Vec<DealActivity>,
    pub insights: Vec<AiInsight>,
    pub risk_factors: Vec<String>,
    pub positive_signals: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    pub fn weighted_value(&self) -> f64 {
        self.value * self.probability / 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DealStats {
    pub total_value: f64,
    pub weighted_value: f64,
    pub win_rate: f64,
    pub average_deal_size: f64,
    pub open_deals: u32,
    pub won_deals: u32,
    pub lost_deals: u32,
}

/// Server-side stage bucket from `/api/deals/pipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStageSummary {
    pub stage: DealStage,
    pub count: u32,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DealFilter {
    #[default]
    All,
    Open,
    Won,
    Lost,
    HighPriority,
}

impl DealFilter {
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            DealFilter::All => None,
            DealFilter::Open => Some("open"),
            DealFilter::Won => Some("won"),
            DealFilter::Lost => Some("lost"),
            DealFilter::HighPriority => Some("high-priority"),
        }
    }
}

// =============================================================================
// Calendar
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    #[default]
    Meeting,
    Call,
    Demo,
    FollowUp,
    Internal,
    Other,
}

impl EventType {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            None | Some("meeting") => EventType::Meeting,
            Some("call") | Some("phone") => EventType::Call,
            Some("demo") => EventType::Demo,
            Some("followup") => EventType::FollowUp,
            Some("internal") => EventType::Internal,
            _ => EventType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RsvpStatus {
    Accepted,
    Declined,
    Tentative,
    #[default]
    Pending,
}

impl RsvpStatus {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("accepted") | Some("yes") => RsvpStatus::Accepted,
            Some("declined") | Some("no") => RsvpStatus::Declined,
            Some("tentative") | Some("maybe") => RsvpStatus::Tentative,
            _ => RsvpStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub name: String,
    pub email: String,
    pub status: RsvpStatus,
}

/// Pre-meeting briefing. Entries equal to `"none"` are dropped on ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Preparation {
    pub talking_points: Vec<String>,
    pub recent_interactions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitor_intel: Option<String>,
}

impl Preparation {
    pub fn is_empty(&self) -> bool {
        self.talking_points.is_empty()
            && self.recent_interactions.is_empty()
            && self.deal_context.is_none()
            && self.competitor_intel.is_none()
    }
}

/// Post-meeting outcome as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingOutcome {
    pub summary: String,
    pub next_steps: Vec<String>,
    /// Signed sentiment, −50..=+50
    pub sentiment: i32,
    /// 1..=5 stars
    pub rating: u8,
}

/// Outcome as captured by the UI: sentiment is a 0–100 slider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeInput {
    pub summary: String,
    pub next_steps: Vec<String>,
    pub sentiment_slider: u8,
    pub rating: u8,
}

impl OutcomeInput {
    /// Rescale the slider to −50..=+50 and clamp the rating to 1..=5.
    pub fn into_outcome(self) -> MeetingOutcome {
        MeetingOutcome {
            summary: self.summary,
            next_steps: self
                .next_steps
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect(),
            sentiment: i32::from(self.sentiment_slider.min(100)) - 50,
            rating: self.rating.clamp(1, 5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    pub attendees: Vec<Attendee>,
    pub insights: Vec<AiInsight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preparation: Option<Preparation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MeetingOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalendarStats {
    pub today_count: u32,
    pub week_count: u32,
    pub pending_outcomes: u32,
    pub prepared_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EventFilter {
    #[default]
    All,
    Today,
    Week,
    Meetings,
    Calls,
}

impl EventFilter {
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            EventFilter::All => None,
            EventFilter::Today => Some("today"),
            EventFilter::Week => Some("week"),
            EventFilter::Meetings => Some("meetings"),
            EventFilter::Calls => Some("calls"),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Tag removed from a conversation once the user replies.
pub const FOLLOW_UP_TAG: &str = "follow-up";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SentimentTrend {
    Improving,
    #[default]
    Stable,
    Declining,
}

impl SentimentTrend {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("improving") | Some("up") => SentimentTrend::Improving,
            Some("declining") | Some("down") => SentimentTrend::Declining,
            _ => SentimentTrend::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    #[default]
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("outbound") | Some("outgoing") | Some("sent") | Some("user") => {
                MessageDirection::Outbound
            }
            _ => MessageDirection::Inbound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAnalysis {
    pub topics: Vec<String>,
    pub urgency: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_response: Option<String>,
    pub action_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub direction: MessageDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Signed, -100..=100
    pub sentiment: f64,
    /// 0–100
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<MessageAnalysis>,
    pub is_read: bool,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub subject: String,
    pub channel: String,
    /// Oldest first
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    pub sentiment: f64,
    pub sentiment_trend: SentimentTrend,
    pub unread_count: u32,
    pub is_archived: bool,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationStats {
    pub total_conversations: u32,
    pub unread_count: u32,
    pub needs_follow_up: u32,
    pub average_sentiment: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationFilter {
    #[default]
    All,
    Unread,
    Priority,
    Archived,
}

impl ConversationFilter {
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            ConversationFilter::All => None,
            ConversationFilter::Unread => Some("unread"),
            ConversationFilter::Priority => Some("priority"),
            ConversationFilter::Archived => Some("archived"),
        }
    }
}

// =============================================================================
// Dashboard
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_contacts: u32,
    pub active_deals: u32,
    pub pipeline_value: f64,
    pub revenue_this_month: f64,
    pub conversion_rate: f64,
    pub unread_messages: u32,
    pub upcoming_events: u32,
}

/// Forecast totals from `/api/dashboard/forecast`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Forecast {
    pub total_pipeline: f64,
    /// Weighted forecast for the current period
    pub monthly_forecast: f64,
    pub quarterly_forecast: f64,
    pub deals_closing_this_month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[default]
    Opportunity,
    Warning,
    Success,
}

impl ActionKind {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("warning") | Some("risk") => ActionKind::Warning,
            Some("success") => ActionKind::Success,
            _ => ActionKind::Opportunity,
        }
    }
}

/// Where an action item came from. Forecast-derived items are regenerated on
/// every forecast fetch; server items are only replaced by server fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionItemOrigin {
    #[default]
    Server,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub origin: ActionItemOrigin,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// User / session
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        if name.is_empty() {
            crate::util::name_from_email(&self.email)
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(token).as_deref() {
            Some("light") => Theme::Light,
            Some("dark") => Theme::Dark,
            _ => Theme::System,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_tier_thresholds() {
        assert_eq!(HealthTier::from_score(70.0), HealthTier::High);
        assert_eq!(HealthTier::from_score(69.9), HealthTier::Medium);
        assert_eq!(HealthTier::from_score(40.0), HealthTier::Medium);
        assert_eq!(HealthTier::from_score(39.0), HealthTier::Low);
    }

    #[test]
    fn test_deal_stage_parse_and_order() {
        assert_eq!(DealStage::parse(Some("closed_won")), DealStage::ClosedWon);
        assert_eq!(DealStage::parse(Some("closedLost")), DealStage::ClosedLost);
        assert_eq!(DealStage::parse(Some("closed-won")), DealStage::ClosedWon);
        assert_eq!(DealStage::parse(Some("mystery")), DealStage::Prospect);
        assert!(DealStage::Prospect < DealStage::Negotiation);
        assert_eq!(
            serde_json::to_value(DealStage::ClosedWon).unwrap(),
            serde_json::json!("closed-won")
        );
        for stage in DealStage::ALL {
            assert_eq!(DealStage::try_parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn test_confidence_tier_derivation() {
        assert_eq!(ConfidenceTier::parse_or_derive(None, 82.0), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::parse_or_derive(None, 45.0), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::parse_or_derive(Some("LOW"), 95.0), ConfidenceTier::Low);
    }

    #[test]
    fn test_outcome_rescales_slider() {
        let outcome = OutcomeInput {
            summary: "Went well".into(),
            next_steps: vec!["Send pricing".into(), " ".into()],
            sentiment_slider: 80,
            rating: 9,
        }
        .into_outcome();
        assert_eq!(outcome.sentiment, 30);
        assert_eq!(outcome.rating, 5);
        assert_eq!(outcome.next_steps, vec!["Send pricing"]);

        let low = OutcomeInput {
            summary: String::new(),
            next_steps: vec![],
            sentiment_slider: 0,
            rating: 0,
        }
        .into_outcome();
        assert_eq!(low.sentiment, -50);
        assert_eq!(low.rating, 1);
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(EventType::parse(Some("follow_up")), EventType::FollowUp);
        assert_eq!(EventType::parse(Some("follow-up")), EventType::FollowUp);
        assert_eq!(EventType::parse(None), EventType::Meeting);
        assert_eq!(EventType::parse(Some("offsite")), EventType::Other);
    }
}
