//! Messages store: conversations, the composer buffer, and message push events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use super::base::{impl_store_state, LoadMode, RequestStatus, StoreCell};
use super::debounce::Debouncer;
use super::{list_query, resource_path, sync};
use crate::api::{ApiClient, Subscription, WsClient};
use crate::normalize;
use crate::types::{
    Conversation, ConversationFilter, ConversationStats, Message, MessageAnalysis,
    MessageDirection, Priority, SentimentTrend, FOLLOW_UP_TAG,
};

const CONVERSATIONS_PATH: &str = "/api/conversations";
const STATS_PATH: &str = "/api/conversations/stats";

pub const EVENTS: [&str; 5] = [
    "conversation:created",
    "conversation:updated",
    "conversation:deleted",
    "message:received",
    "message:analyzed",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagesState {
    pub conversations: Vec<Conversation>,
    pub selected: Option<Conversation>,
    pub stats: Option<ConversationStats>,
    pub filter: ConversationFilter,
    pub search_query: String,
    /// Draft in the reply box of the selected conversation.
    pub composing_message: String,
    pub status: RequestStatus,
}

impl_store_state!(MessagesState);

impl MessagesState {
    /// Unread messages across conversations that are not archived.
    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .filter(|c| !c.is_archived)
            .map(|c| c.unread_count)
            .sum()
    }

    pub fn find(&self, id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.id == id)
            .or_else(|| self.selected.as_ref().filter(|c| c.id == id))
    }

    fn is_selected(&self, id: &str) -> bool {
        self.selected.as_ref().map(|c| c.id == id).unwrap_or(false)
    }

    /// Run `f` on the list entry and the selection with this id.
    fn for_each_copy(&mut self, id: &str, mut f: impl FnMut(&mut Conversation)) -> bool {
        let mut found = false;
        for conversation in self
            .conversations
            .iter_mut()
            .chain(self.selected.as_mut())
            .filter(|c| c.id == id)
        {
            f(conversation);
            found = true;
        }
        found
    }
}

// =============================================================================
// Normalization
// =============================================================================

pub fn normalize_analysis(raw: &Value) -> MessageAnalysis {
    MessageAnalysis {
        topics: normalize::string_list(raw, &["topics", "key_topics", "keyTopics"]),
        urgency: Priority::parse(normalize::string(raw, &["urgency", "priority"]).as_deref()),
        suggested_response: normalize::text(raw, &["suggested_response", "suggestedResponse"]),
        action_items: normalize::string_list(raw, &["action_items", "actionItems"]),
    }
}

pub fn normalize_message(raw: &Value) -> Message {
    let raw = normalize::entity(raw, "message");
    let direction = MessageDirection::parse(
        normalize::string(raw, &["direction", "sender_type", "senderType"]).as_deref(),
    );
    Message {
        id: normalize::string_or(raw, &["id", "_id"], ""),
        conversation_id: normalize::string_or(raw, &["conversation_id", "conversationId"], ""),
        content: normalize::string_or(raw, &["content", "body", "text"], ""),
        direction,
        sender_name: normalize::name_or_text(raw, &["sender_name", "senderName", "sender"]),
        sentiment: normalize::signed_score(raw, &["sentiment", "sentiment_score", "sentimentScore"]),
        confidence: normalize::score(raw, &["confidence"], 0.0),
        analysis: normalize::field(raw, &["analysis", "ai_analysis", "aiAnalysis"])
            .filter(|a| a.is_object())
            .map(normalize_analysis),
        is_read: normalize::boolean(raw, &["is_read", "isRead", "read"])
            .unwrap_or(direction == MessageDirection::Outbound),
        sent_at: normalize::date_or(
            raw,
            &["sent_at", "sentAt", "created_at", "createdAt", "timestamp"],
            normalize::now(),
        ),
    }
}

pub fn normalize_stats(raw: &Value) -> ConversationStats {
    let raw = normalize::entity(raw, "stats");
    ConversationStats {
        total_conversations: normalize::count(raw, &["total_conversations", "totalConversations", "total"]),
        unread_count: normalize::count(raw, &["unread_count", "unreadCount", "unread"]),
        needs_follow_up: normalize::count(raw, &["needs_follow_up", "needsFollowUp", "follow_up"]),
        average_sentiment: normalize::signed_score(
            raw,
            &["average_sentiment", "averageSentiment", "avg_sentiment"],
        ),
    }
}

/// Keys `normalize_conversation` accepts for each aliased field.
pub const CONVERSATION_FIELDS: &[&[&str]] = &[
    &["contact_id", "contactId", "contact"],
    &["contact_name", "contactName", "contact"],
    &["subject", "title"],
    &["sentiment", "sentiment_score", "sentimentScore", "average_sentiment"],
    &["sentiment_trend", "sentimentTrend"],
    &["unread_count", "unreadCount", "unread"],
    &["is_archived", "isArchived", "archived"],
    &["last_message", "lastMessage"],
];

pub fn normalize_conversation(raw: &Value) -> Conversation {
    let raw = normalize::entity(raw, "conversation");
    let id = normalize::string_or(raw, &["id", "_id"], "");
    let contact = normalize::field(raw, &["contact"]).filter(|c| c.is_object());

    let with_parent = |message: Message| {
        if message.conversation_id.is_empty() {
            Message {
                conversation_id: id.clone(),
                ..message
            }
        } else {
            message
        }
    };

    let mut messages: Vec<Message> = normalize::array(raw, &["messages"])
        .iter()
        .filter(|m| m.is_object())
        .map(|m| with_parent(normalize_message(m)))
        .collect();
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));

    let last_message = normalize::field(raw, &["last_message", "lastMessage"])
        .filter(|m| m.is_object())
        .map(|m| with_parent(normalize_message(m)))
        .or_else(|| messages.last().cloned());

    let created_at = normalize::date_or(raw, &["created_at", "createdAt"], normalize::now());
    let updated_fallback = last_message
        .as_ref()
        .map(|m| m.sent_at)
        .unwrap_or(created_at);

    Conversation {
        contact_id: normalize::string(raw, &["contact_id", "contactId"])
            .or_else(|| contact.and_then(|c| normalize::text(c, &["id"])))
            .unwrap_or_default(),
        contact_name: normalize::text(raw, &["contact_name", "contactName"])
            .or_else(|| contact.and_then(|c| normalize::text(c, &["name", "full_name", "fullName"]))),
        subject: normalize::string_or(raw, &["subject", "title"], ""),
        channel: normalize::string_or(raw, &["channel"], "email"),
        sentiment: normalize::signed_score(
            raw,
            &["sentiment", "sentiment_score", "sentimentScore", "average_sentiment"],
        ),
        sentiment_trend: SentimentTrend::parse(
            normalize::string(raw, &["sentiment_trend", "sentimentTrend"]).as_deref(),
        ),
        unread_count: normalize::count(raw, &["unread_count", "unreadCount", "unread"]),
        is_archived: normalize::boolean(raw, &["is_archived", "isArchived", "archived"]).unwrap_or(false),
        priority: Priority::parse(normalize::string(raw, &["priority"]).as_deref()),
        tags: normalize::tags(raw, &["tags"]),
        messages,
        last_message,
        created_at,
        updated_at: normalize::date_or(raw, &["updated_at", "updatedAt"], updated_fallback),
        id,
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct MessagesStore {
    api: Arc<ApiClient>,
    cell: StoreCell<MessagesState>,
    initialized: AtomicBool,
    search: Debouncer,
    this: Weak<MessagesStore>,
}

impl MessagesStore {
    pub fn new(api: Arc<ApiClient>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api,
            cell: StoreCell::new("MessagesStore"),
            initialized: AtomicBool::new(false),
            search: Debouncer::default(),
            this: this.clone(),
        })
    }

    pub fn snapshot(&self) -> MessagesState {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<MessagesState> {
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

    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("MessagesStore: initializing");
        tokio::join!(self.fetch_conversations(), self.fetch_stats());
    }

    pub fn reset(&self) {
        self.search.cancel();
        self.initialized.store(false, Ordering::SeqCst);
        self.cell.reset();
    }

    pub async fn set_filter(&self, filter: ConversationFilter) {
        if self.cell.read(|s| s.filter == filter) {
            return;
        }
        self.cell.update(|s| s.filter = filter);
        if self.is_initialized() {
            self.fetch_conversations().await;
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
                store.fetch_conversations().await;
            }
        });
    }

    pub fn set_composing_message(&self, text: &str) {
        self.cell.update(|s| s.composing_message = text.to_string());
    }

    /// Switching conversations discards the draft.
    pub fn select(&self, conversation: Option<Conversation>) {
        self.cell.update(|s| {
            if s.selected.as_ref().map(|c| &c.id) != conversation.as_ref().map(|c| &c.id) {
                s.composing_message.clear();
            }
            s.selected = conversation;
        });
    }

    pub fn clear_selection(&self) {
        self.select(None);
    }

    pub async fn fetch_conversations(&self) -> Option<Vec<Conversation>> {
        let query = self
            .cell
            .read(|s| list_query(s.filter.as_query(), &s.search_query));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get_with_query(CONVERSATIONS_PATH, &query).await?;
                    Ok(normalize::list_items(&payload, &["conversations"])
                        .iter()
                        .map(normalize_conversation)
                        .collect::<Vec<_>>())
                },
                |state, conversations| {
                    state.conversations = conversations.clone();
                    if let Some(selected) = state.selected.as_ref() {
                        if let Some(fresh) = conversations.iter().find(|c| c.id == selected.id) {
                            state.selected = Some(fresh.clone());
                        }
                    }
                },
            )
            .await
    }

    pub async fn fetch_conversation(&self, id: &str) -> Option<Conversation> {
        let path = resource_path(CONVERSATIONS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get(&path).await?;
                    Ok(normalize_conversation(&payload))
                },
                |state, conversation| {
                    if !state.is_selected(&conversation.id) {
                        state.composing_message.clear();
                    }
                    state.selected = Some(conversation.clone());
                    sync::replace_by_id(&mut state.conversations, &mut None, conversation.clone());
                },
            )
            .await
    }

    pub async fn fetch_stats(&self) -> Option<ConversationStats> {
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

    /// Send a reply. On success, in one update: the message is appended,
    /// `lastMessage` is updated, the follow-up tag is removed and the composer
    /// is cleared. Blank content is not sent.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Option<Message> {
        if content.trim().is_empty() {
            return None;
        }
        let path = format!("{}/messages", resource_path(CONVERSATIONS_PATH, conversation_id));
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self
                        .api
                        .post(&path, &json!({ "content": content }))
                        .await?;
                    let mut message = normalize_message(&payload);
                    if message.conversation_id.is_empty() {
                        message.conversation_id = conversation_id.to_string();
                    }
                    if message.content.is_empty() {
                        message.content = content.to_string();
                    }
                    message.direction = MessageDirection::Outbound;
                    message.is_read = true;
                    Ok(message)
                },
                |state, message| {
                    state.for_each_copy(conversation_id, |conversation| {
                        if !conversation.messages.iter().any(|m| m.id == message.id) {
                            conversation.messages.push(message.clone());
                        }
                        conversation.last_message = Some(message.clone());
                        conversation.tags.retain(|t| t != FOLLOW_UP_TAG);
                        conversation.updated_at = message.sent_at;
                    });
                    state.composing_message.clear();
                },
            )
            .await
    }

    pub async fn mark_as_read(&self, id: &str) -> bool {
        let path = resource_path(CONVERSATIONS_PATH, id);
        self.cell
            .execute(
                LoadMode::Background,
                async {
                    let _: Value = self.api.patch(&path, &json!({ "isRead": true })).await?;
                    Ok(())
                },
                |state, _| {
                    state.for_each_copy(id, |conversation| {
                        conversation.unread_count = 0;
                        for message in conversation.messages.iter_mut() {
                            message.is_read = true;
                        }
                        if let Some(last) = conversation.last_message.as_mut() {
                            last.is_read = true;
                        }
                    });
                },
            )
            .await
            .is_some()
    }

    pub async fn archive_conversation(&self, id: &str) -> bool {
        let path = resource_path(CONVERSATIONS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let _: Value = self.api.patch(&path, &json!({ "isArchived": true })).await?;
                    Ok(())
                },
                |state, _| {
                    state.for_each_copy(id, |conversation| conversation.is_archived = true);
                },
            )
            .await
            .is_some()
    }

    pub async fn update_tags(&self, id: &str, tags: &[String]) -> bool {
        let path = resource_path(CONVERSATIONS_PATH, id);
        let tags: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let _: Value = self.api.patch(&path, &json!({ "tags": tags })).await?;
                    Ok(())
                },
                |state, _| {
                    state.for_each_copy(id, |conversation| conversation.tags = tags.clone());
                },
            )
            .await
            .is_some()
    }

    pub async fn delete_conversation(&self, id: &str) -> bool {
        let path = resource_path(CONVERSATIONS_PATH, id);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let _: Value = self.api.delete(&path).await?;
                    Ok(())
                },
                |state, _| {
                    if sync::remove_by_id(&mut state.conversations, &mut state.selected, id)
                        && state.selected.is_none()
                    {
                        state.composing_message.clear();
                    }
                },
            )
            .await
            .is_some()
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
            log::debug!("MessagesStore: ignored {}", event);
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

fn apply_event(state: &mut MessagesState, event: &str, data: &Value) -> bool {
    match event {
        "conversation:created" => {
            let conversation = normalize_conversation(data);
            if conversation.id.is_empty() {
                return false;
            }
            sync::upsert_front(&mut state.conversations, &mut state.selected, conversation);
            true
        }
        "conversation:updated" => {
            let Some(id) = sync::event_id(data, &["conversationId", "conversation_id"]) else {
                return false;
            };
            let patch = sync::event_patch(normalize::entity(data, "conversation"));
            sync::patch_by_id(
                &mut state.conversations,
                &mut state.selected,
                &id,
                patch,
                CONVERSATION_FIELDS,
                normalize_conversation,
            )
        }
        "conversation:deleted" => {
            match sync::event_id(data, &["conversationId", "conversation_id"]) {
                Some(id) => sync::remove_by_id(&mut state.conversations, &mut state.selected, &id),
                None => false,
            }
        }
        "message:received" => receive_message(state, data),
        "message:analyzed" => attach_analysis(state, data),
        _ => false,
    }
}

/// Append an incoming message and move its conversation to the front.
fn receive_message(state: &mut MessagesState, data: &Value) -> bool {
    let mut message = normalize_message(normalize::field(data, &["message"]).unwrap_or(data));
    if message.conversation_id.is_empty() {
        match normalize::text(data, &["conversationId", "conversation_id"]) {
            Some(id) => message.conversation_id = id,
            None => return false,
        }
    }
    if message.id.is_empty() {
        log::debug!(
            "MessagesStore: message for {} arrived without an id",
            message.conversation_id
        );
        message.id = format!("message-{}", message.sent_at.timestamp_millis());
    }
    let id = message.conversation_id.clone();
    let is_selected = state.is_selected(&id);
    let counts_as_unread = !is_selected && message.direction == MessageDirection::Inbound;
    if is_selected {
        message.is_read = true;
    }

    let found = state.for_each_copy(&id, |conversation| {
        if conversation.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        conversation.messages.push(message.clone());
        conversation.last_message = Some(message.clone());
        conversation.updated_at = message.sent_at;
        if counts_as_unread {
            conversation.unread_count += 1;
        }
    });

    if let Some(index) = state.conversations.iter().position(|c| c.id == id) {
        let conversation = state.conversations.remove(index);
        state.conversations.insert(0, conversation);
    }
    found
}

fn attach_analysis(state: &mut MessagesState, data: &Value) -> bool {
    let Some(message_id) = sync::event_id(data, &["messageId", "message_id"]) else {
        return false;
    };
    let Some(raw) = normalize::field(data, &["analysis", "ai_analysis", "aiAnalysis"]) else {
        return false;
    };
    let analysis = normalize_analysis(raw);
    let sentiment = normalize::number(data, &["sentiment", "sentiment_score", "sentimentScore"])
        .map(|s| s.clamp(-100.0, 100.0));
    let conversation_id = normalize::text(data, &["conversationId", "conversation_id"]);

    let mut found = false;
    for conversation in state
        .conversations
        .iter_mut()
        .chain(state.selected.as_mut())
        .filter(|c| conversation_id.as_deref().map(|id| c.id == id).unwrap_or(true))
    {
        for message in conversation
            .messages
            .iter_mut()
            .chain(conversation.last_message.as_mut())
            .filter(|m| m.id == message_id)
        {
            message.analysis = Some(analysis.clone());
            if let Some(sentiment) = sentiment {
                message.sentiment = sentiment;
            }
            found = true;
        }
    }
    found
}
