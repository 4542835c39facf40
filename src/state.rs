//! Root aggregator: owns the transport, every domain store, and the current
//! route. Route changes activate the matching store once a session is
//! confirmed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::api::{ApiClient, Subscription, TokenStore, WsClient};
use crate::config::AppConfig;
use crate::storage::LocalStorage;
use crate::stores::user::Credentials;
use crate::stores::{
    CalendarStore, ContactsStore, DashboardStore, DealsStore, MessagesStore, UiStore, UserStore,
};
use crate::types::{Conversation, User};

pub const UNKNOWN_CONTACT_NAME: &str = "Unknown contact";

/// Current path plus route parameters (`id` selects a single resource).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Dashboard,
    Contacts,
    Deals,
    Messages,
    Calendar,
    Other,
}

impl Route {
    pub fn new(path: &str, params: HashMap<String, String>) -> Self {
        Self {
            path: path.to_string(),
            params,
        }
    }

    /// Store section for the leading path segment.
    pub fn section(&self) -> Section {
        let segment = self
            .path
            .trim_start_matches('/')
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        match segment {
            "" | "dashboard" => Section::Dashboard,
            "contacts" => Section::Contacts,
            "deals" => Section::Deals,
            "messages" => Section::Messages,
            "calendar" => Section::Calendar,
            _ => Section::Other,
        }
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.params
            .get("id")
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub api: Arc<ApiClient>,
    pub ws: WsClient,
    pub user: Arc<UserStore>,
    pub contacts: Arc<ContactsStore>,
    pub deals: Arc<DealsStore>,
    pub messages: Arc<MessagesStore>,
    pub calendar: Arc<CalendarStore>,
    pub dashboard: Arc<DashboardStore>,
    pub ui: UiStore,
    route: RwLock<Route>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Arc<dyn LocalStorage>) -> Arc<Self> {
        let tokens = Arc::new(TokenStore::load(storage.clone()));
        let api = Arc::new(ApiClient::new(&config.api_base_url, tokens));
        let ws = WsClient::new(&config.ws_url);

        let state = Arc::new(Self {
            user: UserStore::new(api.clone()),
            contacts: ContactsStore::new(api.clone()),
            deals: DealsStore::new(api.clone()),
            messages: MessagesStore::new(api.clone()),
            calendar: CalendarStore::new(api.clone()),
            dashboard: DashboardStore::new(api.clone()),
            ui: UiStore::load(storage),
            route: RwLock::new(Route::default()),
            subscriptions: Mutex::new(Vec::new()),
            config,
            api,
            ws,
        });

        let weak = Arc::downgrade(&state);
        state.api.set_logout_callback(Arc::new(move || {
            if let Some(state) = weak.upgrade() {
                state.force_logout();
            }
        }));
        state
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_authenticated()
    }

    pub fn current_route(&self) -> Route {
        self.route.read().clone()
    }

    /// Restore a stored session. On success the socket is opened and the
    /// current route activated.
    pub async fn bootstrap(&self) -> bool {
        if !self.user.check_auth().await {
            log::info!("AppState: no active session");
            return false;
        }
        self.start_session();
        self.activate_route().await;
        true
    }

    pub async fn login(&self, credentials: &Credentials) -> Option<User> {
        let user = self.user.login(credentials).await?;
        self.start_session();
        self.activate_route().await;
        Some(user)
    }

    pub async fn logout(&self) {
        self.end_session();
        self.user.logout().await;
    }

    /// Record the route and, once authenticated, activate it.
    pub async fn navigate(&self, path: &str, params: HashMap<String, String>) {
        *self.route.write() = Route::new(path, params);
        if !self.is_authenticated() {
            log::debug!("AppState: deferring route {} until signed in", path);
            return;
        }
        self.activate_route().await;
    }

    /// Initialize the store behind the current route and fetch the routed
    /// resource if it is not already selected. Safe to repeat.
    async fn activate_route(&self) {
        let route = self.current_route();
        let id = route.resource_id();
        match route.section() {
            Section::Dashboard => self.dashboard.initialize().await,
            Section::Contacts => {
                self.contacts.initialize().await;
                if let Some(id) = id {
                    if self.contacts.selected_id().as_deref() != Some(id) {
                        self.contacts.fetch_contact(id).await;
                    }
                }
            }
            Section::Deals => {
                self.deals.initialize().await;
                if let Some(id) = id {
                    if self.deals.selected_id().as_deref() != Some(id) {
                        self.deals.fetch_deal(id).await;
                    }
                }
            }
            Section::Messages => {
                // Conversations show contact names the server does not embed.
                tokio::join!(self.messages.initialize(), self.contacts.initialize());
                if let Some(id) = id {
                    if self.messages.selected_id().as_deref() != Some(id) {
                        self.messages.fetch_conversation(id).await;
                    }
                }
            }
            Section::Calendar => {
                self.calendar.initialize().await;
                if let Some(id) = id {
                    if self.calendar.selected_id().as_deref() != Some(id) {
                        self.calendar.fetch_event(id).await;
                    }
                }
            }
            Section::Other => {}
        }
    }

    /// Display name for a conversation, falling back to the contacts store.
    pub fn conversation_contact_name(&self, conversation: &Conversation) -> String {
        if let Some(name) = conversation
            .contact_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
        {
            return name.to_string();
        }
        self.contacts
            .snapshot()
            .find(&conversation.contact_id)
            .map(|contact| contact.display_name())
            .unwrap_or_else(|| UNKNOWN_CONTACT_NAME.to_string())
    }

    fn start_session(&self) {
        if !self.config.realtime {
            return;
        }
        let Some(token) = self.api.tokens().access_token() else {
            return;
        };
        if let Err(e) = self.ws.connect(&token) {
            log::warn!("AppState: realtime unavailable: {}", e);
            return;
        }
        let mut subscriptions = self.subscriptions.lock();
        for subscription in subscriptions.drain(..) {
            self.ws.off(&subscription);
        }
        subscriptions.extend(self.contacts.bind_realtime(&self.ws));
        subscriptions.extend(self.deals.bind_realtime(&self.ws));
        subscriptions.extend(self.messages.bind_realtime(&self.ws));
        subscriptions.extend(self.calendar.bind_realtime(&self.ws));
        subscriptions.extend(self.dashboard.bind_realtime(&self.ws));
        log::info!("AppState: realtime bound ({} handlers)", subscriptions.len());
    }

    fn end_session(&self) {
        for subscription in self.subscriptions.lock().drain(..) {
            self.ws.off(&subscription);
        }
        self.ws.disconnect();
        self.contacts.reset();
        self.deals.reset();
        self.messages.reset();
        self.calendar.reset();
        self.dashboard.reset();
    }

    /// Refresh failed: the client already cleared the tokens.
    fn force_logout(&self) {
        log::warn!("AppState: session expired, signing out");
        self.end_session();
        self.user.handle_session_expired();
    }
}
