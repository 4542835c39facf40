//! Session store: the authenticated user and the auth lifecycle.
//!
//! Tokens never live in this state. They go through [`ApiClient::set_tokens`],
//! which mirrors them to durable storage; this store only tracks who is signed
//! in and whether the startup check has finished.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::base::{impl_store_state, LoadMode, RequestStatus, StoreCell};
use crate::api::ApiClient;
use crate::error::ApiError;
use crate::normalize;
use crate::types::User;

const LOGOUT_PATH: &str = "/api/auth/logout";
const ME_PATH: &str = "/api/auth/me";
const PROFILE_PATH: &str = "/api/users/me";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    /// Set once the startup session check has resolved either way.
    pub auth_checked: bool,
    pub status: RequestStatus,
}

impl_store_state!(UserState);

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

pub fn normalize_user(raw: &Value) -> User {
    let raw = normalize::entity(raw, "user");
    let email = normalize::string_or(raw, &["email"], "");
    let mut first_name = normalize::string_or(raw, &["first_name", "firstName"], "");
    let mut last_name = normalize::string_or(raw, &["last_name", "lastName"], "");
    if first_name.is_empty() && last_name.is_empty() {
        if let Some(name) = normalize::string(raw, &["name", "full_name", "fullName"]) {
            let mut parts = name.trim().splitn(2, ' ');
            first_name = parts.next().unwrap_or_default().to_string();
            last_name = parts.next().unwrap_or_default().trim().to_string();
        }
    }
    User {
        id: normalize::text(raw, &["id", "_id"]).unwrap_or_default(),
        email,
        first_name,
        last_name,
        role: normalize::string_or(raw, &["role"], "user"),
        avatar: normalize::string(raw, &["avatar", "avatar_url", "avatarUrl"]),
    }
}

/// Access and refresh token from a login response.
fn session_tokens(payload: &Value) -> Option<(String, Option<String>)> {
    let tokens = normalize::field(payload, &["tokens"]).unwrap_or(payload);
    let access = normalize::string(tokens, &["access_token", "accessToken", "token"])?;
    let refresh = normalize::string(tokens, &["refresh_token", "refreshToken"]);
    Some((access, refresh))
}

pub struct UserStore {
    api: Arc<ApiClient>,
    cell: StoreCell<UserState>,
}

impl UserStore {
    pub fn new(api: Arc<ApiClient>) -> Arc<Self> {
        Arc::new(Self {
            api,
            cell: StoreCell::new("UserStore"),
        })
    }

    pub fn snapshot(&self) -> UserState {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<UserState> {
        self.cell.subscribe()
    }

    pub fn clear_error(&self) {
        self.cell.clear_error();
    }

    pub fn is_authenticated(&self) -> bool {
        self.cell.read(|s| s.is_authenticated)
    }

    pub fn current_user(&self) -> Option<User> {
        self.cell.read(|s| s.user.clone())
    }

    pub async fn login(&self, credentials: &Credentials) -> Option<User> {
        log::info!("UserStore: signing in {}", credentials.email);
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self
                        .api
                        .post(crate::api::client::LOGIN_PATH, credentials)
                        .await?;
                    let (access, refresh) = session_tokens(&payload).ok_or_else(|| {
                        ApiError::Parse("login response carried no access token".to_string())
                    })?;
                    self.api.set_tokens(&access, refresh.as_deref());
                    Ok(normalize_user(&payload))
                },
                |state, user| {
                    state.user = Some(user.clone());
                    state.is_authenticated = true;
                    state.auth_checked = true;
                },
            )
            .await
    }

    /// Sign out. The server call is best-effort; local state and tokens are
    /// always cleared.
    pub async fn logout(&self) {
        if self.api.tokens().has_access_token() {
            if let Err(e) = self.api.post::<Value, _>(LOGOUT_PATH, &Value::Null).await {
                log::debug!("UserStore: server logout failed: {}", e);
            }
        }
        self.api.clear_tokens();
        self.handle_session_expired();
        log::info!("UserStore: signed out");
    }

    /// Resolve the stored session at startup. Without a token this settles
    /// immediately and never touches the network.
    pub async fn check_auth(&self) -> bool {
        if !self.api.tokens().has_access_token() {
            self.cell.update(|s| {
                s.user = None;
                s.is_authenticated = false;
                s.auth_checked = true;
            });
            return false;
        }

        let user = self
            .cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.get(ME_PATH).await?;
                    Ok(normalize_user(&payload))
                },
                |state, user| {
                    state.user = Some(user.clone());
                    state.is_authenticated = true;
                },
            )
            .await;

        let authenticated = user.is_some();
        self.cell.update(|s| {
            s.auth_checked = true;
            if !authenticated {
                s.user = None;
                s.is_authenticated = false;
            }
        });
        authenticated
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Option<User> {
        self.cell
            .execute(
                LoadMode::Foreground,
                async {
                    let payload: Value = self.api.put(PROFILE_PATH, update).await?;
                    Ok(normalize_user(&payload))
                },
                |state, user| state.user = Some(user.clone()),
            )
            .await
    }

    /// Drop the session without any network traffic. Called from the HTTP
    /// client's logout callback once a refresh has failed.
    pub fn handle_session_expired(&self) {
        self.cell.update(|s| {
            *s = UserState {
                auth_checked: true,
                ..UserState::default()
            }
        });
    }
}
