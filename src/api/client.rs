//! REST client for the CRM backend.
//!
//! - Injects `Authorization: Bearer <token>` when a token is held
//! - Unwraps `{data: ...}` envelopes; bare payloads pass through
//! - On 401, refreshes the access token once and retries the request once.
//!   Concurrent 401s share one in-flight refresh; a refresh failure clears the
//!   session and fires the registered logout callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::tokens::TokenStore;
use crate::error::ApiError;
use crate::normalize;

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Invoked when the session can no longer be refreshed.
pub type LogoutCallback = Arc<dyn Fn() + Send + Sync>;

type RefreshFuture = Shared<BoxFuture<'static, Result<String, ApiError>>>;

struct InFlightRefresh {
    generation: u64,
    future: RefreshFuture,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    refreshing: Mutex<Option<InFlightRefresh>>,
    refresh_generation: AtomicU64,
    on_logout: Arc<RwLock<Option<LogoutCallback>>>,
}

/// Strip a `{data: ...}` envelope.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Arc<TokenStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            refreshing: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
            on_logout: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Register the callback fired after a failed refresh.
    pub fn set_logout_callback(&self, callback: LogoutCallback) {
        *self.on_logout.write() = Some(callback);
    }

    pub fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        self.tokens.set_tokens(access, refresh);
    }

    pub fn clear_tokens(&self) {
        self.tokens.clear();
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, &[], None).await
    }

    /// GET with query parameters; pairs are sent in order.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, &[], None).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let token = self.tokens.access_token();
        let response = self
            .send(method.clone(), path, query, body.as_ref(), token.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && !is_auth_path(path) {
            log::debug!("ApiClient: 401 on {} {}, refreshing session", method, path);
            let fresh = self.refresh_access_token(token.as_deref()).await?;
            // One retry only: a second 401 surfaces as an error.
            let retry = self
                .send(method, path, query, body.as_ref(), Some(&fresh))
                .await?;
            return decode(retry).await;
        }

        decode(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let request_id = uuid::Uuid::new_v4();
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-Request-Id", request_id.to_string());

        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        log::debug!("ApiClient: {} {} [{}]", method, path, request_id);
        let response = builder.send().await?;
        log::debug!(
            "ApiClient: {} {} [{}] -> {}",
            method,
            path,
            request_id,
            response.status()
        );
        Ok(response)
    }

    /// Obtain a fresh access token after `failed_token` was rejected.
    ///
    /// If the token already changed since the failing request went out, the
    /// current one is returned without another refresh. Otherwise all callers
    /// await the same refresh request; the memo is cleared once it settles.
    async fn refresh_access_token(&self, failed_token: Option<&str>) -> Result<String, ApiError> {
        if let Some(settled) = self.settled_refresh(failed_token) {
            return settled;
        }

        let (generation, future) = {
            let mut slot = self.refreshing.lock();
            match slot.as_ref() {
                Some(in_flight) => (in_flight.generation, in_flight.future.clone()),
                None => {
                    // Tokens are written before the memo is cleared, so a
                    // refresh that settled since the read above shows here.
                    if let Some(settled) = self.settled_refresh(failed_token) {
                        return settled;
                    }
                    let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = run_refresh(
                        self.http.clone(),
                        self.base_url.clone(),
                        self.tokens.clone(),
                        self.on_logout.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlightRefresh {
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.refreshing.lock();
        if slot.as_ref().map(|f| f.generation) == Some(generation) {
            *slot = None;
        }
        result
    }

    /// Outcome of a refresh that already happened after `failed_token` was
    /// sent, if any.
    fn settled_refresh(&self, failed_token: Option<&str>) -> Option<Result<String, ApiError>> {
        match self.tokens.access_token() {
            Some(current) if Some(current.as_str()) != failed_token => Some(Ok(current)),
            // A failed refresh already ended the session.
            None if failed_token.is_some() => Some(Err(ApiError::AuthExpired)),
            _ => None,
        }
    }
}

fn is_auth_path(path: &str) -> bool {
    path.starts_with(REFRESH_PATH) || path.starts_with(LOGIN_PATH)
}

/// Read a response: non-2xx → structured error, empty body → `null`,
/// otherwise JSON with the envelope stripped.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::from_response(status.as_u16(), &text));
    }

    let value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)?
    };
    Ok(serde_json::from_value(unwrap_envelope(value))?)
}

/// The single network refresh shared by every waiter.
///
/// Runs exactly once per generation, so clearing tokens and firing the
/// logout callback also happen once.
async fn run_refresh(
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    on_logout: Arc<RwLock<Option<LogoutCallback>>>,
) -> Result<String, ApiError> {
    let outcome = request_new_token(&http, &base_url, &tokens).await;
    match outcome {
        Ok(access) => {
            log::info!("ApiClient: access token refreshed");
            Ok(access)
        }
        Err(err) => {
            log::warn!("ApiClient: token refresh failed, ending session: {}", err);
            tokens.clear();
            let callback = on_logout.read().clone();
            if let Some(callback) = callback {
                callback();
            }
            Err(ApiError::AuthExpired)
        }
    }
}

async fn request_new_token(
    http: &reqwest::Client,
    base_url: &str,
    tokens: &TokenStore,
) -> Result<String, ApiError> {
    let refresh_token = tokens.refresh_token().ok_or(ApiError::AuthExpired)?;

    let response = http
        .post(format!("{}{}", base_url, REFRESH_PATH))
        .header(reqwest::header::ACCEPT, "application/json")
        .json(&serde_json::json!({ "refresh_token": refresh_token }))
        .send()
        .await?;
    let payload: Value = decode(response).await?;

    let access = normalize::text(&payload, &["access_token", "accessToken", "token"])
        .ok_or_else(|| ApiError::Parse("No access token in refresh response".to_string()))?;
    let rotated = normalize::text(&payload, &["refresh_token", "refreshToken"]);

    tokens.set_tokens(&access, rotated.as_deref());
    Ok(access)
}
