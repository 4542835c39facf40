//! Startup configuration, read once from the environment with hardcoded
//! fallbacks.

use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://localhost:3001";
pub const DEFAULT_APP_NAME: &str = "CRM Desk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// REST base URL, without trailing slash. Endpoints live under `/api/...`.
    pub api_base_url: String,
    /// WebSocket endpoint; the access token is appended as a query parameter.
    pub ws_url: String,
    pub app_name: String,
    pub app_version: String,
    /// Whether the realtime socket is opened after authentication.
    pub realtime: bool,
    /// Directory for durable client storage (tokens, preferences).
    pub storage_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_base_url = get("CRMDESK_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let ws_url = get("CRMDESK_WS_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| derive_ws_url(&api_base_url));
        let realtime = get("CRMDESK_REALTIME")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"))
            .unwrap_or(true);
        let storage_dir = get("CRMDESK_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_dir);

        Self {
            api_base_url,
            ws_url,
            app_name: get("CRMDESK_APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            app_version: get("CRMDESK_APP_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            realtime,
            storage_dir,
        }
    }
}

/// `http://host:3001` → `ws://host:3001/ws`, `https` → `wss`.
fn derive_ws_url(api_base_url: &str) -> String {
    let base = if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_base_url.to_string()
    };
    format!("{}/ws", base)
}

fn default_storage_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".crmdesk")
}
