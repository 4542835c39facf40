use std::collections::HashMap;
use std::sync::Arc;

use crmdesk_lib::state::AppState;
use crmdesk_lib::storage::{LocalStorage, MemoryStorage, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crmdesk_lib::stores::dashboard::NO_DEALS_CLOSING_ID;
use crmdesk_lib::stores::user::Credentials;
use crmdesk_lib::types::ActionItemOrigin;
use crmdesk_lib::AppConfig;
use mockito::{Mock, ServerGuard};
use serde_json::json;

fn app(server: &ServerGuard, storage: Arc<dyn LocalStorage>) -> Arc<AppState> {
    let url = server.url();
    let config = AppConfig::from_lookup(|key| match key {
        "CRMDESK_API_URL" => Some(url.clone()),
        "CRMDESK_REALTIME" => Some("false".to_string()),
        _ => None,
    });
    AppState::new(config, storage)
}

fn id_param(id: &str) -> HashMap<String, String> {
    HashMap::from([("id".to_string(), id.to_string())])
}

fn json_mock(server: &mut ServerGuard, method: &str, path: &str, body: serde_json::Value) -> Mock {
    server
        .mock(method, path)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
}

async fn mock_login(server: &mut ServerGuard) -> Mock {
    json_mock(
        server,
        "POST",
        "/api/auth/login",
        json!({"data": {
            "user": {"id": "u1", "email": "sam@example.com", "firstName": "Sam", "lastName": "Lee", "role": "admin"},
            "accessToken": "a1",
            "refreshToken": "r1"
        }}),
    )
    .create_async()
    .await
}

fn credentials() -> Credentials {
    Credentials {
        email: "sam@example.com".to_string(),
        password: "hunter2".to_string(),
    }
}

#[tokio::test]
async fn test_routes_wait_for_authentication_and_activate_once() {
    let mut server = mockito::Server::new_async().await;
    let list = json_mock(&mut server, "GET", "/api/contacts", json!([{"id": "c1", "name": "Ada Lovelace"}]))
        .expect(1)
        .create_async()
        .await;
    let stats = json_mock(&mut server, "GET", "/api/contacts/stats", json!({}))
        .expect(1)
        .create_async()
        .await;
    let one = json_mock(&mut server, "GET", "/api/contacts/c1", json!({"id": "c1", "name": "Ada Lovelace"}))
        .expect(1)
        .create_async()
        .await;
    let _login = mock_login(&mut server).await;

    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let app = app(&server, storage.clone());

    app.navigate("/contacts", HashMap::new()).await;
    assert!(!app.contacts.is_initialized());

    let user = app.login(&credentials()).await.unwrap();
    assert_eq!(user.display_name(), "Sam Lee");
    assert_eq!(storage.get_item(AUTH_TOKEN_KEY).as_deref(), Some("a1"));
    assert!(app.contacts.is_initialized());

    app.navigate("/contacts", HashMap::new()).await;
    app.navigate("/contacts", id_param("c1")).await;
    app.navigate("/contacts", id_param("c1")).await;
    assert_eq!(app.contacts.selected_id().as_deref(), Some("c1"));

    list.assert_async().await;
    stats.assert_async().await;
    one.assert_async().await;
}

#[tokio::test]
async fn test_messages_route_also_loads_contacts() {
    let mut server = mockito::Server::new_async().await;
    let conversations = json_mock(
        &mut server,
        "GET",
        "/api/conversations",
        json!([{"id": "conv1", "contact_id": "c7", "subject": "Intro"}]),
    )
    .expect(1)
    .create_async()
    .await;
    let _conversation_stats = json_mock(&mut server, "GET", "/api/conversations/stats", json!({}))
        .create_async()
        .await;
    let contacts = json_mock(
        &mut server,
        "GET",
        "/api/contacts",
        json!([{"id": "c7", "first_name": "Grace", "last_name": "Hopper"}]),
    )
    .expect(1)
    .create_async()
    .await;
    let _contact_stats = json_mock(&mut server, "GET", "/api/contacts/stats", json!({}))
        .create_async()
        .await;
    let _login = mock_login(&mut server).await;

    let app = app(&server, Arc::new(MemoryStorage::new()));
    app.login(&credentials()).await.unwrap();
    app.navigate("/messages", HashMap::new()).await;

    conversations.assert_async().await;
    contacts.assert_async().await;

    let conversation = app.messages.snapshot().conversations[0].clone();
    assert_eq!(app.conversation_contact_name(&conversation), "Grace Hopper");
}

#[tokio::test]
async fn test_bootstrap_restores_session_and_builds_dashboard() {
    let mut server = mockito::Server::new_async().await;
    let me = server
        .mock("GET", "/api/auth/me")
        .match_header("authorization", "Bearer stored")
        .with_body(json!({"id": "u1", "email": "sam@example.com", "name": "Sam Lee"}).to_string())
        .create_async()
        .await;
    let _metrics = json_mock(
        &mut server,
        "GET",
        "/api/dashboard/metrics",
        json!({"total_contacts": 42, "pipeline_value": 600000}),
    )
    .create_async()
    .await;
    let _forecast = json_mock(
        &mut server,
        "GET",
        "/api/dashboard/forecast",
        json!({"total_pipeline": 600000, "monthly_forecast": 100000, "deals_closing_this_month": 0}),
    )
    .create_async()
    .await;
    let _actions = json_mock(
        &mut server,
        "GET",
        "/api/dashboard/action-items",
        json!([{"id": "a1", "type": "opportunity", "title": "Upsell Acme"}]),
    )
    .create_async()
    .await;
    let _insights = json_mock(&mut server, "GET", "/api/dashboard/insights", json!([]))
        .create_async()
        .await;

    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    storage.set_item(AUTH_TOKEN_KEY, "stored").unwrap();
    let app = app(&server, storage);

    assert!(app.bootstrap().await);
    me.assert_async().await;

    let user = app.user.snapshot();
    assert!(user.is_authenticated && user.auth_checked);

    let dashboard = app.dashboard.snapshot();
    assert_eq!(dashboard.metrics.unwrap().total_contacts, 42);
    let forecast_ids: Vec<&str> = dashboard
        .action_items
        .iter()
        .filter(|i| i.origin == ActionItemOrigin::Forecast)
        .map(|i| i.id.as_str())
        .collect();
    assert_eq!(forecast_ids, vec![NO_DEALS_CLOSING_ID]);
    assert!(dashboard
        .action_items
        .iter()
        .any(|i| i.id == "a1" && i.origin == ActionItemOrigin::Server));
    assert!(dashboard.last_refreshed.is_some());
}

#[tokio::test]
async fn test_failed_refresh_forces_logout() {
    let mut server = mockito::Server::new_async().await;
    let _me = server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    storage.set_item(AUTH_TOKEN_KEY, "old").unwrap();
    storage.set_item(REFRESH_TOKEN_KEY, "r0").unwrap();
    let app = app(&server, storage.clone());

    assert!(!app.bootstrap().await);
    refresh.assert_async().await;

    let user = app.user.snapshot();
    assert!(!user.is_authenticated);
    assert!(user.auth_checked);
    // Expired sessions are not shown as errors
    assert_eq!(user.status.error, None);
    assert_eq!(storage.get_item(AUTH_TOKEN_KEY), None);
    assert_eq!(storage.get_item(REFRESH_TOKEN_KEY), None);
}

#[tokio::test]
async fn test_logout_clears_session_and_stores() {
    let mut server = mockito::Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let _metrics = json_mock(&mut server, "GET", "/api/dashboard/metrics", json!({}))
        .create_async()
        .await;
    let _forecast = json_mock(&mut server, "GET", "/api/dashboard/forecast", json!({}))
        .create_async()
        .await;
    let _actions = json_mock(&mut server, "GET", "/api/dashboard/action-items", json!([]))
        .create_async()
        .await;
    let _insights = json_mock(&mut server, "GET", "/api/dashboard/insights", json!([]))
        .create_async()
        .await;
    let logout = json_mock(&mut server, "POST", "/api/auth/logout", json!({}))
        .expect(1)
        .create_async()
        .await;

    let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
    let app = app(&server, storage.clone());
    app.navigate("/", HashMap::new()).await;
    app.login(&credentials()).await.unwrap();
    assert!(app.dashboard.is_initialized());

    app.logout().await;
    logout.assert_async().await;
    assert!(!app.is_authenticated());
    assert!(!app.dashboard.is_initialized());
    assert_eq!(app.dashboard.snapshot().metrics, None);
    assert_eq!(storage.get_item(AUTH_TOKEN_KEY), None);
}
