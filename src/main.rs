//! CRM Desk command line client.
//!
//! Restores the stored session (or signs in with `CRMDESK_EMAIL` /
//! `CRMDESK_PASSWORD`), opens the requested section and prints a summary.
//!
//! Usage: `crmdesk [path] [--watch]`

use std::collections::HashMap;
use std::sync::Arc;

use crmdesk_lib::state::{AppState, Section};
use crmdesk_lib::storage::FileStorage;
use crmdesk_lib::stores::user::Credentials;
use crmdesk_lib::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut path = "/dashboard".to_string();
    let mut params = HashMap::new();
    let mut watch = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--watch" | "-w" => watch = true,
            _ if arg.starts_with('/') => path = arg,
            id => {
                params.insert("id".to_string(), id.to_string());
            }
        }
    }

    let config = AppConfig::from_env();
    std::fs::create_dir_all(&config.storage_dir)?;
    let storage = Arc::new(FileStorage::open(&config.storage_dir)?);
    log::info!(
        "{} {} -> {}",
        config.app_name,
        config.app_version,
        config.api_base_url
    );

    let app = AppState::new(config, storage);
    app.navigate(&path, params).await;

    if !app.bootstrap().await {
        let email = std::env::var("CRMDESK_EMAIL").ok();
        let password = std::env::var("CRMDESK_PASSWORD").ok();
        let (Some(email), Some(password)) = (email, password) else {
            anyhow::bail!("Not signed in. Set CRMDESK_EMAIL and CRMDESK_PASSWORD.");
        };
        if app.login(&Credentials { email, password }).await.is_none() {
            let message = app
                .user
                .snapshot()
                .status
                .error
                .unwrap_or_else(|| "Sign in failed".to_string());
            anyhow::bail!(message);
        }
    }

    print_summary(&app);

    if watch {
        log::info!("Watching for live updates, Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }
    app.ws.disconnect();
    Ok(())
}

fn print_summary(app: &AppState) {
    if let Some(user) = app.user.current_user() {
        println!("Signed in as {} <{}>", user.display_name(), user.email);
    }
    let route = app.current_route();
    match route.section() {
        Section::Dashboard => {
            let state = app.dashboard.snapshot();
            if let Some(metrics) = state.metrics {
                println!(
                    "Contacts {}  Active deals {}  Pipeline {:.0}  Unread {}",
                    metrics.total_contacts,
                    metrics.active_deals,
                    metrics.pipeline_value,
                    metrics.unread_messages
                );
            }
            for item in &state.action_items {
                println!("  [{:?}] {}", item.kind, item.title);
            }
        }
        Section::Contacts => {
            for contact in &app.contacts.snapshot().contacts {
                println!("  {:<30} health {:>5.1}", contact.display_name(), contact.health_score);
            }
        }
        Section::Deals => {
            for deal in &app.deals.snapshot().deals {
                println!("  {:<30} {:?} {:.0}", deal.title, deal.stage, deal.value);
            }
        }
        Section::Messages => {
            for conversation in &app.messages.snapshot().conversations {
                println!(
                    "  {:<24} {} ({} unread)",
                    app.conversation_contact_name(conversation),
                    conversation.subject,
                    conversation.unread_count
                );
            }
        }
        Section::Calendar => {
            for event in app.calendar.snapshot().upcoming_events(chrono::Utc::now()) {
                println!("  {} {}", event.start.format("%Y-%m-%d %H:%M"), event.title);
            }
        }
        Section::Other => println!("Nothing to show for {}", route.path),
    }
}
