//! Domain stores.
//!
//! One store per backend resource family. Stores own their state in a
//! [`base::StoreCell`], fetch through the shared [`crate::api::ApiClient`],
//! normalize every payload before it lands in state, and reconcile socket
//! events through `apply_realtime`.

pub mod base;
pub mod calendar;
pub mod contacts;
pub mod dashboard;
pub mod deals;
pub mod debounce;
pub mod messages;
pub mod sync;
pub mod ui;
pub mod user;

pub use base::{LoadMode, RequestStatus, StoreCell, StoreState};
pub use calendar::{CalendarState, CalendarStore};
pub use contacts::{ContactsState, ContactsStore};
pub use dashboard::{DashboardState, DashboardStore};
pub use deals::{DealsState, DealsStore};
pub use debounce::Debouncer;
pub use messages::{MessagesState, MessagesStore};
pub use ui::{UiPreferences, UiStore};
pub use user::{UserState, UserStore};

/// Query pairs for a list endpoint. `filter` is omitted for `all`, `search`
/// when blank.
pub(crate) fn list_query(filter: Option<&str>, search: &str) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(filter) = filter {
        query.push(("filter", filter.to_string()));
    }
    let search = search.trim();
    if !search.is_empty() {
        query.push(("search", search.to_string()));
    }
    query
}

/// `/api/contacts` + `c 1` → `/api/contacts/c%201`.
pub(crate) fn resource_path(collection: &str, id: &str) -> String {
    let mut path = String::with_capacity(collection.len() + id.len() + 1);
    path.push_str(collection);
    path.push('/');
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                path.push(byte as char)
            }
            other => path.push_str(&format!("%{:02X}", other)),
        }
    }
    path
}
