//! Headless CRM client core.
//!
//! Layers, bottom up:
//! - `storage` / `config`: durable key/value storage and startup settings
//! - `api`: REST client with single-flight token refresh, realtime socket
//! - `normalize` / `types`: canonical entities built from loose payloads
//! - `stores`: observable per-resource state with fetch and push reconciliation
//! - `state`: the aggregator that wires sessions, routes and stores together

pub mod api;
pub mod config;
pub mod error;
pub mod normalize;
pub mod state;
pub mod storage;
pub mod stores;
pub mod types;
pub mod util;

pub use config::AppConfig;
pub use error::ApiError;
pub use state::AppState;
