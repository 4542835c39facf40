//! Transport layer: REST client and realtime socket.
//!
//! Modules:
//! - client: JSON over HTTP with bearer auth, envelope unwrapping and
//!   single-flight token refresh
//! - tokens: access/refresh token holder mirrored to durable storage
//! - websocket: `{event, data}` pub/sub socket with bounded reconnect

pub mod client;
pub mod tokens;
pub mod websocket;

pub use client::ApiClient;
pub use tokens::TokenStore;
pub use websocket::{ConnectionState, ReconnectPolicy, Subscription, WsClient};
