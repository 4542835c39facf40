//! Realtime socket client.
//!
//! Frames are JSON `{event, data}` in both directions. Any number of handlers
//! may subscribe to one event name; each frame invokes all of them. Malformed
//! frames are logged and dropped.
//!
//! Unexpected closes reconnect with exponential backoff (1s, 2s, 4s, 8s, 16s)
//! and give up silently after the fifth failed attempt. `disconnect()` never
//! reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ApiError;

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-indexed), or `None` once
    /// the cap is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

/// Handle returned by [`WsClient::on`]; pass it to [`WsClient::off`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }
}

#[derive(Default)]
struct HandlerTable {
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
}

impl HandlerTable {
    /// Parse one text frame and invoke every handler for its event.
    fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("WsClient: dropping malformed frame: {}", e);
                return;
            }
        };
        let Some(event) = frame.get("event").and_then(Value::as_str) else {
            log::warn!("WsClient: dropping frame without event name");
            return;
        };
        let data = frame.get("data").cloned().unwrap_or(Value::Null);

        // Snapshot so handlers may subscribe/unsubscribe while running.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            log::debug!("WsClient: no handlers for {}", event);
        }
        for handler in handlers {
            handler(&data);
        }
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: Arc<Notify>,
    manual_close: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct WsClient {
    url: String,
    policy: ReconnectPolicy,
    table: Arc<HandlerTable>,
    next_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl WsClient {
    pub fn new(url: &str) -> Self {
        Self::with_policy(url, ReconnectPolicy::default())
    }

    pub fn with_policy(url: &str, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.to_string(),
            policy,
            table: Arc::new(HandlerTable::default()),
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint URL with the access token as the `token` query parameter.
    pub fn connection_url(&self, token: &str) -> Result<String, ApiError> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| ApiError::Network(format!("Invalid socket URL {}: {}", self.url, e)))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }

    /// Open the socket, replacing any existing connection. Must be called
    /// inside a tokio runtime.
    pub fn connect(&self, token: &str) -> Result<(), ApiError> {
        let url = self.connection_url(token)?;
        self.disconnect();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let manual_close = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_connection(
            url,
            self.policy,
            self.table.clone(),
            outbound_rx,
            shutdown.clone(),
            manual_close.clone(),
            self.state.clone(),
        ));

        *self.connection.lock() = Some(Connection {
            outbound,
            shutdown,
            manual_close,
            task,
        });
        Ok(())
    }

    /// Close the socket without reconnecting.
    pub fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        connection.manual_close.store(true, Ordering::SeqCst);
        connection.shutdown.notify_one();
        // The task exits on its own after sending a close frame; detach it.
        drop(connection.task);
        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("WsClient: disconnected");
    }

    /// Send `{event, data}`. Frames sent while not connected are dropped.
    pub fn send(&self, event: &str, data: Value) -> Result<(), ApiError> {
        if !self.is_connected() {
            log::warn!("WsClient: not connected, dropping outbound {}", event);
            return Err(ApiError::NotConnected);
        }
        let frame = serde_json::json!({ "event": event, "data": data }).to_string();
        let guard = self.connection.lock();
        let connection = guard.as_ref().ok_or(ApiError::NotConnected)?;
        connection
            .outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| ApiError::NotConnected)
    }

    pub fn on(&self, event: &str, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.table
            .handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        Subscription {
            event: event.to_string(),
            id,
        }
    }

    pub fn off(&self, subscription: &Subscription) {
        let mut handlers = self.table.handlers.write();
        if let Some(list) = handlers.get_mut(&subscription.event) {
            list.retain(|(id, _)| *id != subscription.id);
            if list.is_empty() {
                handlers.remove(&subscription.event);
            }
        }
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.table
            .handlers
            .read()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Feed a raw frame through the dispatch table as if it came off the wire.
    pub fn dispatch_frame(&self, text: &str) {
        self.table.dispatch(text);
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

enum SessionEnd {
    Manual,
    Lost,
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    table: Arc<HandlerTable>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: Arc<Notify>,
    manual_close: Arc<AtomicBool>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let mut attempt: u32 = 0;

    loop {
        if manual_close.load(Ordering::SeqCst) {
            break;
        }
        if attempt == 0 {
            state.send_replace(ConnectionState::Connecting);
        }

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                if manual_close.load(Ordering::SeqCst) {
                    break;
                }
                log::info!("WsClient: connected");
                attempt = 0;
                state.send_replace(ConnectionState::Connected);
                match run_session(stream, &table, &mut outbound, &shutdown).await {
                    SessionEnd::Manual => break,
                    SessionEnd::Lost => log::warn!("WsClient: connection lost"),
                }
            }
            Err(e) => log::warn!("WsClient: connect failed: {}", e),
        }

        if manual_close.load(Ordering::SeqCst) {
            break;
        }

        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            log::warn!(
                "WsClient: giving up after {} reconnect attempts",
                policy.max_attempts
            );
            state.send_replace(ConnectionState::Disconnected);
            break;
        };
        state.send_replace(ConnectionState::Reconnecting { attempt });
        log::info!("WsClient: reconnect attempt {} in {:?}", attempt, delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.notified() => break,
        }
    }
}

async fn run_session<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    table: &HandlerTable,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    shutdown: &Notify,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return SessionEnd::Manual;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return SessionEnd::Manual;
                };
                if let Err(e) = ws_tx.send(frame).await {
                    log::warn!("WsClient: send failed: {}", e);
                    return SessionEnd::Lost;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => table.dispatch(text.as_str()),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WsClient: read error: {}", e);
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }
}
