use std::sync::Arc;
use std::time::Duration;

use crmdesk_lib::api::{ConnectionState, ReconnectPolicy, WsClient};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(3);

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(50),
    }
}

/// Accept one socket and report the request URI it was opened with.
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut uri = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            uri = request.uri().to_string();
            Ok(response)
        },
    )
    .await
    .unwrap();
    (ws, uri)
}

async fn wait_for_state(client: &WsClient, wanted: impl Fn(&ConnectionState) -> bool) {
    let mut rx = client.watch_state();
    timeout(WAIT, rx.wait_for(|state| wanted(state)))
        .await
        .expect("state change timed out")
        .unwrap();
}

async fn send_event(ws: &mut WebSocketStream<TcpStream>, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    ws.send(Message::Text(frame.into())).await.unwrap();
}

#[tokio::test]
async fn test_token_sent_and_malformed_frames_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = WsClient::new(&format!("ws://{}/ws", listener.local_addr().unwrap()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on(
        "contact:created",
        Arc::new(move |data: &Value| {
            let _ = tx.send(data.clone());
        }),
    );

    client.connect("secret-token").unwrap();
    let (mut ws, uri) = accept(&listener).await;
    assert_eq!(uri, "/ws?token=secret-token");
    wait_for_state(&client, |s| *s == ConnectionState::Connected).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(json!({"data": {"id": "x"}}).to_string().into()))
        .await
        .unwrap();
    send_event(&mut ws, "contact:created", json!({"id": "c1"})).await;

    let data = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(data, json!({"id": "c1"}));
    assert!(rx.try_recv().is_err());
    assert!(client.is_connected());

    client.disconnect();
}

#[tokio::test]
async fn test_outbound_frames_reach_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = WsClient::new(&format!("ws://{}/ws", listener.local_addr().unwrap()));

    client.connect("t").unwrap();
    let (mut ws, _) = accept(&listener).await;
    wait_for_state(&client, |s| *s == ConnectionState::Connected).await;

    client
        .send("message:typing", json!({"conversationId": "conv1"}))
        .unwrap();

    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame, got {:?}", frame);
    };
    let parsed: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(
        parsed,
        json!({"event": "message:typing", "data": {"conversationId": "conv1"}})
    );

    client.disconnect();
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = WsClient::with_policy(
        &format!("ws://{}/ws", listener.local_addr().unwrap()),
        fast_policy(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on(
        "deal:updated",
        Arc::new(move |data: &Value| {
            let _ = tx.send(data.clone());
        }),
    );

    client.connect("t").unwrap();
    let (mut first, _) = accept(&listener).await;
    wait_for_state(&client, |s| *s == ConnectionState::Connected).await;
    first.close(None).await.unwrap();

    let (mut second, uri) = timeout(WAIT, accept(&listener)).await.unwrap();
    assert_eq!(uri, "/ws?token=t");
    wait_for_state(&client, |s| *s == ConnectionState::Connected).await;

    // Handlers survive the reconnect
    send_event(&mut second, "deal:updated", json!({"id": "d1"})).await;
    assert_eq!(
        timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
        json!({"id": "d1"})
    );

    client.disconnect();
}

#[tokio::test]
async fn test_manual_disconnect_never_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = WsClient::with_policy(
        &format!("ws://{}/ws", listener.local_addr().unwrap()),
        fast_policy(),
    );

    client.connect("t").unwrap();
    let (_ws, _) = accept(&listener).await;
    wait_for_state(&client, |s| *s == ConnectionState::Connected).await;

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(timeout(Duration::from_millis(500), listener.accept())
        .await
        .is_err());
    assert!(client.send("ping", Value::Null).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_five_reconnects_with_doubling_delays() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut accepted) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            // Dropping the stream fails the handshake, which counts as a failed attempt.
            let (stream, _) = listener.accept().await.unwrap();
            let _ = tx.send(Instant::now());
            drop(stream);
        }
    });

    let client = WsClient::with_policy(&format!("ws://{}/ws", addr), ReconnectPolicy::default());
    client.connect("t").unwrap();

    // The initial connect plus five reconnects
    let mut times = Vec::new();
    for _ in 0..6 {
        times.push(accepted.recv().await.unwrap());
    }
    // Untimed: a pending timer would jump the paused clock past socket IO.
    client
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();

    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, secs) in gaps.iter().zip([1, 2, 4, 8, 16]) {
        let expected = Duration::from_secs(secs);
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(50),
            "gaps {:?}",
            gaps
        );
    }

    // No sixth reconnect
    assert!(timeout(Duration::from_secs(120), accepted.recv()).await.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
