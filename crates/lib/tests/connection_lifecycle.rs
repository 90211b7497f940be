//! Integration tests: run a fake agent service (axum WebSocket) on a free port and drive a
//! real ConnectionManager against it.

use agentchat::connection::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState,
    EventKind, ReconnectPolicy, SendError, Subscription,
};
use agentchat::protocol::{InboundEnvelope, OutgoingRequest};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tokio::sync::mpsc;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("ws://127.0.0.1:{}/ws/agent", port)
}

fn policy(base_ms: u64, max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(base_ms),
        max_delay: Duration::from_millis(base_ms * 8),
        max_attempts,
    }
}

/// Forward every lifecycle event into a channel.
fn record(manager: &ConnectionManager) -> (Vec<Subscription>, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subs = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            manager.on(kind, move |event| {
                let _ = tx.send(event.clone());
            })
        })
        .collect();
    (subs, rx)
}

fn record_messages(manager: &ConnectionManager) -> (Subscription, mpsc::UnboundedReceiver<InboundEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = manager.on_message(move |envelope| {
        let _ = tx.send(envelope.clone());
    });
    (sub, rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>, kind: EventKind) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next(rx).await;
        let done = event.kind() == kind;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn echo_agent(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            let Message::Text(text) = msg else { continue };
            let Ok(req) = serde_json::from_str::<OutgoingRequest>(&text) else {
                continue;
            };
            let reply = serde_json::json!({
                "query_id": req.query_id,
                "chat_message": { "from": "agent", "text": format!("echo: {}", req.query) },
            });
            if socket.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
    })
}

async fn hang_up(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Close(None)).await;
    })
}

async fn garbled_then_valid(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text("not json at all".to_string())).await;
        let valid = r#"{"query_id":"push-1","chat_message":{"from":"agent","text":"hello"}}"#;
        let _ = socket.send(Message::Text(valid.to_string())).await;
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

#[tokio::test]
async fn open_send_and_receive_reply() {
    let url = serve(Router::new().route("/ws/agent", get(echo_agent))).await;
    let manager = ConnectionManager::new(ConnectionConfig::new(url).with_policy(policy(50, 5)));
    let (_subs, mut events) = record(&manager);
    let (_msg_sub, mut messages) = record_messages(&manager);

    manager.connect();
    let seen = wait_for(&mut events, EventKind::Open).await;
    assert_eq!(seen, vec![ConnectionEvent::Connecting, ConnectionEvent::Open]);
    assert_eq!(manager.state(), ConnectionState::Open);

    // Second connect while open is a no-op.
    manager.connect();

    let request = OutgoingRequest {
        query: "ping".into(),
        query_id: "q-1".into(),
        selected_tools: vec![],
    };
    manager.send(&request).expect("send while open");
    let reply = next(&mut messages).await;
    assert_eq!(reply.query_id.as_deref(), Some("q-1"));
    assert_eq!(
        reply.chat_message.and_then(|m| m.text).as_deref(),
        Some("echo: ping")
    );

    manager.close();
    let seen = wait_for(&mut events, EventKind::Close).await;
    assert!(
        !seen.iter().any(|e| matches!(e, ConnectionEvent::Connecting)),
        "connect() while open must not reconnect: {:?}",
        seen
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err(), "intentional close must not schedule a reconnect");
    assert_eq!(manager.state(), ConnectionState::Closed);
    manager.shutdown();
}

#[tokio::test]
async fn send_before_open_is_reported() {
    let manager = ConnectionManager::new(ConnectionConfig::new(format!(
        "ws://127.0.0.1:{}/ws/agent",
        free_port()
    )));
    let request = OutgoingRequest {
        query: "too early".into(),
        query_id: "q".into(),
        selected_tools: vec![],
    };
    assert_eq!(
        manager.send(&request),
        Err(SendError::NotOpen(ConnectionState::Idle))
    );
    manager.shutdown();
}

#[tokio::test]
async fn decode_error_keeps_connection_and_later_messages() {
    let url = serve(Router::new().route("/ws/agent", get(garbled_then_valid))).await;
    let manager = ConnectionManager::new(ConnectionConfig::new(url));
    let (_subs, mut events) = record(&manager);
    let (_msg_sub, mut messages) = record_messages(&manager);

    manager.connect();
    wait_for(&mut events, EventKind::Open).await;
    let seen = wait_for(&mut events, EventKind::Error).await;
    assert!(matches!(
        seen.last(),
        Some(ConnectionEvent::Error(ConnectionError::Decode(_)))
    ));

    let envelope = next(&mut messages).await;
    assert_eq!(envelope.query_id.as_deref(), Some("push-1"));
    assert_eq!(manager.state(), ConnectionState::Open);
    manager.shutdown();
}

#[tokio::test]
async fn server_hang_up_reconnects_and_resets_backoff() {
    let url = serve(Router::new().route("/ws/agent", get(hang_up))).await;
    let manager = ConnectionManager::new(ConnectionConfig::new(url).with_policy(policy(20, 10)));
    let (_subs, mut events) = record(&manager);

    manager.connect();
    for _ in 0..2 {
        wait_for(&mut events, EventKind::Open).await;
        let seen = wait_for(&mut events, EventKind::Reconnecting).await;
        // The socket had opened, so the counter restarted and the delay is the base delay.
        assert_eq!(
            seen.last(),
            Some(&ConnectionEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(20),
            })
        );
    }
    manager.shutdown();
}

#[tokio::test]
async fn unreachable_server_gives_up_after_max_attempts() {
    let url = format!("ws://127.0.0.1:{}/ws/agent", free_port());
    let manager = ConnectionManager::new(ConnectionConfig::new(url).with_policy(policy(10, 3)));
    let (_subs, mut events) = record(&manager);

    manager.connect();
    let seen = wait_for(&mut events, EventKind::Disconnected).await;
    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Reconnecting { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![Duration::from_millis(10), Duration::from_millis(20)]);
    assert!(seen.iter().any(|e| matches!(e, ConnectionEvent::Error(ConnectionError::Transport(_)))));
    let n = seen.len();
    assert_eq!(
        seen[n - 2],
        ConnectionEvent::Error(ConnectionError::MaxAttemptsReached { attempts: 3 })
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // Terminal: nothing else is scheduled.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());

    // An explicit connect starts over with a fresh budget.
    manager.connect();
    let seen = wait_for(&mut events, EventKind::Reconnecting).await;
    assert_eq!(seen[0], ConnectionEvent::Connecting);
    assert!(matches!(
        seen.last(),
        Some(ConnectionEvent::Reconnecting { attempt: 1, .. })
    ));
    manager.shutdown();
}

#[tokio::test]
async fn dropping_subscriptions_unregisters_handlers() {
    let manager = ConnectionManager::new(ConnectionConfig::new(format!(
        "ws://127.0.0.1:{}/ws/agent",
        free_port()
    )));
    let (subs, _events) = record(&manager);
    let (msg_sub, _messages) = record_messages(&manager);
    for kind in EventKind::ALL {
        assert_eq!(manager.handler_count(kind), 1);
    }
    assert_eq!(manager.message_handler_count(), 1);

    drop(subs);
    msg_sub.unsubscribe();
    for kind in EventKind::ALL {
        assert_eq!(manager.handler_count(kind), 0);
    }
    assert_eq!(manager.message_handler_count(), 0);
    manager.shutdown();
}
