// WebSocket channel against an in-process axum server standing in for the home server

mod common;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use homedash_stats::channel::{ChannelEvent, StatsChannel, WsChannel, WsChannelConfig};
use homedash_stats::protocol::StreamMessage;
use homedash_stats::store::{ConnectionState, StatsStore, StoreUpdate};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, timeout};

const WAIT: Duration = Duration::from_secs(5);

const BATCH_FRAME: &str = r#"{
    "batch": [
        {"timestamp": 1700000000000, "cpu_percent": 10.0, "memory_percent": 40.0},
        {"timestamp": 1700000000500, "cpu_percent": 12.0, "memory_percent": 41.0}
    ],
    "batch_size": 2,
    "timespan_seconds": 1,
    "playback_info": {"totalDuration": 400, "updateInterval": 100, "smoothTweening": false}
}"#;

async fn stats_ws(
    ws: WebSocketUpgrade,
    State(received_tx): State<mpsc::Sender<String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_stats(socket, received_tx))
}

async fn serve_stats(mut socket: WebSocket, received_tx: mpsc::Sender<String>) {
    let welcome = r#"{"type":"info","systemInfo":{}}"#.to_string();
    for frame in [welcome, BATCH_FRAME.to_string(), "not json".to_string()] {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            let _ = received_tx.send(text.as_str().to_string()).await;
        }
    }
}

async fn start_server() -> (SocketAddr, mpsc::Receiver<String>) {
    let (received_tx, received_rx) = mpsc::channel(8);
    let app = Router::new()
        .route("/ws/stats", get(stats_ws))
        .with_state(received_tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, received_rx)
}

#[derive(Clone)]
struct HangUpState {
    connections: Arc<AtomicUsize>,
    received_tx: mpsc::Sender<(usize, String)>,
}

async fn hang_up_ws(ws: WebSocketUpgrade, State(state): State<HangUpState>) -> impl IntoResponse {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    ws.on_upgrade(move |socket| record_control(socket, connection, state.received_tx))
}

/// Records control frames per connection; the first connection hangs up after one.
async fn record_control(
    mut socket: WebSocket,
    connection: usize,
    received_tx: mpsc::Sender<(usize, String)>,
) {
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            let _ = received_tx.send((connection, text.as_str().to_string())).await;
            if connection == 1 {
                return;
            }
        }
    }
}

async fn start_hang_up_server() -> (SocketAddr, mpsc::Receiver<(usize, String)>) {
    let (received_tx, received_rx) = mpsc::channel(8);
    let state = HangUpState {
        connections: Arc::new(AtomicUsize::new(0)),
        received_tx,
    };
    let app = Router::new()
        .route("/ws/stats", get(hang_up_ws))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, received_rx)
}

fn channel_config(url: String, max_retries: u32) -> WsChannelConfig {
    WsChannelConfig {
        url,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        max_retries,
    }
}

async fn next_event(events: &mut mpsc::Receiver<ChannelEvent>) -> Option<ChannelEvent> {
    timeout(WAIT, events.recv()).await.expect("timed out waiting for event")
}

#[tokio::test]
async fn test_ws_channel_receives_batch_and_forwards_control() {
    let (addr, mut received_rx) = start_server().await;
    let mut channel = WsChannel::new(channel_config(format!("ws://{}/ws/stats", addr), 3));
    let mut events = channel.open();

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Open));
    match next_event(&mut events).await {
        Some(ChannelEvent::Message(StreamMessage::Batch(batch))) => {
            assert_eq!(batch.batch.len(), 2);
            assert_eq!(batch.batch[1].cpu_percent, 12.0);
        }
        other => panic!("expected batch, got {:?}", other),
    }
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Rejected(_))
    ));

    channel.set_update_interval(5).unwrap();
    let control = timeout(WAIT, received_rx.recv()).await.unwrap().unwrap();
    assert_eq!(control, r#"{"type":"set_update_interval","interval":5}"#);

    channel.close();
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_ws_channel_replays_update_interval_after_reconnect() {
    let (addr, mut received_rx) = start_hang_up_server().await;
    let mut channel = WsChannel::new(channel_config(format!("ws://{}/ws/stats", addr), 3));
    let mut events = channel.open();
    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Open));

    channel.set_update_interval(5).unwrap();
    let expected = r#"{"type":"set_update_interval","interval":5}"#.to_string();
    let first = timeout(WAIT, received_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, (1, expected.clone()));

    // Server hung up; the channel reports it and reconnects on its own.
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Error(_))
    ));
    assert_eq!(
        next_event(&mut events).await,
        Some(ChannelEvent::Reconnecting { attempt: 1 })
    );
    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Open));

    let replayed = timeout(WAIT, received_rx.recv()).await.unwrap().unwrap();
    assert_eq!(replayed, (2, expected));

    channel.close();
}

#[tokio::test]
async fn test_ws_channel_gives_up_after_max_retries() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut channel = WsChannel::new(channel_config(format!("ws://{}/ws/stats", addr), 2));
    let mut events = channel.open();

    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Error(_))
    ));
    assert_eq!(
        next_event(&mut events).await,
        Some(ChannelEvent::Reconnecting { attempt: 2 })
    );
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Error(_))
    ));
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_ws_channel_rejects_control_before_open() {
    let mut channel = WsChannel::new(channel_config("ws://127.0.0.1:1/ws/stats".into(), 1));
    assert_eq!(
        channel.set_update_interval(5),
        Err(homedash_stats::channel::ChannelError::NotConnected)
    );
}

#[tokio::test]
async fn test_store_plays_server_batch_end_to_end() {
    let (addr, _received_rx) = start_server().await;
    let channel = WsChannel::new(channel_config(format!("ws://{}/ws/stats", addr), 3));
    let mut store = StatsStore::new(common::store_config(0.5, 50), channel);
    let mut updates = store.subscribe();
    store.connect();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        store.run(shutdown_rx).await;
        store
    });

    let mut samples = Vec::new();
    while samples.len() < 2 {
        match timeout(WAIT, updates.recv()).await.expect("timed out") {
            Ok(StoreUpdate::Sample(sample)) => samples.push(sample.cpu_percent),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("store closed"),
        }
    }
    let _ = shutdown_tx.send(());
    let store = handle.await.unwrap();

    // smoothTweening=false: shown verbatim.
    assert_eq!(samples, vec![10.0, 12.0]);
    assert_eq!(store.connection_state(), ConnectionState::Connected);
    assert!(store.error().is_some());
    store.dispose();
}
