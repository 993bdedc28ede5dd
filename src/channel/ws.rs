// WebSocket channel to the home server's stats stream

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ChannelError, ChannelEvent, EVENT_CHANNEL_CAPACITY, StatsChannel};
use crate::protocol::{ControlMessage, StreamMessage};

const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROL_CHANNEL_CAPACITY: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsChannelConfig {
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed connection attempts before giving up; 0 retries forever.
    pub max_retries: u32,
}

/// Stats stream over WebSocket. Each `open` spawns one connection task that
/// reconnects with exponential backoff; `close` (or drop) aborts it.
pub struct WsChannel {
    config: WsChannelConfig,
    task: Option<JoinHandle<()>>,
    control_tx: Option<mpsc::Sender<ControlMessage>>,
}

impl WsChannel {
    pub fn new(config: WsChannelConfig) -> Self {
        Self {
            config,
            task: None,
            control_tx: None,
        }
    }
}

impl StatsChannel for WsChannel {
    /// Must be called from within a tokio runtime.
    fn open(&mut self) -> mpsc::Receiver<ChannelEvent> {
        self.close();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        self.task = Some(tokio::spawn(run_connection(
            self.config.clone(),
            events_tx,
            control_rx,
        )));
        self.control_tx = Some(control_tx);
        events_rx
    }

    fn close(&mut self) {
        self.control_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(url = %self.config.url, "stats stream closed");
        }
    }

    fn set_update_interval(&mut self, seconds: u32) -> Result<(), ChannelError> {
        if seconds == 0 {
            return Err(ChannelError::InvalidInterval(seconds));
        }
        let tx = self.control_tx.as_ref().ok_or(ChannelError::NotConnected)?;
        tx.try_send(ControlMessage::SetUpdateInterval {
            interval_seconds: seconds,
        })
        .map_err(|_| ChannelError::Closed)
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.close();
    }
}

enum StreamEnd {
    /// Store dropped its receiver or the channel was closed; stop for good.
    Detached,
    /// Connection failed mid-session; reconnect.
    Lost(String),
}

async fn run_connection(
    config: WsChannelConfig,
    events: mpsc::Sender<ChannelEvent>,
    mut control_rx: mpsc::Receiver<ControlMessage>,
) {
    let mut failures: u32 = 0;
    let mut backoff = config.initial_backoff;
    // Replayed after every reconnect so the server keeps the requested cadence.
    let mut requested_interval: Option<u32> = None;

    loop {
        match connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                failures = 0;
                backoff = config.initial_backoff;
                tracing::info!(url = %config.url, "Connected to stats stream");
                if events.send(ChannelEvent::Open).await.is_err() {
                    return;
                }
                match stream_messages(socket, &events, &mut control_rx, &mut requested_interval)
                    .await
                {
                    StreamEnd::Detached => return,
                    StreamEnd::Lost(reason) => {
                        tracing::warn!(
                            url = %config.url,
                            error = %reason,
                            operation = "stream_messages",
                            "stats stream lost"
                        );
                        if events.send(ChannelEvent::Error(reason)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    url = %config.url,
                    error = %e,
                    attempt = failures,
                    operation = "connect",
                    "stats stream connect failed"
                );
                let message = format!("connect to {} failed: {}", config.url, e);
                if events.send(ChannelEvent::Error(message)).await.is_err() {
                    return;
                }
                if config.max_retries > 0 && failures >= config.max_retries {
                    tracing::warn!(
                        url = %config.url,
                        attempts = failures,
                        "giving up on stats stream"
                    );
                    return;
                }
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_backoff);
        if events
            .send(ChannelEvent::Reconnecting {
                attempt: failures + 1,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn stream_messages(
    mut socket: WsStream,
    events: &mpsc::Sender<ChannelEvent>,
    control_rx: &mut mpsc::Receiver<ControlMessage>,
    requested_interval: &mut Option<u32>,
) -> StreamEnd {
    if let Some(seconds) = *requested_interval {
        let replay = ControlMessage::SetUpdateInterval {
            interval_seconds: seconds,
        };
        if let Err(reason) = send_control(&mut socket, &replay).await {
            return StreamEnd::Lost(reason);
        }
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = socket.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => match StreamMessage::parse(text.as_str()) {
                        Ok(StreamMessage::Ignored { kind }) => {
                            tracing::debug!(kind = %kind, "ignoring stream frame");
                            continue;
                        }
                        Ok(message) => ChannelEvent::Message(message),
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "parse_frame", "rejected stream frame");
                            ChannelEvent::Rejected(e.to_string())
                        }
                    },
                    Some(Ok(Message::Close(_))) => {
                        return StreamEnd::Lost("closed by server".to_string());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return StreamEnd::Lost(e.to_string()),
                    None => return StreamEnd::Lost("stream ended".to_string()),
                };
                if events.send(event).await.is_err() {
                    return StreamEnd::Detached;
                }
            }
            command = control_rx.recv() => {
                let Some(command) = command else {
                    return StreamEnd::Detached;
                };
                let ControlMessage::SetUpdateInterval { interval_seconds } = command;
                *requested_interval = Some(interval_seconds);
                if let Err(reason) = send_control(&mut socket, &command).await {
                    return StreamEnd::Lost(reason);
                }
                tracing::debug!(interval_seconds, "requested update interval");
            }
            _ = ping_interval.tick() => {
                match timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return StreamEnd::Lost(format!("ping failed: {}", e)),
                    Err(_) => return StreamEnd::Lost("ping timed out".to_string()),
                }
            }
        }
    }
}

async fn send_control(socket: &mut WsStream, command: &ControlMessage) -> Result<(), String> {
    let json = command.to_json().map_err(|e| e.to_string())?;
    match timeout(WS_SEND_TIMEOUT, socket.send(Message::text(json))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("send timed out".to_string()),
    }
}
