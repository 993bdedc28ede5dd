// Stats store: connection lifecycle, current sample and bounded history.
// Owns the playback queue and is its only writer; consumers read via selectors
// or subscribe to updates.

use std::collections::VecDeque;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::channel::{ChannelError, ChannelEvent, StatsChannel};
use crate::models::{Batch, Sample};
use crate::playback::{PlaybackQueue, QueueSettings, Tick};
use crate::protocol::{PlaybackDefaults, StreamMessage};
use crate::smoothing::{interpolate, tween};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Change notifications for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    ConnectionChanged(ConnectionState),
    Sample(Sample),
    HistoryCleared,
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub max_history: usize,
    /// Blend weight toward each new sample, in (0, 1].
    pub tween_factor: f64,
    /// Max relative move per synthesized sample.
    pub jitter_fraction: f64,
    pub queue: QueueSettings,
    pub broadcast_capacity: usize,
}

impl StoreConfig {
    fn playback_defaults(&self) -> PlaybackDefaults {
        PlaybackDefaults {
            total_duration: self.queue.default_total_duration,
            interval: self.queue.default_interval,
        }
    }
}

pub struct StatsStore<C: StatsChannel> {
    config: StoreConfig,
    channel: C,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    queue: PlaybackQueue,
    connection_state: ConnectionState,
    current_sample: Option<Sample>,
    history: VecDeque<Sample>,
    last_real_sample: Option<Sample>,
    error: Option<String>,
    tween_factor: f64,
    updates: broadcast::Sender<StoreUpdate>,
    rng: StdRng,
}

impl<C: StatsChannel> StatsStore<C> {
    pub fn new(config: StoreConfig, channel: C) -> Self {
        let (updates, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            config,
            channel,
            events: None,
            queue: PlaybackQueue::new(config.queue),
            connection_state: ConnectionState::Disconnected,
            current_sample: None,
            history: VecDeque::with_capacity(config.max_history),
            last_real_sample: None,
            error: None,
            tween_factor: config.tween_factor,
            updates,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the interpolation RNG (seeded RNGs make synthesized samples reproducible).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Receive store updates. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    /// Open the channel subscription. No-op while connecting or connected.
    pub fn connect(&mut self) {
        if self.connection_state != ConnectionState::Disconnected {
            tracing::debug!(state = ?self.connection_state, "connect ignored; already active");
            return;
        }
        if self.events.take().is_some() {
            // Left over from a channel-level error; never run two subscriptions.
            self.channel.close();
        }
        self.set_connection_state(ConnectionState::Connecting);
        self.events = Some(self.channel.open());
    }

    /// Close the subscription and stop playback. History and the current sample are kept.
    pub fn disconnect(&mut self) {
        self.events = None;
        self.channel.close();
        self.queue.stop();
        self.set_connection_state(ConnectionState::Disconnected);
    }

    pub fn set_update_interval(&mut self, seconds: u32) -> Result<(), ChannelError> {
        self.channel.set_update_interval(seconds)?;
        tracing::info!(interval_seconds = seconds, "requested server update interval");
        Ok(())
    }

    pub fn handle_event(&mut self, event: ChannelEvent, now: Instant) {
        match event {
            ChannelEvent::Open => {
                self.error = None;
                self.set_connection_state(ConnectionState::Connected);
            }
            ChannelEvent::Message(StreamMessage::Sample(sample)) => {
                self.on_sample_received(sample, now);
            }
            ChannelEvent::Message(StreamMessage::Batch(message)) => {
                let batch = message.into_batch(&self.config.playback_defaults());
                self.on_batch_received(batch, now);
            }
            ChannelEvent::Message(StreamMessage::Ignored { .. }) => {}
            ChannelEvent::Rejected(reason) => self.record_error(reason),
            ChannelEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "stats stream reconnecting");
                if self.connection_state == ConnectionState::Disconnected {
                    self.set_connection_state(ConnectionState::Connecting);
                }
            }
            ChannelEvent::Error(reason) => {
                self.record_error(reason);
                // Keep showing the last real data, but stop animating it.
                self.queue.stop();
                self.set_connection_state(ConnectionState::Disconnected);
            }
        }
    }

    pub fn on_batch_received(&mut self, batch: Batch, now: Instant) {
        let Batch {
            samples,
            total_duration,
            interval,
            smooth_tweening,
        } = batch;
        let newest = samples.last().cloned();
        if self
            .queue
            .load_batch(samples, total_duration, interval, now)
        {
            self.tween_factor = if smooth_tweening {
                self.config.tween_factor
            } else {
                1.0
            };
            self.last_real_sample = newest;
        }
    }

    pub fn on_sample_received(&mut self, sample: Sample, now: Instant) {
        self.tween_factor = self.config.tween_factor;
        self.last_real_sample = Some(sample.clone());
        self.queue.append(vec![sample], now);
    }

    /// Smooth `sample` against the displayed one, then record and publish it.
    pub fn on_queue_tick(&mut self, sample: Sample) {
        let shown = match &self.current_sample {
            Some(current) => tween(&sample, current, self.tween_factor),
            None => sample,
        };
        if self.config.max_history > 0 {
            self.history.push_back(shown.clone());
            while self.history.len() > self.config.max_history {
                self.history.pop_front();
            }
        }
        self.current_sample = Some(shown.clone());
        let _ = self.updates.send(StoreUpdate::Sample(shown));
    }

    /// Timer callback: runs at most one playback step if the queue is due.
    pub fn on_timer(&mut self, now: Instant) {
        let Some(tick) = self.queue.fire_due(now) else {
            return;
        };
        match tick {
            Tick::Surfaced(sample) => self.on_queue_tick(sample),
            Tick::Starved => {
                if self.last_real_sample.is_none() {
                    return;
                }
                let Some(base) = self
                    .current_sample
                    .as_ref()
                    .or(self.last_real_sample.as_ref())
                else {
                    return;
                };
                let synthesized =
                    interpolate(base, self.config.jitter_fraction, Utc::now(), &mut self.rng);
                self.on_queue_tick(synthesized);
            }
            Tick::Finished => tracing::debug!("batch playback finished"),
            Tick::Stalled | Tick::Idle => {}
        }
    }

    /// Empty the history; connection state and the current sample are untouched.
    pub fn clear_history(&mut self) {
        self.history.clear();
        let _ = self.updates.send(StoreUpdate::HistoryCleared);
    }

    /// Drive the store until `shutdown_rx` fires: channel events, playback
    /// deadlines, and shutdown are serviced one at a time.
    pub async fn run(&mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        loop {
            let deadline = self.queue.next_deadline();
            tokio::select! {
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event, Instant::now()),
                    None => self.on_channel_closed(),
                },
                _ = sleep_until(deadline) => self.on_timer(Instant::now()),
                _ = &mut shutdown_rx => {
                    tracing::debug!("Stats store shutting down");
                    break;
                }
            }
        }
    }

    /// Tear the store down: disconnect and drop all held samples.
    pub fn dispose(mut self) {
        self.disconnect();
        self.history.clear();
        self.current_sample = None;
        self.last_real_sample = None;
    }

    fn on_channel_closed(&mut self) {
        self.events = None;
        self.queue.stop();
        self.set_connection_state(ConnectionState::Disconnected);
    }

    fn record_error(&mut self, reason: String) {
        tracing::warn!(error = %reason, "stats channel error");
        self.error = Some(reason.clone());
        let _ = self.updates.send(StoreUpdate::Error(reason));
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if self.connection_state == state {
            return;
        }
        tracing::info!(from = ?self.connection_state, to = ?state, "connection state changed");
        self.connection_state = state;
        let _ = self.updates.send(StoreUpdate::ConnectionChanged(state));
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn current_sample(&self) -> Option<&Sample> {
        self.current_sample.as_ref()
    }

    /// Oldest first.
    pub fn history(&self) -> &VecDeque<Sample> {
        &self.history
    }

    pub fn last_real_sample(&self) -> Option<&Sample> {
        self.last_real_sample.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Samples waiting in the playback queue.
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.queue.is_playing()
    }

    /// Elapsed share (0–100) of the batch being played.
    pub fn playback_progress(&self) -> f64 {
        self.queue.playback_progress(Instant::now())
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
