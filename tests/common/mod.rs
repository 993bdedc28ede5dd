// Shared test helpers
#![allow(dead_code)]

use chrono::DateTime;
use homedash_stats::channel::{ChannelError, ChannelEvent, EVENT_CHANNEL_CAPACITY, StatsChannel};
use homedash_stats::models::Sample;
use homedash_stats::playback::QueueSettings;
use homedash_stats::store::StoreConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn sample(secs: i64, cpu_percent: f64) -> Sample {
    Sample::new(
        DateTime::from_timestamp(secs, 0).unwrap(),
        cpu_percent,
        30.0,
    )
}

pub fn store_config(tween_factor: f64, max_history: usize) -> StoreConfig {
    StoreConfig {
        max_history,
        tween_factor,
        jitter_fraction: 0.02,
        queue: QueueSettings {
            default_interval: Duration::from_millis(250),
            default_total_duration: Duration::from_millis(1000),
            max_len: 50,
        },
        broadcast_capacity: 64,
    }
}

/// In-memory channel: counts lifecycle calls and lets tests inject events.
#[derive(Clone, Default)]
pub struct MockChannel {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub sender: Arc<Mutex<Option<mpsc::Sender<ChannelEvent>>>>,
    pub intervals: Arc<Mutex<Vec<u32>>>,
}

impl MockChannel {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Queue an event on the current subscription.
    pub fn push(&self, event: ChannelEvent) {
        let guard = self.sender.lock().unwrap();
        guard
            .as_ref()
            .expect("no open subscription")
            .try_send(event)
            .expect("event queue full");
    }

    /// End the current subscription's event stream.
    pub fn hang_up(&self) {
        self.sender.lock().unwrap().take();
    }
}

impl StatsChannel for MockChannel {
    fn open(&mut self) -> mpsc::Receiver<ChannelEvent> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.sender.lock().unwrap() = Some(tx);
        rx
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }

    fn set_update_interval(&mut self, seconds: u32) -> Result<(), ChannelError> {
        if seconds == 0 {
            return Err(ChannelError::InvalidInterval(seconds));
        }
        if self.sender.lock().unwrap().is_none() {
            return Err(ChannelError::NotConnected);
        }
        self.intervals.lock().unwrap().push(seconds);
        Ok(())
    }
}
