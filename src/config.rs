use serde::Deserialize;
use std::time::Duration;

use crate::channel::WsChannelConfig;
use crate::playback::QueueSettings;
use crate::store::StoreConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
    pub history: HistoryConfig,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// ws:// or wss:// URL of the server's stats stream.
    pub url: String,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failed connects before giving up; 0 retries forever.
    #[serde(default)]
    pub max_retries: u32,
    /// Sampling cadence to request from the server once subscribed.
    #[serde(default)]
    pub update_interval_secs: Option<u32>,
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    pub interval_ms: u64,
    pub total_duration_ms: u64,
    pub max_queue_len: usize,
    #[serde(default = "default_tween_factor")]
    pub tween_factor: f64,
}

fn default_tween_factor() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    pub max_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterpolationConfig {
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

fn default_jitter_fraction() -> f64 {
    0.02
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Store updates buffered per subscriber (slow subscribers may lag).
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.stream.url.starts_with("ws://") || self.stream.url.starts_with("wss://"),
            "stream.url must start with ws:// or wss://, got {:?}",
            self.stream.url
        );
        anyhow::ensure!(
            self.stream.initial_backoff_ms > 0,
            "stream.initial_backoff_ms must be > 0, got {}",
            self.stream.initial_backoff_ms
        );
        anyhow::ensure!(
            self.stream.max_backoff_ms >= self.stream.initial_backoff_ms,
            "stream.max_backoff_ms must be >= initial_backoff_ms, got {}",
            self.stream.max_backoff_ms
        );
        if let Some(secs) = self.stream.update_interval_secs {
            anyhow::ensure!(
                secs > 0,
                "stream.update_interval_secs must be > 0, got {}",
                secs
            );
        }
        anyhow::ensure!(
            self.playback.interval_ms > 0,
            "playback.interval_ms must be > 0, got {}",
            self.playback.interval_ms
        );
        anyhow::ensure!(
            self.playback.total_duration_ms > 0,
            "playback.total_duration_ms must be > 0, got {}",
            self.playback.total_duration_ms
        );
        anyhow::ensure!(
            self.playback.max_queue_len > 0,
            "playback.max_queue_len must be > 0, got {}",
            self.playback.max_queue_len
        );
        anyhow::ensure!(
            self.playback.tween_factor > 0.0 && self.playback.tween_factor <= 1.0,
            "playback.tween_factor must be in (0, 1], got {}",
            self.playback.tween_factor
        );
        anyhow::ensure!(
            self.history.max_size > 0,
            "history.max_size must be > 0, got {}",
            self.history.max_size
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.interpolation.jitter_fraction),
            "interpolation.jitter_fraction must be in [0, 1], got {}",
            self.interpolation.jitter_fraction
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_history: self.history.max_size,
            tween_factor: self.playback.tween_factor,
            jitter_fraction: self.interpolation.jitter_fraction,
            queue: QueueSettings {
                default_interval: Duration::from_millis(self.playback.interval_ms),
                default_total_duration: Duration::from_millis(self.playback.total_duration_ms),
                max_len: self.playback.max_queue_len,
            },
            broadcast_capacity: self.publishing.broadcast_capacity,
        }
    }

    pub fn channel_config(&self) -> WsChannelConfig {
        WsChannelConfig {
            url: self.stream.url.clone(),
            initial_backoff: Duration::from_millis(self.stream.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.stream.max_backoff_ms),
            max_retries: self.stream.max_retries,
        }
    }
}
