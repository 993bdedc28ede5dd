// Wire messages on the stats stream and the parsing boundary.
// Anything that fails here is rejected before it reaches the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Batch, Sample};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("unrecognised message: no batch, timestamp or type field")]
    UnknownShape,
}

/// One inbound message after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Sample(Sample),
    Batch(BatchMessage),
    /// A well-formed frame this client has no use for (e.g. the server's `info` welcome).
    Ignored { kind: String },
}

impl StreamMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = &value else {
            return Err(ProtocolError::NotAnObject);
        };
        if obj.contains_key("batch") {
            return Ok(StreamMessage::Batch(serde_json::from_value(value)?));
        }
        if obj.contains_key("timestamp") {
            return Ok(StreamMessage::Sample(serde_json::from_value(value)?));
        }
        match obj.get("type").and_then(Value::as_str) {
            Some(kind) => Ok(StreamMessage::Ignored {
                kind: kind.to_string(),
            }),
            None => Err(ProtocolError::UnknownShape),
        }
    }
}

/// Batch frame as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMessage {
    pub batch: Vec<Sample>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub latest: Option<Sample>,
    #[serde(default)]
    pub oldest: Option<Sample>,
    #[serde(default)]
    pub timespan_seconds: f64,
    #[serde(default)]
    pub playback_info: Option<PlaybackInfo>,
}

/// Server hints for how to play a batch back. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub update_interval: Option<u64>,
    #[serde(default = "default_smooth_tweening")]
    pub smooth_tweening: bool,
}

fn default_smooth_tweening() -> bool {
    true
}

impl Default for PlaybackInfo {
    fn default() -> Self {
        Self {
            total_duration: None,
            update_interval: None,
            smooth_tweening: default_smooth_tweening(),
        }
    }
}

/// Timing used when a batch carries no usable playback hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackDefaults {
    pub total_duration: Duration,
    pub interval: Duration,
}

impl BatchMessage {
    /// Resolve playback timing: explicit `playback_info` first, then
    /// `timespan_seconds` spread evenly over the samples, then `defaults`.
    pub fn into_batch(self, defaults: &PlaybackDefaults) -> Batch {
        if let Some(declared) = self.batch_size
            && declared != self.batch.len()
        {
            tracing::warn!(
                operation = "into_batch",
                declared,
                actual = self.batch.len(),
                "batch_size does not match sample count"
            );
        }
        let info = self.playback_info.unwrap_or_default();

        let total_duration = info
            .total_duration
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .or_else(|| {
                Duration::try_from_secs_f64(self.timespan_seconds)
                    .ok()
                    .filter(|d| !d.is_zero())
            })
            .unwrap_or(defaults.total_duration);

        let interval = info
            .update_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .or_else(|| {
                u32::try_from(self.batch.len())
                    .ok()
                    .filter(|n| *n > 0)
                    .map(|n| total_duration / n)
            })
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.interval);

        Batch {
            samples: self.batch,
            total_duration,
            interval,
            smooth_tweening: info.smooth_tweening,
        }
    }
}

/// Outbound control frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    SetUpdateInterval {
        #[serde(rename = "interval")]
        interval_seconds: u32,
    },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
