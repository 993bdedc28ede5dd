// One timestamped set of metric readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContainerUsage;

/// A single observation from the stats stream.
///
/// `cpu_percent` and `memory_percent` are required on the wire; every other
/// metric is optional and stays `None` when the server omits it. Percentages
/// are expected in [0, 100] but are not enforced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f64>,
    /// Cumulative counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_bytes_sent: Option<u64>,
    /// Cumulative counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_bytes_recv: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerUsage>>,
}

impl Sample {
    /// Sample with only the required fields set.
    pub fn new(timestamp: DateTime<Utc>, cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            timestamp,
            cpu_percent,
            memory_percent,
            disk_percent: None,
            network_bytes_sent: None,
            network_bytes_recv: None,
            containers: None,
        }
    }
}

// Timestamps arrive either as RFC 3339 strings or as epoch milliseconds.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        FractionalMillis(f64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
            RawTimestamp::FractionalMillis(ms) => DateTime::from_timestamp_millis(ms as i64)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
            RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid timestamp {:?}: {}", s, e))),
        }
    }
}
