// Per-container resource breakdown carried on a Sample

use serde::{Deserialize, Serialize};

/// Docker container state; serializes to lowercase JSON (e.g. "running").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Exited,
    Paused,
    Restarting,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One container's slice of a sample. `stack` is the compose project label, when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stack: Option<String>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default)]
    pub memory_usage_bytes: u64,
    #[serde(default)]
    pub state: ContainerState,
}
