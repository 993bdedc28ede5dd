// Sample source collaborator: the push channel the store subscribes to.
// Reconnect policy lives behind this trait, not in the store.

mod ws;

pub use ws::{WsChannel, WsChannelConfig};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::StreamMessage;

/// Buffered events per subscription before the channel task waits on the store.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection established (first time or after a reconnect).
    Open,
    Message(StreamMessage),
    /// A frame failed validation and was dropped; the connection is still up.
    Rejected(String),
    /// The channel is retrying after an error.
    Reconnecting { attempt: u32 },
    /// Connection refused or lost.
    Error(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotConnected,

    #[error("update interval must be at least 1 second, got {0}")]
    InvalidInterval(u32),

    #[error("channel closed")]
    Closed,
}

pub trait StatsChannel: Send {
    /// Start a subscription. Events arrive on the returned receiver until the
    /// channel gives up or `close` is called; the stream then ends.
    fn open(&mut self) -> mpsc::Receiver<ChannelEvent>;

    /// Tear down the subscription. Idempotent.
    fn close(&mut self);

    /// Ask the server for a different sampling cadence.
    fn set_update_interval(&mut self, seconds: u32) -> Result<(), ChannelError>;
}
