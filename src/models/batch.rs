// Normalized batch envelope handed to the playback queue

use std::time::Duration;

use super::Sample;

/// Samples delivered together plus the timing to play them back with.
/// Consumed by `PlaybackQueue::load_batch`; not retained afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub samples: Vec<Sample>,
    pub total_duration: Duration,
    pub interval: Duration,
    /// When false the batch is shown verbatim (tween factor 1.0).
    pub smooth_tweening: bool,
}
