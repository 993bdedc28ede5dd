// Playback queue: decouples bursty sample arrival from a fixed display cadence.
// The queue owns its single timer; every start goes through stop() first.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::Sample;

/// Floor for timer intervals; a zero interval would spin the driver.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Replaced wholesale per batch; stops once the batch's duration elapses.
    Batched,
    /// Appended per sample; runs until stopped.
    Continuous,
}

/// Result of one timer tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Next pending sample, in arrival order.
    Surfaced(Sample),
    /// Batched mode ran out of samples before its duration elapsed. Nothing is synthesized.
    Stalled,
    /// Continuous mode ran out of samples; the caller may interpolate.
    Starved,
    /// Batched duration elapsed; the timer has been stopped.
    Finished,
    /// No timer running.
    Idle,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub default_interval: Duration,
    pub default_total_duration: Duration,
    /// Cap on pending samples in continuous mode.
    pub max_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct PlaybackTimer {
    interval: Duration,
    next_fire: Instant,
}

pub struct PlaybackQueue {
    pending: VecDeque<Sample>,
    cursor: usize,
    mode: PlaybackMode,
    started_at: Option<Instant>,
    interval: Duration,
    total_duration: Duration,
    settings: QueueSettings,
    timer: Option<PlaybackTimer>,
}

impl PlaybackQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            pending: VecDeque::new(),
            cursor: 0,
            mode: PlaybackMode::Continuous,
            started_at: None,
            interval: settings.default_interval.max(MIN_INTERVAL),
            total_duration: settings.default_total_duration,
            settings,
            timer: None,
        }
    }

    /// Replace the queue with `samples` and start batched playback at `now`.
    /// Returns false (and leaves the queue untouched) for an empty batch.
    pub fn load_batch(
        &mut self,
        samples: Vec<Sample>,
        total_duration: Duration,
        interval: Duration,
        now: Instant,
    ) -> bool {
        if samples.is_empty() {
            tracing::debug!(operation = "load_batch", "empty batch ignored");
            return false;
        }
        self.stop();
        let count = samples.len();
        self.pending = samples.into();
        self.cursor = 0;
        self.mode = PlaybackMode::Batched;
        self.started_at = Some(now);
        let interval = if interval.is_zero() {
            self.settings.default_interval
        } else {
            interval
        };
        self.interval = interval.max(MIN_INTERVAL);
        self.total_duration = if total_duration.is_zero() {
            self.settings.default_total_duration
        } else {
            total_duration
        };
        self.start_timer(now);
        tracing::debug!(
            operation = "load_batch",
            samples_count = count,
            interval_ms = self.interval.as_millis() as u64,
            total_duration_ms = self.total_duration.as_millis() as u64,
            "batch loaded"
        );
        true
    }

    /// Append samples for continuous playback. Leaving batched mode discards the batch.
    pub fn append(&mut self, samples: Vec<Sample>, now: Instant) {
        if samples.is_empty() {
            return;
        }
        if self.mode == PlaybackMode::Batched {
            self.stop();
            self.pending.clear();
            self.cursor = 0;
            self.started_at = None;
            self.mode = PlaybackMode::Continuous;
            self.interval = self.settings.default_interval.max(MIN_INTERVAL);
            self.total_duration = self.settings.default_total_duration;
            tracing::debug!(operation = "append", "switched to continuous playback");
        }
        self.pending.extend(samples);

        let max_len = self.settings.max_len.max(1);
        if self.pending.len() > max_len {
            let dropped = self.pending.len() - max_len;
            self.pending.drain(..dropped);
            self.cursor = self.cursor.saturating_sub(dropped);
        }

        if self.timer.is_none() {
            self.start_timer(now);
        }
    }

    /// Advance playback by one step.
    pub fn tick(&mut self, now: Instant) -> Tick {
        if self.timer.is_none() {
            return Tick::Idle;
        }
        match self.mode {
            PlaybackMode::Batched => {
                if let Some(started) = self.started_at
                    && now.saturating_duration_since(started) >= self.total_duration
                {
                    self.stop();
                    return Tick::Finished;
                }
                self.surface().map_or(Tick::Stalled, Tick::Surfaced)
            }
            PlaybackMode::Continuous => self.surface().map_or(Tick::Starved, Tick::Surfaced),
        }
    }

    /// Tick if the timer's deadline has passed, then schedule the next deadline.
    /// Missed deadlines are skipped rather than replayed in a burst.
    pub fn fire_due(&mut self, now: Instant) -> Option<Tick> {
        let deadline = self.timer?.next_fire;
        if now < deadline {
            return None;
        }
        let tick = self.tick(now);
        let window_end = match (self.mode, self.started_at) {
            (PlaybackMode::Batched, Some(started)) => Some(started + self.total_duration),
            _ => None,
        };
        if let Some(timer) = self.timer.as_mut() {
            timer.next_fire += timer.interval;
            if timer.next_fire <= now {
                let behind = now.saturating_duration_since(timer.next_fire);
                let skipped = behind.as_nanos() / timer.interval.as_nanos() + 1;
                timer.next_fire += timer.interval * u32::try_from(skipped).unwrap_or(u32::MAX);
            }
            // A batch's last deadline lands on the end of its window.
            if let Some(end) = window_end {
                timer.next_fire = timer.next_fire.min(end);
            }
        }
        Some(tick)
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&mut self) {
        if self.timer.take().is_some() {
            tracing::debug!(operation = "stop", mode = ?self.mode, "playback timer stopped");
        }
    }

    fn start_timer(&mut self, now: Instant) {
        self.stop();
        self.timer = Some(PlaybackTimer {
            interval: self.interval,
            next_fire: now,
        });
    }

    fn surface(&mut self) -> Option<Sample> {
        let sample = self.pending.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(sample)
    }

    /// Samples not yet surfaced.
    pub fn len(&self) -> usize {
        self.pending.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_playing(&self) -> bool {
        self.timer.is_some()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn pending(&self) -> &VecDeque<Sample> {
        &self.pending
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.next_fire)
    }

    /// Elapsed share of the current batch's duration, 0–100. Always 0 in continuous mode.
    pub fn playback_progress(&self, now: Instant) -> f64 {
        match (self.mode, self.started_at) {
            (PlaybackMode::Batched, Some(started)) if !self.total_duration.is_zero() => {
                let elapsed = now.saturating_duration_since(started).as_secs_f64();
                (elapsed / self.total_duration.as_secs_f64() * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }
}
