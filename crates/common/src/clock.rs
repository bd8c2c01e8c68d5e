//! Clock and frame-rate utilities for stream sessions.
//!
//! Every streaming session is anchored to a monotonic epoch recorded when
//! the engine starts pulling frames. Wall-clock time at the epoch is kept
//! for status reporting.

use std::time::Instant;

/// A monotonic clock anchored to the start of a stream.
#[derive(Debug, Clone)]
pub struct StreamClock {
    /// The instant the stream started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl StreamClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the stream started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at stream start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Exponentially smoothed frames-per-second estimate.
///
/// The first observed interval seeds the estimate; later intervals are
/// blended `0.9 * previous + 0.1 * instant`.
#[derive(Debug, Default)]
pub struct FpsMeter {
    last_tick: Option<Instant>,
    smoothed: f32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame at `now` and return the updated estimate.
    pub fn tick_at(&mut self, now: Instant) -> f32 {
        if let Some(last) = self.last_tick {
            let elapsed = now.saturating_duration_since(last).as_secs_f32();
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                self.smoothed = if self.smoothed == 0.0 {
                    instant
                } else {
                    0.9 * self.smoothed + 0.1 * instant
                };
            }
        }
        self.last_tick = Some(now);
        self.smoothed
    }

    /// Record a frame now.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    /// Current estimate (0.0 until two frames have been seen).
    pub fn fps(&self) -> f32 {
        self.smoothed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_elapsed() {
        let clock = StreamClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_fps_meter_seeds_then_smooths() {
        let mut meter = FpsMeter::new();
        let t0 = Instant::now();
        assert_eq!(meter.tick_at(t0), 0.0);

        let fps = meter.tick_at(t0 + Duration::from_millis(100));
        assert!((fps - 10.0).abs() < 0.01);

        // A single fast frame only nudges the estimate.
        let fps = meter.tick_at(t0 + Duration::from_millis(150));
        assert!((fps - 11.0).abs() < 0.05);
    }
}
