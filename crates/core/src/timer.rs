//! Frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring frame deltas.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates frame deltas and reports an average rate once per window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
}

impl FpsCounter {
    /// Creates a counter that reports once every `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
        }
    }

    /// Records one frame of length `delta`.
    ///
    /// Returns the average frames per second when the window has elapsed,
    /// and starts a new window.
    pub fn record(&mut self, delta: Duration) -> Option<f32> {
        self.accumulated += delta;
        self.frames += 1;

        if self.accumulated < self.window {
            return None;
        }

        let fps = self.frames as f32 / self.accumulated.as_secs_f32();
        self.accumulated = Duration::ZERO;
        self.frames = 0;
        Some(fps)
    }
}
