//! Fixed-window message rate limiter
//!
//! The window resets wholesale, so bursts straddling a boundary can
//! briefly exceed the nominal rate. One instance per session.

use std::time::{Duration, Instant};

/// Fixed-window counter
#[derive(Debug)]
pub struct RateLimiter {
    ceiling: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    /// Standard window size
    pub const WINDOW: Duration = Duration::from_millis(1000);

    /// Create a limiter with the given per-window ceiling
    pub fn new(ceiling: u32) -> Self {
        Self::with_window(ceiling, Self::WINDOW)
    }

    /// Create a limiter with an explicit window size
    pub fn with_window(ceiling: u32, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Count one message; true if it is within the ceiling
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Count one message at an explicit instant
    pub fn check_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) > self.window {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.ceiling
    }
}
