//! The game clock. Every timestamp in the simulation comes from a [`TimeSource`], never from
//! wall-clock reads, so tests can drive time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait TimeSource: Send + Sync {
    /// Milliseconds since the clock started.
    fn current_tick(&self) -> u64;
}

/// Monotonic production clock.
#[derive(Debug, Clone, Copy)]
pub struct GameTimer {
    start: Instant,
}

impl GameTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for GameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for GameTimer {
    fn current_tick(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, ms: u64) -> u64 {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn current_tick(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
