//! Global evaluations-per-minute budget shared by all watchers

use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EvaluationLimiter {
    max_per_minute: u32,
    count: u32,
    window_start: Instant,
}

impl EvaluationLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Take one evaluation slot; false when the minute's budget is spent
    pub fn try_acquire(&mut self) -> bool {
        if self.window_start.elapsed() >= WINDOW {
            self.count = 0;
            self.window_start = Instant::now();
        }
        if self.count >= self.max_per_minute {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.count
    }
}
