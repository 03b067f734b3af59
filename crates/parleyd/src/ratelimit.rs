use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limit on inbound signaling messages for one connection.
///
/// Each accepted message is timestamped; a new one is allowed only while
/// fewer than `limit` timestamps fall inside the last [`WINDOW`]. Unlike a
/// fixed window this gives no burst at window boundaries.
#[derive(Debug)]
pub struct RateLimiter {
    window: VecDeque<Instant>,
    limit: u32,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` messages per minute.
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self {
            window: VecDeque::with_capacity(64),
            limit,
        }
    }

    /// Records a message now. Returns `false` if it must be dropped.
    pub fn check_and_record(&mut self) -> bool {
        self.check_and_record_at(Instant::now())
    }

    fn check_and_record_at(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.window.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.limit as usize {
            return false;
        }
        self.window.push_back(now);
        true
    }

    /// Messages counted in the current window.
    #[cfg(test)]
    fn count(&self) -> usize {
        self.window.len()
    }
}
