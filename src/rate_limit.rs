use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::Clock;

/// Sliding-window limiter over whole verification runs. A caller refused
/// here is expected to serve cached results instead of touching the network.
pub struct RunRateLimiter {
    max_runs: usize,
    window: Duration,
    history: Mutex<VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl RunRateLimiter {
    pub fn new(max_runs: usize, window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_runs,
            window: Duration::seconds(window_seconds as i64),
            history: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Record a run if the window has room. Returns false when the caller
    /// must back off.
    pub async fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.window;

        let mut history = self.history.lock().await;
        while history.front().map_or(false, |t| *t <= cutoff) {
            history.pop_front();
        }

        if history.len() >= self.max_runs {
            warn!(
                "Run rate limit reached: {} runs inside {}s",
                history.len(),
                self.window.num_seconds()
            );
            return false;
        }

        history.push_back(now);
        true
    }

    pub fn max_runs(&self) -> usize {
        self.max_runs
    }

    pub fn window_seconds(&self) -> u64 {
        self.window.num_seconds().max(0) as u64
    }
}
