//! API call budget over a rolling window.
//!
//! Every outbound API request goes through [`QuotaGuard::check_and_wait`]. The
//! guard never fails: when the budget is spent it parks the caller until the
//! window rolls over. All workers share one guard, so the increment-and-check
//! runs under an async mutex and blocked workers wait rather than spin.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Log an API usage line every this many calls.
const USAGE_LOG_INTERVAL: u32 = 10;

#[derive(Debug)]
struct QuotaState {
    count: u32,
    window_start: Instant,
}

/// Shared call counter with blocking backpressure.
#[derive(Debug)]
pub struct QuotaGuard {
    limit: u32,
    window: Duration,
    state: Mutex<QuotaState>,
}

impl QuotaGuard {
    /// Create a guard allowing `limit` calls per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            state: Mutex::new(QuotaState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Account for one call, sleeping out the window if the limit is reached.
    pub async fn check_and_wait(&self) {
        let mut state = self.state.lock().await;

        if state.window_start.elapsed() >= self.window {
            state.count = 0;
            state.window_start = Instant::now();
        }

        state.count += 1;
        if state.count % USAGE_LOG_INTERVAL == 0 {
            info!(calls = state.count, limit = self.limit, "API usage");
        }

        if state.count >= self.limit {
            let remaining = self.window.saturating_sub(state.window_start.elapsed());
            warn!(
                calls = state.count,
                wait_secs = remaining.as_secs(),
                "API quota reached, waiting for window reset"
            );
            // The lock is held on purpose: other workers queue behind it.
            tokio::time::sleep(remaining).await;
            state.count = 0;
            state.window_start = Instant::now();
        }
    }

    /// Calls counted in the current window.
    pub async fn calls(&self) -> u32 {
        self.state.lock().await.count
    }
}
