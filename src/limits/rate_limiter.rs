//! Rate limiter for LLM calls
//!
//! Bounds two things at once: the number of in-flight acquisitions
//! (concurrency) and the number of successful acquisitions in a rolling
//! one-hour window. Waiters are woken by releases (FIFO) or by the oldest
//! window timestamp aging out, and re-check both bounds after every wakeup
//! because another waiter may have been admitted in the meantime.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{EventBus, SwarmEvent};

/// Rolling window for the hourly bound
pub const RATE_WINDOW: Duration = Duration::from_millis(3_600_000);

struct RateLimiterInner {
    /// Currently admitted callers
    active: usize,
    /// Concurrency bound
    max_concurrent: usize,
    /// Hourly bound
    max_per_hour: usize,
    /// Timestamps of successful acquisitions within the window
    timestamps: VecDeque<Instant>,
}

impl RateLimiterInner {
    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(RATE_WINDOW);
        if let Some(cutoff) = cutoff {
            while self.timestamps.front().map(|t| *t <= cutoff).unwrap_or(false) {
                self.timestamps.pop_front();
            }
        }
    }
}

/// Bounds concurrent LLM calls and calls-per-hour
///
/// Two populations exist at runtime: one shared limiter for orchestrator
/// calls and one limiter per worker, all constructed with the same bounds,
/// so workers never contend with each other on the shared slots.
pub struct RateLimiter {
    inner: Mutex<RateLimiterInner>,
    notify: Notify,
    bus: Option<Arc<EventBus>>,
}

impl RateLimiter {
    /// Create a new limiter with the given bounds
    pub fn new(max_concurrent: usize, max_per_hour: usize) -> Self {
        Self {
            inner: Mutex::new(RateLimiterInner {
                active: 0,
                max_concurrent: max_concurrent.max(1),
                max_per_hour: max_per_hour.max(1),
                timestamps: VecDeque::new(),
            }),
            notify: Notify::new(),
            bus: None,
        }
    }

    /// Create a limiter that reports hourly-window waits on the event bus
    pub fn with_bus(max_concurrent: usize, max_per_hour: usize, bus: Arc<EventBus>) -> Self {
        let mut limiter = Self::new(max_concurrent, max_per_hour);
        limiter.bus = Some(bus);
        limiter
    }

    /// Wait until both bounds admit the caller, then record the acquisition
    pub async fn acquire(&self) {
        loop {
            let hourly_wait = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                inner.prune(now);

                if inner.active < inner.max_concurrent && inner.timestamps.len() < inner.max_per_hour {
                    inner.active += 1;
                    inner.timestamps.push_back(now);
                    debug!(active = inner.active, window = inner.timestamps.len(), "RateLimiter::acquire: admitted");
                    return;
                }

                if inner.timestamps.len() >= inner.max_per_hour {
                    // Oldest timestamp must age out before admission is possible
                    let oldest = *inner.timestamps.front().expect("window is non-empty");
                    Some(RATE_WINDOW.saturating_sub(now.duration_since(oldest)))
                } else {
                    None
                }
            };

            match hourly_wait {
                Some(wait) => {
                    warn!(wait_ms = wait.as_millis() as u64, "RateLimiter::acquire: hourly window full, sleeping");
                    if let Some(bus) = &self.bus {
                        bus.emit(SwarmEvent::RateLimitWait {
                            wait_ms: wait.as_millis() as u64,
                        });
                    }
                    // A release may also open a slot before the timestamp
                    // expires; whichever fires first, both bounds are
                    // re-checked at the top of the loop.
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Release an admitted caller and wake one waiter (FIFO)
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        inner.active = inner.active.saturating_sub(1);
        debug!(active = inner.active, "RateLimiter::release");
        drop(inner);
        self.notify.notify_one();
    }

    /// Update the bounds at runtime
    ///
    /// Already-admitted callers are never retroactively denied; all waiters
    /// are woken to re-check against the new bounds.
    pub async fn update_limits(&self, max_concurrent: usize, max_per_hour: usize) {
        let mut inner = self.inner.lock().await;
        inner.max_concurrent = max_concurrent.max(1);
        inner.max_per_hour = max_per_hour.max(1);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Current number of admitted callers
    pub async fn active(&self) -> usize {
        self.inner.lock().await.active
    }

    /// Number of acquisitions still inside the rolling window
    pub async fn window_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.prune(Instant::now());
        inner.timestamps.len()
    }
}
