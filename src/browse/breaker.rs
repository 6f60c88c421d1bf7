//! Circuit breaker
//!
//! Counts consecutive failures; opens once the threshold is first reached and
//! stays open until a success or until the window has elapsed.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Drop an open marker older than the window. Returns true if it was cleared.
    pub fn clear_if_expired(&mut self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) >= self.window => {
                self.opened_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened) < self.window)
            .unwrap_or(false)
    }

    /// Record a failure. Returns true exactly when this failure opened the breaker.
    ///
    /// A breaker whose window expired re-opens on the next failure while the
    /// count is still at or above the threshold.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold && self.opened_at.is_none() {
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// At or above the threshold
    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }
}
