//! Minimum spacing between calls to each external service.

use crate::config::LimitConfig;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Enforces a per-service minimum interval between outbound calls.
///
/// Callers sleep rather than fail: `wait_for_*` returns once the caller owns
/// a send slot at least `min_interval` after the previous one. Each service
/// has its own state so generation calls never delay social calls.
pub struct RateLimiter {
    generation: ServiceLimit,
    social: ServiceLimit,
}

struct ServiceLimit {
    min_interval: Duration,
    /// Time the most recently granted slot becomes "spent".
    last_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: LimitConfig) -> Self {
        Self {
            generation: ServiceLimit::new(config.generation_min_interval),
            social: ServiceLimit::new(config.social_min_interval),
        }
    }

    /// Block until a generation-backend call is allowed.
    pub async fn wait_for_generation(&self) {
        self.generation.wait("generation").await;
    }

    /// Block until a social-platform call is allowed.
    pub async fn wait_for_social(&self) {
        self.social.wait("social").await;
    }
}

impl ServiceLimit {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_slot: Mutex::new(None),
        }
    }

    async fn wait(&self, service: &str) {
        // Reserve the next slot under the lock, then sleep outside it. Two
        // concurrent callers each get distinct slots spaced min_interval
        // apart, and the lock is never held across a sleep or network call.
        let slot = {
            let mut last = match self.last_slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let slot = match *last {
                Some(previous) => (previous + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };

        let now = Instant::now();
        if slot > now {
            let delay = slot - now;
            tracing::debug!(service, delay_ms = delay.as_millis() as u64, "rate limiting outbound call");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(interval: Duration) -> RateLimiter {
        RateLimiter::new(LimitConfig {
            generation_min_interval: interval,
            social_min_interval: interval,
        })
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        let limits = limiter(Duration::from_millis(50));

        let start = Instant::now();
        limits.wait_for_generation().await;
        limits.wait_for_generation().await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(50),
            "second call returned after {elapsed:?}, expected at least 50ms"
        );
    }

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let limits = limiter(Duration::from_millis(200));

        let start = Instant::now();
        limits.wait_for_social().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let limits = limiter(Duration::from_millis(200));

        limits.wait_for_generation().await;
        let start = Instant::now();
        limits.wait_for_social().await;
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "social call should not be delayed by a generation call"
        );
    }
}
