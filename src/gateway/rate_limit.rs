use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Spaces consecutive requests to the same provider by a minimum interval.
///
/// Gateways holding the same limiter respect the spacing together, across
/// runs and concurrent callers. Waiters on one provider are served in
/// arrival order.
#[derive(Debug, Default)]
pub struct RateLimiter {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Instant>>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limiter ready to be handed to several gateways.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn slot(&self, provider: &str) -> Arc<tokio::sync::Mutex<Option<Instant>>> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Waits until `provider` may be called again and records the send time.
    /// Returns how long the caller was held back.
    pub async fn acquire(&self, provider: &str, min_interval: Duration) -> Duration {
        let slot = self.slot(provider);
        let mut last = slot.lock().await;
        let started = Instant::now();
        if let Some(prev) = *last {
            let ready_at = prev + min_interval;
            if ready_at > started {
                tracing::debug!(
                    provider,
                    wait_ms = (ready_at - started).as_millis() as u64,
                    "rate limiter holding request"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now - started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced() {
        let limiter = RateLimiter::new();
        let interval = Duration::from_millis(2500);
        let t0 = Instant::now();

        assert_eq!(limiter.acquire("a", interval).await, Duration::ZERO);
        limiter.acquire("a", interval).await;
        let second = Instant::now();
        limiter.acquire("a", interval).await;
        let third = Instant::now();

        assert!(second - t0 >= interval);
        assert!(third - second >= interval);
    }

    #[tokio::test(start_paused = true)]
    async fn providers_are_independent() {
        let limiter = RateLimiter::new();
        let interval = Duration::from_secs(10);
        limiter.acquire("a", interval).await;
        let waited = limiter.acquire("b", interval).await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_spacing() {
        let limiter = RateLimiter::shared();
        let interval = Duration::from_millis(500);
        let t0 = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire("p", interval).await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap() - t0);
        }
        times.sort();
        assert!(times[1] - times[0] >= interval);
        assert!(times[2] - times[1] >= interval);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_interval_means_no_wait() {
        let limiter = RateLimiter::new();
        let interval = Duration::from_millis(100);
        limiter.acquire("a", interval).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.acquire("a", interval).await, Duration::ZERO);
    }
}
