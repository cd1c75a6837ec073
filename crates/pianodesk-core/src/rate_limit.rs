//! Token bucket pacing for batch scheduling and provider fan-out.
//!
//! `acquire` waits instead of failing: callers are sequential loops that
//! should slow down, not drop work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refreshed_at: Instant,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<Bucket>>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    /// A bucket holding `burst` tokens refilled at `per_second`.
    /// Zero values are clamped to one.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            state: Arc::new(Mutex::new(Bucket {
                tokens: burst,
                refreshed_at: Instant::now(),
            })),
            per_second: f64::from(per_second.max(1)),
            burst,
        }
    }

    pub fn from_batch_config(config: &crate::storage::BatchConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    pub fn from_sync_config(config: &crate::storage::SyncConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refreshed_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
                bucket.refreshed_at = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second)
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate_then_paced() {
        let limiter = RateLimiter::new(10, 3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(99), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_refills_up_to_burst_only() {
        let limiter = RateLimiter::new(10, 2);
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(99));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_settings_are_clamped() {
        let limiter = RateLimiter::new(0, 0);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(999));
    }
}
