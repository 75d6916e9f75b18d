//! Token-bucket admission control, one instance per source.
//!
//! Every outbound request for a source serializes through that source's
//! bucket; there is no other throttle on per-item concurrency.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        debug_assert!(capacity >= 1.0 && refill_rate > 0.0);
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Convenience constructor for the usual "N requests per minute with a
    /// small burst" configuration.
    pub fn per_minute(requests_per_minute: f64, burst: f64) -> Self {
        Self::new(burst.max(1.0), requests_per_minute / 60.0)
    }

    /// Admit one request, suspending until a token is available.
    ///
    /// The state lock is only held for the refill arithmetic, never across
    /// the sleep. Every caller deducts its token up front, so the balance
    /// goes negative while waiters are queued; each new waiter sleeps off
    /// the accumulated debt plus its own token, which keeps concurrent
    /// callers serialized at the refill rate.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.last_refill = now;
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);

            state.tokens -= 1.0;
            if state.tokens >= 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(-state.tokens / self.refill_rate))
            }
        };

        if let Some(wait) = wait {
            debug!("rate limiting: waiting {}ms", wait.as_millis());
            sleep(wait).await;
        }
    }

    /// Current token balance without refill, for observability. Negative
    /// while waiters are queued.
    pub async fn available(&self) -> f64 {
        self.state.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_then_waits() {
        let bucket = TokenBucket::new(3.0, 1.0);

        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        // Burst drains instantly.
        assert_eq!(start.elapsed(), Duration::ZERO);

        bucket.acquire().await;
        // Fourth call had to wait one full refill interval.
        assert!(start.elapsed() >= Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(2.0, 10.0);
        bucket.acquire().await;
        bucket.acquire().await;

        // A long idle period must clamp at capacity, not accumulate.
        tokio::time::advance(Duration::from_secs(3600)).await;

        let start = Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(bucket.available().await <= 2.0);

        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(99));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_queue_at_the_refill_rate() {
        // Drained 1-capacity bucket at 1 token/sec: five concurrent
        // acquires must take five seconds, one admission per interval.
        let bucket = TokenBucket::new(1.0, 1.0);
        bucket.acquire().await;

        let start = Instant::now();
        join_all((0..5).map(|_| bucket.acquire())).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4999), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(5100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_state_matches_refill_rate() {
        // Capacity 1, 5 tokens/sec: 10 sequential acquires past the initial
        // token need ~2 seconds.
        let bucket = TokenBucket::new(1.0, 5.0);
        let start = Instant::now();
        for _ in 0..11 {
            bucket.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2100), "{:?}", elapsed);
    }
}
