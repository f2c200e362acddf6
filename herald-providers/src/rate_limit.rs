//! Token-bucket rate limiter for search traffic.

use std::sync::Arc;
use std::time::Duration;

use herald_core::{Clock, RateLimitConfig, Sleeper};
use tokio::sync::Mutex;
use tracing::debug;

/// Result of [`TokenBucket::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acquire {
    /// The caller had to wait for a token
    pub rate_limited: bool,
    /// How long the caller waited
    pub wait_ms: u64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_ms: i64,
}

/// Token bucket holding between 0 and `burst` tokens, refilled at `qps`
/// tokens per second.
///
/// Waiters are served one at a time: the state lock is held across the
/// sleep so a second caller queues behind the first instead of both
/// claiming the same refill.
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        let burst = config.burst.max(1.0);
        let now = clock.now_ms();
        Self {
            qps: config.qps,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill_ms: now,
            }),
            clock,
            sleeper,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now_ms();
        let elapsed_secs = (now - state.last_refill_ms).max(0) as f64 / 1000.0;
        state.tokens = (state.tokens + elapsed_secs * self.qps).min(self.burst);
        state.last_refill_ms = now;
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) -> Acquire {
        let mut state = self.state.lock().await;

        if self.qps <= 0.0 {
            state.tokens = self.burst;
            state.last_refill_ms = self.clock.now_ms();
            return Acquire::default();
        }

        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Acquire::default();
        }

        let wait_ms = ((1.0 - state.tokens) / self.qps * 1000.0).ceil() as u64;
        debug!(wait_ms, tokens = state.tokens, "Rate limiter waiting for token");
        self.sleeper.sleep(Duration::from_millis(wait_ms)).await;

        self.refill(&mut state);
        state.tokens = (state.tokens - 1.0).max(0.0);

        Acquire {
            rate_limited: true,
            wait_ms,
        }
    }

    /// Tokens currently available, after refill.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        if self.qps > 0.0 {
            self.refill(&mut state);
        }
        state.tokens
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("qps", &self.qps)
            .field("burst", &self.burst)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_test_utils::{ManualClock, RecordingSleeper};

    fn bucket(qps: f64, burst: f64) -> (TokenBucket, ManualClock, RecordingSleeper) {
        let clock = ManualClock::new(10_000);
        let sleeper = RecordingSleeper::advancing(clock.clone());
        let bucket = TokenBucket::new(
            &RateLimitConfig { qps, burst },
            Arc::new(clock.clone()),
            Arc::new(sleeper.clone()),
        );
        (bucket, clock, sleeper)
    }

    #[tokio::test]
    async fn test_second_immediate_acquire_waits_one_second() {
        let (bucket, _clock, sleeper) = bucket(1.0, 1.0);

        let first = bucket.acquire().await;
        let second = bucket.acquire().await;

        assert!(!first.rate_limited);
        assert!(second.rate_limited);
        assert_eq!(second.wait_ms, 1000);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test]
    async fn test_burst_allows_immediate_calls() {
        let (bucket, _clock, sleeper) = bucket(1.0, 3.0);
        for _ in 0..3 {
            assert!(!bucket.acquire().await.rate_limited);
        }
        assert!(bucket.acquire().await.rate_limited);
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_refill_caps_at_burst() {
        let (bucket, clock, _sleeper) = bucket(2.0, 2.0);
        bucket.acquire().await;
        bucket.acquire().await;
        clock.advance(Duration::from_secs(60));
        assert_eq!(bucket.available().await, 2.0);
    }

    #[tokio::test]
    async fn test_partial_token_wait() {
        let (bucket, clock, _sleeper) = bucket(2.0, 1.0);
        bucket.acquire().await;
        clock.advance(Duration::from_millis(250));
        // half a token available, the other half takes 250ms at 2/s
        let acquired = bucket.acquire().await;
        assert!(acquired.rate_limited);
        assert_eq!(acquired.wait_ms, 250);
        assert_eq!(bucket.available().await, 0.0);
    }

    #[tokio::test]
    async fn test_non_positive_qps_is_unlimited() {
        let sleeper = RecordingSleeper::new();
        let bucket = TokenBucket::new(
            &RateLimitConfig { qps: 0.0, burst: 1.0 },
            Arc::new(ManualClock::new(0)),
            Arc::new(sleeper.clone()),
        );
        for _ in 0..10 {
            assert_eq!(bucket.acquire().await, Acquire::default());
        }
        assert_eq!(sleeper.total(), Duration::ZERO);
    }
}
