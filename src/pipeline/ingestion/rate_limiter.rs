use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::common::constants::MIN_REFILL_RATE_PER_SEC;
use crate::config::{AppConfig, RateLimitSpec};
use crate::domain::SourceType;
use crate::observability::metrics;

/// Token bucket bounding the outbound call rate of one data source.
///
/// Shared by every run that talks to the source. `acquire` only delays, it
/// never fails.
#[derive(Debug)]
pub struct RateLimiter {
    source: SourceType,
    capacity: f64,
    refill_rate: f64,
    // tokens currently in the bucket and the time of the last refill
    bucket: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(source: SourceType, spec: RateLimitSpec) -> Self {
        let capacity = f64::from(spec.capacity.max(1));
        let refill_rate = if spec.refill_rate_per_sec.is_finite() && spec.refill_rate_per_sec > 0.0 {
            spec.refill_rate_per_sec.max(MIN_REFILL_RATE_PER_SEC)
        } else {
            1.0
        };
        Self {
            source,
            capacity,
            refill_rate,
            bucket: Mutex::new((capacity, Instant::now())),
        }
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    /// Wait for one token and consume it.
    pub async fn acquire(&self) {
        let retry_after = Duration::try_from_secs_f64(1.0 / self.refill_rate)
            .unwrap_or(Duration::from_secs(1));
        let mut waited = false;
        loop {
            let mut guard = self.bucket.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * self.refill_rate).min(self.capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            }
            drop(guard);
            if !waited {
                debug!(source = %self.source, "rate limiter empty, waiting for refill");
                metrics::rate_limiter::throttled(self.source);
                waited = true;
            }
            tokio::time::sleep(retry_after).await;
        }
        metrics::rate_limiter::acquired(self.source);
    }

    /// Tokens currently available, after refilling for elapsed time.
    pub async fn available(&self) -> f64 {
        let guard = self.bucket.lock().await;
        let (tokens, last) = *guard;
        (tokens + last.elapsed().as_secs_f64() * self.refill_rate).min(self.capacity)
    }
}

/// One shared limiter per source type.
#[derive(Debug, Clone, Default)]
pub struct RateLimiters {
    limiters: HashMap<SourceType, Arc<RateLimiter>>,
}

impl RateLimiters {
    pub fn from_config(config: &AppConfig) -> Self {
        let limiters = SourceType::all()
            .into_iter()
            .map(|source| {
                (source, Arc::new(RateLimiter::new(source, config.rate_limit_for(source))))
            })
            .collect();
        Self { limiters }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiters.insert(limiter.source(), limiter);
        self
    }

    pub fn get(&self, source: SourceType) -> Option<Arc<RateLimiter>> {
        self.limiters.get(&source).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(capacity: u32, refill_rate_per_sec: f64) -> RateLimitSpec {
        RateLimitSpec {
            capacity,
            refill_rate_per_sec,
        }
    }

    #[tokio::test]
    async fn burst_up_to_capacity_does_not_wait() {
        let limiter = RateLimiter::new(SourceType::GuardDuty, spec(5, 1.0));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test]
    async fn empty_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(SourceType::CloudTrail, spec(1, 20.0));
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        // one token takes 50ms to refill at 20/s
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn concurrent_callers_do_not_lose_tokens() {
        let limiter = Arc::new(RateLimiter::new(SourceType::SecurityHub, spec(4, 40.0)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 4 tokens from the burst, the other 4 need ~100ms of refill
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn available_never_exceeds_capacity() {
        let limiter = RateLimiter::new(SourceType::GuardDuty, spec(3, 1000.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.available().await <= 3.0);
    }

    #[test]
    fn limiters_are_shared_per_source() {
        let limiters = RateLimiters::from_config(&AppConfig::default());
        let a = limiters.get(SourceType::GuardDuty).unwrap();
        let b = limiters.get(SourceType::GuardDuty).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &limiters.get(SourceType::CloudTrail).unwrap()));
    }

    #[tokio::test]
    async fn vanishing_refill_rate_is_raised_to_the_floor() {
        let limiter = RateLimiter::new(SourceType::GuardDuty, spec(1, 1e-20));
        assert_eq!(limiter.refill_rate, MIN_REFILL_RATE_PER_SEC);

        limiter.acquire().await;
        // the second token is 1000s away, so the wait must still be pending
        let second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(second.is_err());
    }

    #[test]
    fn unusable_refill_rates_fall_back_to_one_per_second() {
        for rate in [0.0, -4.0, f64::NAN, f64::INFINITY] {
            let limiter = RateLimiter::new(SourceType::CloudTrail, spec(0, rate));
            assert_eq!(limiter.refill_rate, 1.0);
            assert_eq!(limiter.capacity, 1.0);
        }
    }
}
