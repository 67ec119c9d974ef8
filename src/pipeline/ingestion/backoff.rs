use std::time::Duration;

use crate::config::IngestionConfig;

/// Exponential backoff between fetch attempts of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(
            config.initial_retry_delay(),
            config.backoff_multiplier,
            config.max_retry_delay(),
        )
    }

    /// Sleep before retry `retry` (1-based): `min(initial * multiplier^(retry-1), max)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let max = self.max_delay.as_secs_f64();
        let exponent = (retry - 1).min(64) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !delay.is_finite() || delay >= max {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(self.max_delay)
    }
}
