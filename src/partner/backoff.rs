//! Exponential backoff with additive jitter, shared by credential refresh and harvesting.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    /// `min(cap, base * 2^attempt) + random(0, base)`, with `attempt` starting at zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponential = 1u32
            .checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(self.cap)
            .min(self.cap);

        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rng.random_range(0..=base_ms));

        exponential + jitter
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_retries
    }
}
