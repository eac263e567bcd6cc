use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as DirectRateLimiter};

use crate::core::service::SquashConfig;

type Limiter = DirectRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket pacing for outbound dispatches: a burst of `rate_max`
/// permits, one replenished every `rate_per`. A zero `rate_max` (or zero
/// period) disables pacing entirely.
pub struct RateLimiter {
    inner: Option<Limiter>,
}

impl RateLimiter {
    pub fn new(config: &SquashConfig) -> Self {
        let inner = match NonZeroU32::new(config.rate_max) {
            Some(burst) if !config.rate_per.is_zero() => Quota::with_period(config.rate_per)
                .map(|quota| DirectRateLimiter::direct(quota.allow_burst(burst))),
            _ => None,
        };
        Self { inner }
    }

    /// Attempts to take a permit without waiting.
    pub fn try_acquire(&self) -> bool {
        match &self.inner {
            None => true,
            Some(limiter) => limiter.check().is_ok(),
        }
    }

    /// Waits until a dispatch permit is available.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}
