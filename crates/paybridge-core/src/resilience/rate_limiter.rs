//! Token-bucket rate limiting via `governor` (§4.F).

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};

use crate::error::PayBridgeError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub permits_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { permits_per_second: 50, burst_size: 50 }
    }
}

/// Wraps a `governor` token bucket for one (serviceName, tenantId) pair.
pub struct RateLimiter {
    service: String,
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimiter {
    pub fn new(service: impl Into<String>, config: RateLimiterConfig) -> Self {
        let per_second = NonZeroU32::new(config.permits_per_second.max(1)).unwrap();
        let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap();
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self { service: service.into(), inner: GovernorLimiter::direct(quota) }
    }

    /// Returns immediately: `Ok(())` if a token was available, or
    /// `SATURATED` (the §7 taxonomy has no distinct RATE_LIMITED kind at the
    /// dispatcher boundary; callers may inspect the reason string).
    pub fn check(&self) -> Result<(), PayBridgeError> {
        self.inner.check().map_err(|_| PayBridgeError::Saturated {
            service: self.service.clone(),
            reason: "rate limit exceeded".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_calls_within_burst_then_rejects() {
        let limiter = RateLimiter::new("clearing", RateLimiterConfig { permits_per_second: 1, burst_size: 2 });
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
