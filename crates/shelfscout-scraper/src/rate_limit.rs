//! Per-origin token bucket for the gateway.
//!
//! One GCRA bucket per origin (`scheme://host:port`), shared by every caller
//! of the same gateway. Acquisition never blocks: the gateway decides how
//! long to sleep so the wait stays inside the caller's budget.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::error::ScraperError;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct OriginLimiter {
    limiter: KeyedLimiter,
}

impl OriginLimiter {
    /// Builds a limiter refilling at `requests_per_sec` with `burst` capacity
    /// per origin.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidSettings`] for a non-positive rate or a
    /// zero burst.
    pub fn new(requests_per_sec: f64, burst: u32) -> Result<Self, ScraperError> {
        if !(requests_per_sec.is_finite() && requests_per_sec > 0.0) {
            return Err(ScraperError::InvalidSettings(format!(
                "requests_per_sec must be positive, got {requests_per_sec}"
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / requests_per_sec)
            .map_err(|e| ScraperError::InvalidSettings(format!("refill period: {e}")))?;
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| ScraperError::InvalidSettings("burst must be at least 1".to_string()))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| ScraperError::InvalidSettings("refill period is zero".to_string()))?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::keyed(quota),
        })
    }

    /// Draws one token for `origin`. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self, origin: &str) -> bool {
        self.limiter.check_key(&origin.to_string()).is_ok()
    }
}
