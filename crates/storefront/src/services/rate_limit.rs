//! Per-client rate limiter collaborator.
//!
//! Checkout asks the limiter before doing any work. The governor-backed
//! implementation keeps its state in process memory; a multi-instance
//! deployment needs an implementation over a shared store behind the same
//! trait.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as KeyedLimiter};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current burst.
    pub remaining: u32,
    /// How long to wait before retrying, when denied.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    /// Whole seconds to advertise in `Retry-After`, at least 1.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after
            .map_or(1, |wait| wait.as_secs() + u64::from(wait.subsec_nanos() > 0))
            .max(1)
    }
}

/// Given a client identity key, allow or deny a request.
pub trait RateLimiter: Send + Sync {
    /// Consume one unit of `key`'s budget if available.
    fn check(&self, key: &str) -> RateDecision;

    /// Drop state for keys idle long enough to be back at full budget.
    fn prune(&self) {}
}

type Limiter = KeyedLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// Keyed GCRA limiter from `governor`.
pub struct GovernorRateLimiter {
    limiter: Limiter,
}

impl GovernorRateLimiter {
    /// `per_minute` sustained requests with bursts of `burst`. Zero values
    /// are raised to 1.
    #[must_use]
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: KeyedLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
        }
    }

    /// Number of client keys currently holding state.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

impl RateLimiter for GovernorRateLimiter {
    fn check(&self, key: &str) -> RateDecision {
        match self.limiter.check_key(&key.to_owned()) {
            Ok(snapshot) => RateDecision {
                allowed: true,
                remaining: snapshot.remaining_burst_capacity(),
                retry_after: None,
            },
            Err(not_until) => RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(not_until.wait_time_from(DefaultClock::default().now())),
            },
        }
    }

    fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}
