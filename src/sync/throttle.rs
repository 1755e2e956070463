//! Request throttling for remote calls.
//!
//! Object stores rate-limit per prefix; a token bucket keeps every pool
//! under a shared requests-per-second budget.

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared request limiter. Cloning shares the same bucket.
#[derive(Clone, Default)]
pub struct RequestLimiter {
    limiter: Option<Arc<DirectLimiter>>,
    per_second: Option<NonZeroU32>,
}

impl RequestLimiter {
    /// Limit to `per_second` requests; `None` or zero means unlimited.
    pub fn new(per_second: Option<u32>) -> Self {
        match per_second.and_then(NonZeroU32::new) {
            Some(rate) => {
                // Burst capacity equals one second's worth of requests
                let quota = Quota::per_second(rate);
                Self {
                    limiter: Some(Arc::new(RateLimiter::direct(quota))),
                    per_second: Some(rate),
                }
            }
            None => Self::unlimited(),
        }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None, per_second: None }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    pub fn per_second(&self) -> Option<u32> {
        self.per_second.map(NonZeroU32::get)
    }

    /// Wait for permission to issue one request.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Check if a request may be issued without waiting.
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("per_second", &self.per_second)
            .finish()
    }
}
