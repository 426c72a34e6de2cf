//! Token-bucket rate limiter (§4.3). Used by the hatcher for spawn pacing
//! and, optionally, by the scheduler for a global RPS ceiling.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter as Governor};

/// A token-bucket gate. `acquire()` blocks the caller until a token is
/// available. Construct with a non-positive rate to get a limiter whose
/// `acquire()` always resolves immediately (disabled).
#[derive(Clone)]
pub struct RateLimiter {
    inner: Option<Arc<Governor<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl RateLimiter {
    /// `rate` is tokens/second, replenished one at a time every `1/rate`
    /// seconds, with a burst capacity of exactly one token.
    ///
    /// §4.3 describes the steady-state capacity as "one second of tokens"
    /// (i.e. burst == rate), but that is in direct tension with §8's S1
    /// scenario and invariant 2, both of which expect only a one-token
    /// startup burst: a full `rate`-sized burst would let `hatch_rate=2.0`,
    /// `num_clients=4` admit all four clones in ~1s instead of the ≥2s S1
    /// describes. This constructs the bucket the scenarios actually assert
    /// — a strict pacing gate with a single token of startup slack — rather
    /// than the literal one-second capacity reading of §4.3.
    pub fn new(rate: f64) -> Self {
        if rate <= 0.0 {
            return Self { inner: None };
        }
        let period = Duration::from_secs_f64(1.0 / rate).max(Duration::from_nanos(1));
        let quota = Quota::with_period(period)
            .expect("period is positive")
            .allow_burst(NonZeroU32::new(1).expect("1 is nonzero"));
        Self {
            inner: Some(Arc::new(Governor::direct(quota))),
        }
    }

    /// A limiter that never blocks — used when a rate is not configured
    /// (`max_rps == 0`).
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Block until one token is available. No-op when disabled.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}
