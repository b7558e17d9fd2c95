use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::trace;

use crate::{
    error::{NetError, NetResult},
    types::RetryPolicy,
};

/// Attempt counter with exponentially growing, jittered delays between
/// attempts.
///
/// One `Backoff` covers the whole attempt sequence of one logical request.
#[derive(Clone, Debug)]
pub struct Backoff {
    max_attempts: u32,
    base_delay: Duration,
    fuzz_factor: f64,
    backoff_factor: f64,
    num_attempts: u32,
    next_unfuzzed_delay: Duration,
    auto_reset: bool,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        debug_assert!(policy.max_attempts >= 1, "max_attempts should be >= 1");
        debug_assert!(policy.fuzz_factor >= 0.0, "fuzz_factor should be >= 0");
        debug_assert!(policy.backoff_factor >= 0.0, "backoff_factor should be >= 0");

        Self {
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay,
            fuzz_factor: policy.fuzz_factor,
            backoff_factor: policy.backoff_factor,
            num_attempts: 0,
            next_unfuzzed_delay: policy.base_delay,
            auto_reset: false,
        }
    }

    /// Backoff for long-lived callers that never give up.
    ///
    /// The caller has already made its first attempt, so every `attempt()`
    /// delays; after `max_attempts` the cycle restarts from `base_delay`
    /// instead of failing.
    pub fn auto_reset(policy: &RetryPolicy) -> Self {
        debug_assert!(
            policy.max_attempts >= 2,
            "max_attempts must be >= 2 with auto-reset"
        );

        Self {
            num_attempts: 1,
            auto_reset: true,
            ..Self::new(policy)
        }
    }

    /// Number of attempts granted so far in the current cycle.
    pub fn attempts(&self) -> u32 {
        self.num_attempts
    }

    /// Resolves when the caller may make its next attempt.
    ///
    /// The first attempt is granted immediately; later ones wait for the
    /// fuzzed backoff delay.
    ///
    /// # Errors
    ///
    /// Returns an `AttemptsExhausted` error once `max_attempts` attempts have
    /// been granted (never in auto-reset mode).
    pub async fn attempt(&mut self) -> NetResult<()> {
        if self.num_attempts >= self.max_attempts {
            if !self.auto_reset {
                return Err(NetError::attempts_exhausted());
            }
            self.reset();
        }

        let current = self.num_attempts;
        self.num_attempts += 1;

        if current == 0 {
            return Ok(());
        }

        let delay = fuzz(self.next_unfuzzed_delay, self.fuzz_factor);
        trace!(attempt = current, ?delay, "backing off before next attempt");
        sleep(delay).await;

        self.next_unfuzzed_delay = scale(self.next_unfuzzed_delay, self.backoff_factor);
        Ok(())
    }

    fn reset(&mut self) {
        self.num_attempts = 1;
        self.next_unfuzzed_delay = self.base_delay;
    }
}

/// Spreads `value` uniformly over `value * [1 - fuzz_factor, 1 + fuzz_factor]`
/// so clients failing together do not retry together.
pub fn fuzz(value: Duration, fuzz_factor: f64) -> Duration {
    let spread: f64 = rand::rng().random_range(-1.0..=1.0);
    scale(value, 1.0 + spread * fuzz_factor)
}

fn scale(value: Duration, factor: f64) -> Duration {
    let secs = value.as_secs_f64() * factor.max(0.0);
    if secs.is_finite() {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::MAX
    }
}
