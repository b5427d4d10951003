use std::time::Duration;

use rand::Rng;

/// Upper bound on jitter as a fraction of the delay.
const JITTER_RATIO: f64 = 0.1;

/// `base * 2^(attempt - 1)`, capped at `max`.
#[must_use]
pub fn base_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// [`base_delay`] plus up to 10% random jitter.
#[must_use]
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = base_delay(attempt, base, max);
    let jitter = rand::rng().random_range(0.0..=JITTER_RATIO);
    delay + delay.mul_f64(jitter)
}
