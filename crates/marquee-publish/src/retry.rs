//! Capped exponential backoff for publish attempts.

use std::time::Duration;

/// How many times a publish pipeline is attempted and how long to wait
/// between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts, including the first. Never zero.
  pub max_attempts:  u32,
  pub initial_delay: Duration,
  pub max_delay:     Duration,
  pub multiplier:    f64,
}

impl RetryPolicy {
  /// Delay before the attempt following failed attempt number `attempt`
  /// (1-indexed): `initial_delay * multiplier^(attempt - 1)`, capped at
  /// `max_delay`.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
    if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
      return self.max_delay;
    }
    Duration::from_secs_f64(secs.max(0.0))
  }
}
