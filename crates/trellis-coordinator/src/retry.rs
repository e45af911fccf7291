use std::time::Duration;

/// Bounded retry with exponential backoff.
///
/// Applied by workers around a single execute-one-job call, and
/// separately (with its own bounds) around webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts, the first one included.
  pub max_attempts: u32,
  /// Delay before the first retry.
  pub base_delay: Duration,
  /// Backoff factor applied per retry.
  pub multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_secs(60),
      multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      base_delay: Duration::ZERO,
      multiplier: 1.0,
    }
  }

  /// Delay before the given retry, zero-based: `base * multiplier^n`.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let factor = self.multiplier.powi(retry as i32);
    self.base_delay.mul_f64(factor.max(0.0))
  }
}
