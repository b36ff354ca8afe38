//! Retry backoff policy

use std::time::Duration;

/// Wait between a failed attempt and the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure
    Constant(Duration),
    /// delay = base * 2^(failures - 1), capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn none() -> Self {
        Backoff::Constant(Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match *self {
            Backoff::Constant(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = failed_attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::none()
    }
}
