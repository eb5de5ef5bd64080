use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy with random jitter.
///
/// - initial_delay: base delay for attempt 0
/// - multiplier: factor by which delay grows each attempt (> 1.0)
/// - max_delay: cap for the computed delay, before jitter
/// - jitter: fraction of the delay randomly added or removed, in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub const fn new(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter: f64,
    ) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            jitter,
        }
    }

    /// Delay for `attempt` without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let pow = self.multiplier.powi(exponent);
        let scaled = if pow.is_finite() {
            Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * pow)
                .unwrap_or(self.max_delay)
        } else {
            self.max_delay
        };
        scaled.min(self.max_delay)
    }

    /// Delay for `attempt` with jitter. Jitter outside `[0, 1]` is clamped and
    /// NaN disables it.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        if jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
    }
}
