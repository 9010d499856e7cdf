//! Reconnect backoff policy.
//!
//! Delay for 1-indexed attempt `n` is `base × 1.5^(n-1)`. There is no cap
//! on the delay itself; the attempt ceiling bounds it instead.

use std::time::Duration;

use nano_settings::RealtimeSettings;

/// Multiplier applied to the delay on each consecutive attempt.
pub const GROWTH_FACTOR: f64 = 1.5;

/// Reconnect schedule derived from settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base: Duration,
    /// Attempts allowed before reconnection is abandoned.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Build from realtime settings.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self {
            base: settings.reconnect_interval(),
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Delay before 1-indexed `attempt`. Attempt 0 is treated as 1.
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base.as_millis() as f64 * GROWTH_FACTOR.powi(exponent);
        if millis.is_finite() && millis < u64::MAX as f64 {
            Duration::from_millis(millis.round() as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    /// Whether `attempts` made so far exhausts the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
