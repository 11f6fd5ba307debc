//! Reconnect delay schedule

use std::time::Duration;

use crate::config::PoolConfig;

/// Exponential reconnect backoff without jitter.
///
/// `delay_for_attempt(n) = min(base * 2^n, max)`, so the default schedule is
/// 1s, 2s, 4s ... capped at 30s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn allows(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for ReconnectBackoff {
    fn from(config: &PoolConfig) -> Self {
        Self::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.max_reconnect_attempts,
        )
    }
}
