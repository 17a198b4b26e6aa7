//! Reconnect delay policy

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with a capped maximum and proportional jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound on any delay, jitter included
    pub max: Duration,
    /// Growth factor per failed attempt
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    /// Out-of-range factors are clamped; non-finite ones fall back to defaults
    fn from(config: &ReconnectConfig) -> Self {
        let defaults = Self::default();
        let multiplier = if config.multiplier.is_finite() {
            config.multiplier.max(1.0)
        } else {
            warn!("Ignoring reconnect multiplier {}", config.multiplier);
            defaults.multiplier
        };
        let jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, 1.0)
        } else {
            warn!("Ignoring reconnect jitter {}", config.jitter);
            defaults.jitter
        };

        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            multiplier,
            jitter,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `attempt` (0-based), jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }

        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let millis = base.as_millis() as f64 * (1.0 + spread);
        let bounded = millis.clamp(0.0, self.max.as_millis() as f64);
        Duration::from_millis(bounded as u64)
    }
}
