//! Engine configuration

use std::time::Duration;

/// Configuration for an [`Engine`](crate::engine::Engine) instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a resource may sit in `PendingActivation` before the
    /// watchdog marks it `Failed`
    pub pending_activation_timeout: Duration,
    /// Interval at which the stalled-activation watchdog runs
    pub watchdog_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_activation_timeout: Duration::from_secs(300),
            watchdog_period: Duration::from_secs(30),
        }
    }
}
