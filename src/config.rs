use std::sync::Arc;

use tokio::sync::RwLock;

/// Tunables for the policy server and the fairness controller.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// EMA smoothing coefficient in (0, 1]. Higher values track fresh
    /// measurements faster, lower values smooth harder.
    pub alpha: f64,
    /// Period of the fairness controller loop (the "fairy interval").
    pub fairy_interval_ms: u64,
    /// Deadline for a single per-job stats poll.
    pub stats_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            fairy_interval_ms: 1000,
            stats_timeout_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_fairy_interval_ms(mut self, interval_ms: u64) -> Self {
        self.fairy_interval_ms = interval_ms;
        self
    }

    pub fn with_stats_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stats_timeout_ms = timeout_ms;
        self
    }

    /// Wrap into the shared form held by long-running tasks.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Process-wide configuration view. The controller re-reads `alpha` at every
/// tick, so writes through this handle take effect at the next revision.
pub type SharedConfig = Arc<RwLock<SchedulerConfig>>;
