use serde::Deserialize;
use std::time::Duration;

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_resync_interval_secs() -> u64 {
    600
}

/// Settings for one [`Controller`](crate::Controller).
///
/// ```yaml
/// controller:
///   max-concurrent-reconciles: 8
///   base-backoff-ms: 250
///   max-backoff-secs: 120
///   resync-interval-secs: 0   # disable periodic resync
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerConfig {
    /// Reconciles of different objects running at the same time.
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Every object is re-enqueued at this interval. `0` disables it.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

impl ControllerConfig {
    pub fn with_max_concurrent_reconciles(mut self, max: usize) -> Self {
        self.max_concurrent_reconciles = max;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff_ms = base.as_millis().try_into().unwrap_or(u64::MAX);
        self.max_backoff_secs = max.as_secs();
        self
    }

    pub fn with_resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval_secs = interval.map(|d| d.as_secs()).unwrap_or(0);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_reconciles == 0 {
            return Err("controller.max-concurrent-reconciles must be at least 1".into());
        }
        if self.base_backoff_ms == 0 {
            return Err("controller.base-backoff-ms must be positive".into());
        }
        if Duration::from_millis(self.base_backoff_ms) > self.max_backoff() {
            return Err("controller.base-backoff-ms exceeds controller.max-backoff-secs".into());
        }
        Ok(())
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// `base * 2^attempt`, capped at [`max_backoff`](Self::max_backoff).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor)).min(self.max_backoff())
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}
