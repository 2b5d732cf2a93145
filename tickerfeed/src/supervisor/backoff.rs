use std::time::Duration;

use rand::Rng;
use tickerfeed_types::BackoffConfig;

/// `base_ms` plus a random extra of up to `jitter_percent` of it.
pub fn jitter_wait(base_ms: u64, jitter_percent: u32) -> u64 {
    let jitter_range = if jitter_percent == 0 {
        1
    } else {
        std::cmp::max(1, (base_ms.saturating_mul(u64::from(jitter_percent))) / 100)
    };
    let mut rng = rand::rng();
    base_ms + rng.random_range(0..jitter_range)
}

/// Exponential backoff with jitter, as used for reconnects and batch retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    cfg: BackoffConfig,
    current_ms: u64,
}

impl Backoff {
    #[must_use]
    pub fn new(cfg: BackoffConfig) -> Self {
        let current_ms = cfg.min_backoff_ms;
        Self { cfg, current_ms }
    }

    /// Delay to wait now; the following one grows by `factor`, capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let wait = jitter_wait(self.current_ms, u32::from(self.cfg.jitter_percent));
        self.current_ms = self
            .current_ms
            .saturating_mul(u64::from(self.cfg.factor.max(1)))
            .min(self.cfg.max_backoff_ms.max(self.cfg.min_backoff_ms));
        Duration::from_millis(wait)
    }

    /// Start over from the minimum delay.
    pub fn reset(&mut self) {
        self.current_ms = self.cfg.min_backoff_ms;
    }

    /// Adopt new bounds without losing progress.
    pub fn reconfigure(&mut self, cfg: BackoffConfig) {
        self.current_ms = self
            .current_ms
            .clamp(cfg.min_backoff_ms, cfg.max_backoff_ms.max(cfg.min_backoff_ms));
        self.cfg = cfg;
    }

    /// Longest delay `next_delay` can return for the current configuration.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let max = self.cfg.max_backoff_ms.max(self.cfg.min_backoff_ms);
        Duration::from_millis(max + max * u64::from(self.cfg.jitter_percent) / 100 + 1)
    }
}
