use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Heap eviction settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Entries untouched for longer than this are evicted by the sweep.
    pub idle_threshold_ms: u64,
    /// Period of the background sweep.
    pub sweep_interval_ms: u64,
    /// Resident entry count above which the least recently used entries
    /// are evicted even if not idle. `None` disables the limit.
    pub max_resident: Option<usize>,
    /// Fraction of `max_resident` to shrink to once the limit is exceeded.
    pub low_watermark_ratio: f64,
    /// How long an explicit unload waits for the write lock.
    pub unload_timeout_ms: u64,
}

impl HeapConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn unload_timeout(&self) -> Duration {
        Duration::from_millis(self.unload_timeout_ms)
    }

    /// Entry count to shrink to under memory pressure.
    pub fn low_watermark(&self) -> Option<usize> {
        self.max_resident
            .map(|max| ((max as f64) * self.low_watermark_ratio.clamp(0.0, 1.0)) as usize)
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 60_000,
            sweep_interval_ms: 10_000,
            max_resident: None,
            low_watermark_ratio: 0.75,
            unload_timeout_ms: 5_000,
        }
    }
}
