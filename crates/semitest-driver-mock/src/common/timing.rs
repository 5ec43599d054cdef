//! Simulated driver latency.

use std::time::Duration;

/// Per-call delays applied by a mock channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Delay of one `force` call in milliseconds
    pub force_delay_ms: u64,
    /// Delay of one `measure` call in milliseconds
    pub measure_delay_ms: u64,
}

impl TimingConfig {
    /// No delays; the default for unit tests.
    pub fn instant() -> Self {
        Self::default()
    }

    /// Delays in the range of a real PXI source-measure call.
    pub fn realistic() -> Self {
        Self {
            force_delay_ms: 5,
            measure_delay_ms: 10,
        }
    }

    pub fn force_delay(&self) -> Duration {
        Duration::from_millis(self.force_delay_ms)
    }

    pub fn measure_delay(&self) -> Duration {
        Duration::from_millis(self.measure_delay_ms)
    }
}
