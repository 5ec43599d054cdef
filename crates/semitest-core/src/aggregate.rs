//! Per-site accumulation across channel families.
//!
//! Each family branch of a measurement fan-out calls [`SiteAggregator::accumulate`]
//! as its results arrive. Once every branch has joined, the step calls
//! [`SiteAggregator::publish`] with the caller's site universe to get a dense
//! vector aligned to that ordering.

use dashmap::DashMap;

/// Concurrent site -> running total map.
///
/// Accumulation is an atomic upsert-add per site key, so the final totals do
/// not depend on the order in which families complete.
#[derive(Debug, Default)]
pub struct SiteAggregator {
    totals: DashMap<u32, f64>,
}

impl SiteAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` into the total for `site`, starting from zero.
    pub fn accumulate(&self, site: u32, value: f64) {
        *self.totals.entry(site).or_insert(0.0) += value;
    }

    /// Add every `(site, value)` pair.
    pub fn accumulate_all<I>(&self, values: I)
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        for (site, value) in values {
            self.accumulate(site, value);
        }
    }

    /// Total for one site, if anything was accumulated for it.
    pub fn total(&self, site: u32) -> Option<f64> {
        self.totals.get(&site).map(|entry| *entry.value())
    }

    /// One value per entry of `site_numbers`, in that order.
    ///
    /// Sites that never received a value publish as zero.
    pub fn publish(&self, site_numbers: &[u32]) -> Vec<f64> {
        let values: Vec<f64> = site_numbers
            .iter()
            .map(|site| self.total(*site).unwrap_or(0.0))
            .collect();
        tracing::debug!(
            sites = site_numbers.len(),
            accumulated = self.totals.len(),
            "publishing per-site totals"
        );
        values
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}
