//! Per-pin-group parameter broadcasting.
//!
//! Every per-pin-group array follows the same rule: its length is 0 (use the
//! default), 1 (broadcast to every pin group), or exactly the pin-group count.
//! Validation is pure and eager; arrays are never rewritten. Values are
//! expanded lazily with [`element_at_or_first`].

use crate::error::{TestError, TestResult};
use crate::settings::{MeasurementSense, TransientResponse};
use serde::{Deserialize, Serialize};

/// Check one array length against the 0/1/N rule.
pub fn validate_array_len(name: &str, actual: usize, expected: usize) -> TestResult<()> {
    if actual == 0 || actual == 1 || actual == expected {
        return Ok(());
    }
    Err(TestError::ParameterArraySizeMismatch {
        name: name.to_string(),
        actual,
        expected,
    })
}

/// Check every `(name, length)` pair against the 0/1/N rule.
///
/// Fails on the first offending array, in the order given.
pub fn validate_broadcast(expected: usize, arrays: &[(&str, usize)]) -> TestResult<()> {
    arrays
        .iter()
        .try_for_each(|(name, actual)| validate_array_len(name, *actual, expected))
}

/// `values[index]` when present, otherwise `values[0]`, otherwise `None`.
pub fn element_at_or_first<T: Copy>(values: &[T], index: usize) -> Option<T> {
    values.get(index).or_else(|| values.first()).copied()
}

/// Named per-pin-group arrays for a mixed-signal force step.
///
/// `levels` holds voltages or currents depending on the step; `limits` holds
/// the complementary compliance limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastParameterSet {
    pub levels: Vec<f64>,
    pub limits: Vec<f64>,
    #[serde(default)]
    pub aperture_times: Vec<f64>,
    #[serde(default)]
    pub settle_times: Vec<f64>,
    #[serde(default)]
    pub senses: Vec<MeasurementSense>,
    #[serde(default)]
    pub transient_responses: Vec<TransientResponse>,
}

impl BroadcastParameterSet {
    pub fn new(levels: Vec<f64>, limits: Vec<f64>) -> Self {
        Self {
            levels,
            limits,
            ..Default::default()
        }
    }

    pub fn with_aperture_times(mut self, values: Vec<f64>) -> Self {
        self.aperture_times = values;
        self
    }

    pub fn with_settle_times(mut self, values: Vec<f64>) -> Self {
        self.settle_times = values;
        self
    }

    pub fn with_senses(mut self, values: Vec<MeasurementSense>) -> Self {
        self.senses = values;
        self
    }

    pub fn with_transient_responses(mut self, values: Vec<TransientResponse>) -> Self {
        self.transient_responses = values;
        self
    }

    fn lengths(&self) -> [(&'static str, usize); 6] {
        [
            ("levels", self.levels.len()),
            ("limits", self.limits.len()),
            ("aperture_times", self.aperture_times.len()),
            ("settle_times", self.settle_times.len()),
            ("senses", self.senses.len()),
            ("transient_responses", self.transient_responses.len()),
        ]
    }

    /// Validate against `pin_group_count`.
    ///
    /// Levels and limits have no default, so they must also be non-empty.
    pub fn validate(&self, pin_group_count: usize) -> TestResult<()> {
        validate_broadcast(pin_group_count, &self.lengths())?;
        if self.levels.is_empty() {
            return Err(TestError::MissingParameter("levels".into()));
        }
        if self.limits.is_empty() {
            return Err(TestError::MissingParameter("limits".into()));
        }
        Ok(())
    }

    /// Level for the pin group at `index`. Zero if `levels` is empty.
    pub fn level(&self, index: usize) -> f64 {
        element_at_or_first(&self.levels, index).unwrap_or_default()
    }

    /// Limit for the pin group at `index`. Zero if `limits` is empty.
    pub fn limit(&self, index: usize) -> f64 {
        element_at_or_first(&self.limits, index).unwrap_or_default()
    }

    pub fn aperture_time(&self, index: usize) -> Option<f64> {
        element_at_or_first(&self.aperture_times, index)
    }

    pub fn settle_time(&self, index: usize) -> Option<f64> {
        element_at_or_first(&self.settle_times, index)
    }

    pub fn sense(&self, index: usize) -> Option<MeasurementSense> {
        element_at_or_first(&self.senses, index)
    }

    pub fn transient_response(&self, index: usize) -> Option<TransientResponse> {
        element_at_or_first(&self.transient_responses, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_zero_one_or_n() {
        for n in 0..6usize {
            for len in 0..8usize {
                let ok = validate_array_len("limits", len, n).is_ok();
                assert_eq!(ok, len == 0 || len == 1 || len == n, "n={n} len={len}");
            }
        }
    }

    #[test]
    fn mismatch_names_parameter_and_length() {
        let err = validate_broadcast(4, &[("levels", 4), ("settle_times", 3)]).unwrap_err();
        assert_eq!(
            err,
            TestError::ParameterArraySizeMismatch {
                name: "settle_times".into(),
                actual: 3,
                expected: 4,
            }
        );
    }

    #[test]
    fn single_limit_broadcasts_to_every_group() {
        let params = BroadcastParameterSet::new(vec![1.0, 2.0, 3.0, 4.0], vec![0.1]);
        params.validate(4).unwrap();
        for i in 0..4 {
            assert_eq!(params.limit(i), 0.1);
        }
        assert_eq!(params.level(2), 3.0);
    }

    #[test]
    fn empty_optional_arrays_default_to_none() {
        let params = BroadcastParameterSet::new(vec![1.0], vec![0.01]);
        params.validate(3).unwrap();
        assert_eq!(params.aperture_time(1), None);
        assert_eq!(params.sense(2), None);
    }

    #[test]
    fn empty_levels_are_rejected() {
        let params = BroadcastParameterSet::new(vec![], vec![0.01]);
        assert_eq!(
            params.validate(2).unwrap_err(),
            TestError::MissingParameter("levels".into())
        );
    }
}
