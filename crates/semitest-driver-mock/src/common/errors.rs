//! Error injection for simulated channel families.
//!
//! A scenario can target one operation, optionally restricted to calls that
//! touch a given pin, so a test can make exactly one pin of a sweep fail.
//! Produces `semitest_core::DriverError` values the same way a real driver
//! binding would, including native codes and the `Error code: -N` message
//! fragment some instrument drivers emit.

use super::rng::MockRng;
use parking_lot::Mutex;
use semitest_core::error::{DriverError, DriverErrorKind, DriverResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration for one mock channel family
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); `"*"` matches every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    /// Calls seen per operation, for `FailAfterN`
    operation_counts: Arc<Mutex<HashMap<&'static str, u32>>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call of `operation`; with `pin`, only calls that include it.
    FailOperation {
        operation: &'static str,
        pin: Option<String>,
        code: i32,
    },
    /// Fail every call of `operation` after `count` successful ones
    FailAfterN { operation: &'static str, count: u32 },
    /// Time out on `operation`
    Timeout { operation: &'static str },
    /// Fail every call with an `Error code: <code>` message
    HardwareFault { code: i32 },
}

impl ErrorConfig {
    /// No injected errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation, reproducible with `seed`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self::build(HashMap::from([("*", rate)]), Vec::new(), seed)
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Fail `operation` whenever it touches `pin`.
    pub fn fail_on_pin(operation: &'static str, pin: impl Into<String>, code: i32) -> Self {
        Self::scenario(ErrorScenario::FailOperation {
            operation,
            pin: Some(pin.into()),
            code,
        })
    }

    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            operation_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether a call of `operation` touching `pins` should fail.
    pub fn check_operation(
        &self,
        driver: &str,
        operation: &'static str,
        pins: &[String],
    ) -> DriverResult<()> {
        let count = {
            let mut counts = self.operation_counts.lock();
            let count = counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailOperation {
                    operation: op,
                    pin,
                    code,
                } if *op == operation => {
                    let hit = match pin {
                        Some(target) => pins.iter().any(|p| p == target),
                        None => true,
                    };
                    if hit {
                        let target = pin.as_deref().unwrap_or("*");
                        return Err(DriverError::new(
                            driver,
                            DriverErrorKind::Hardware,
                            format!("Injected '{operation}' failure on pin '{target}'"),
                        )
                        .with_code(*code));
                    }
                }
                ErrorScenario::FailAfterN { operation: op, count: limit } if *op == operation => {
                    if count > *limit {
                        return Err(DriverError::new(
                            driver,
                            DriverErrorKind::Hardware,
                            format!("Injected failure after {limit} '{operation}' calls"),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver,
                        DriverErrorKind::Timeout,
                        format!("Operation '{operation}' timed out"),
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    return Err(DriverError::new(
                        driver,
                        DriverErrorKind::Hardware,
                        format!("Hardware fault during '{operation}'. Error code: {code}"),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{operation}'"),
            ));
        }

        Ok(())
    }

    /// Clear operation counters.
    pub fn reset(&self) {
        self.operation_counts.lock().clear();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_errors_by_default() {
        let config = ErrorConfig::default();
        for _ in 0..100 {
            assert!(config.check_operation("smu", "force", &pins(&["A"])).is_ok());
        }
    }

    #[test]
    fn pin_targeted_failure_only_hits_that_pin() {
        let config = ErrorConfig::fail_on_pin("measure", "B", -1_074_118_644);
        assert!(config.check_operation("smu", "measure", &pins(&["A"])).is_ok());
        assert!(config.check_operation("smu", "force", &pins(&["B"])).is_ok());

        let err = config
            .check_operation("smu", "measure", &pins(&["A", "B"]))
            .unwrap_err();
        assert_eq!(err.code, Some(-1_074_118_644));
        assert_eq!(err.kind, DriverErrorKind::Hardware);
    }

    #[test]
    fn fail_after_n_then_reset() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "force",
            count: 2,
        });
        assert!(config.check_operation("ppmu", "force", &[]).is_ok());
        assert!(config.check_operation("ppmu", "force", &[]).is_ok());
        assert!(config.check_operation("ppmu", "force", &[]).is_err());

        config.reset();
        assert!(config.check_operation("ppmu", "force", &[]).is_ok());
    }

    #[test]
    fn timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "power_down",
        });
        let err = config.check_operation("smu", "power_down", &[]).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn hardware_fault_embeds_error_code_in_message() {
        let config = ErrorConfig::scenario(ErrorScenario::HardwareFault { code: -1_074_097_794 });
        let err = config.check_operation("ppmu", "force", &[]).unwrap_err();
        assert_eq!(
            semitest_core::error::parse_error_code(&err.to_string()),
            Some(-1_074_097_794)
        );
        assert_eq!(err.code, None);
    }

    #[test]
    fn seeded_random_failures_are_reproducible() {
        let a = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let b = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let run = |c: &ErrorConfig| -> Vec<bool> {
            (0..32)
                .map(|_| c.check_operation("smu", "measure", &[]).is_err())
                .collect()
        };
        assert_eq!(run(&a), run(&b));
    }
}
