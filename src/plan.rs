//! Executes a configured `[[steps]]` plan against a [`TestContext`].

use crate::config::{DefaultsConfig, StepConfig};
use crate::context::TestContext;
use crate::power;
use crate::steps::{self, MeasurementSummary};
use crate::sweep::{self, SweepReport};
use semitest_core::broadcast::BroadcastParameterSet;
use semitest_core::error::{StepFailure, TestError, TestResult};
use semitest_core::settings::{seconds, MeasureSettings};
use semitest_driver_mock::MockBench;
use thiserror::Error;
use tracing::Instrument;

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Measured(MeasurementSummary),
    Swept(SweepReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub index: usize,
    pub kind: &'static str,
    pub outcome: StepOutcome,
}

/// A step of the plan failed; later steps were not run.
#[derive(Error, Debug)]
#[error("step {index} ({kind}) failed: {source}")]
pub struct PlanError {
    pub index: usize,
    pub kind: &'static str,
    #[source]
    pub source: TestError,
}

impl PlanError {
    /// Translate into the code reported to the caller.
    pub fn into_failure(self) -> StepFailure {
        StepFailure::from_error(self.source)
    }
}

/// Context wired to every collaborator of a simulated bench.
pub fn bench_context(bench: &MockBench, defaults: &DefaultsConfig) -> TestContext {
    TestContext::new(
        bench.pin_map.clone(),
        bench.pin_map.clone(),
        bench.publisher.clone(),
    )
    .with_controller(bench.smu.clone())
    .with_controller(bench.ppmu.clone())
    .with_lowest_current_limit(defaults.lowest_current_limit_a)
}

/// Run `steps` in order, stopping at the first failure.
pub async fn execute(
    ctx: &TestContext,
    defaults: &DefaultsConfig,
    steps: &[StepConfig],
) -> Result<Vec<StepRecord>, PlanError> {
    let mut records = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let kind = step.kind();
        let span = tracing::info_span!("step", index, kind);
        match run_step(ctx, defaults, step).instrument(span).await {
            Ok(outcome) => records.push(StepRecord {
                index,
                kind,
                outcome,
            }),
            Err(source) => {
                tracing::error!(index, kind, error = %source, "step failed");
                return Err(PlanError {
                    index,
                    kind,
                    source,
                });
            }
        }
    }
    Ok(records)
}

async fn run_step(
    ctx: &TestContext,
    defaults: &DefaultsConfig,
    step: &StepConfig,
) -> TestResult<StepOutcome> {
    let settle_or_default = |value: Option<f64>| seconds(value.unwrap_or(defaults.settle_time_s));
    let settle_times = |values: &[f64]| {
        if values.is_empty() {
            vec![defaults.settle_time_s]
        } else {
            values.to_vec()
        }
    };

    match step {
        StepConfig::ForceVoltage {
            pins,
            levels,
            limits,
            settle_times: times,
        } => {
            let params = BroadcastParameterSet::new(levels.clone(), limits.clone())
                .with_settle_times(settle_times(times));
            steps::force_voltage(ctx, pins, &params).await?;
            Ok(StepOutcome::Completed)
        }
        StepConfig::ForceCurrent {
            pins,
            levels,
            limits,
            settle_times: times,
        } => {
            let params = BroadcastParameterSet::new(levels.clone(), limits.clone())
                .with_settle_times(settle_times(times));
            steps::force_current(ctx, pins, &params).await?;
            Ok(StepOutcome::Completed)
        }
        StepConfig::Measure {
            pins,
            measurement,
            aperture_time_s,
        } => {
            let settings = MeasureSettings::new(*measurement)
                .with_aperture_time(aperture_time_s.or(defaults.aperture_time_s));
            let summary = steps::measure_with_settings(ctx, pins, settings).await?;
            Ok(StepOutcome::Measured(summary))
        }
        StepConfig::ForceVoltageMeasureCurrent {
            pins,
            voltage,
            current_limit,
            aperture_time_s,
            settle_time_s,
        } => {
            let summary = steps::force_voltage_measure_current(
                ctx,
                pins,
                *voltage,
                *current_limit,
                aperture_time_s.or(defaults.aperture_time_s),
                settle_or_default(*settle_time_s),
            )
            .await?;
            Ok(StepOutcome::Measured(summary))
        }
        StepConfig::PowerUp {
            pins,
            voltages,
            current_limits,
            settle_time_s,
            serial,
        } => {
            power::power_up(
                ctx,
                pins,
                voltages,
                current_limits,
                settle_or_default(*settle_time_s),
                *serial,
            )
            .await?;
            Ok(StepOutcome::Completed)
        }
        StepConfig::PowerDown {
            pins,
            settle_time_s,
            serial,
            force_lowest_current_limit,
        } => {
            power::power_down(
                ctx,
                pins,
                settle_or_default(*settle_time_s),
                *serial,
                *force_lowest_current_limit,
            )
            .await?;
            Ok(StepOutcome::Completed)
        }
        StepConfig::Continuity(params) => {
            Ok(StepOutcome::Swept(sweep::continuity_test(ctx, params).await?))
        }
        StepConfig::Leakage(params) => Ok(StepOutcome::Swept(sweep::leakage_test(ctx, params).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SemitestConfig;
    use semitest_core::family::ChannelFamily;
    use semitest_driver_mock::ErrorConfig;

    const BENCH: &str = r#"
        [bench]
        sites = [0]

        [[bench.pins]]
        name = "VDD"
        family = "smu"

        [[bench.pins]]
        name = "IO0"
        family = "ppmu"
    "#;

    fn plan(steps: &str) -> SemitestConfig {
        SemitestConfig::from_toml_str(&format!("{BENCH}\n{steps}")).unwrap()
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let config = plan(
            r#"
            [[steps]]
            kind = "power_up"
            pins = ["VDD"]
            voltages = [1.0]
            current_limits = [0.01]

            [[steps]]
            kind = "measure"
            pins = ["VDD", "IO0"]
            measurement = "current"

            [[steps]]
            kind = "power_down"
            pins = ["VDD", "IO0"]
            "#,
        );
        let bench = MockBench::from_config(&config.bench);
        let ctx = bench_context(&bench, &config.defaults);

        let records = execute(&ctx, &config.defaults, &config.steps).await.unwrap();

        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec!["power_up", "measure", "power_down"]);
        assert!(matches!(
            &records[1].outcome,
            StepOutcome::Measured(summary) if summary.total_current.as_ref().map(Vec::len) == Some(1)
        ));
        assert!(bench.log.energized_pins().is_empty());
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let config = plan(
            r#"
            [[steps]]
            kind = "measure"
            pins = ["VDD", "GHOST"]

            [[steps]]
            kind = "power_down"
            pins = ["VDD"]
            "#,
        );
        let bench = MockBench::from_config(&config.bench);
        let ctx = bench_context(&bench, &config.defaults);

        let error = execute(&ctx, &config.defaults, &config.steps)
            .await
            .unwrap_err();
        assert_eq!(error.index, 0);
        assert!(matches!(error.source, TestError::UnresolvedPin(ref pin) if pin == "GHOST"));
        assert!(bench.log.is_empty());
    }

    #[tokio::test]
    async fn failure_translates_to_driver_code() {
        let config = plan(
            r#"
            [[steps]]
            kind = "force_voltage"
            pins = ["IO0"]
            levels = [1.0]
            limits = [0.01]
            "#,
        );
        let pin_map = semitest_driver_mock::MockPinMap::from_specs(
            config.bench.sites.clone(),
            &config.bench.pins,
            &config.bench.groups,
        );
        let bench = MockBench::with_errors(
            pin_map,
            ChannelFamily::DigitalPpmu,
            ErrorConfig::fail_on_pin(semitest_driver_mock::OP_FORCE, "IO0", -1074118650),
        );
        let ctx = bench_context(&bench, &config.defaults);

        let failure = execute(&ctx, &config.defaults, &config.steps)
            .await
            .unwrap_err()
            .into_failure();
        assert_eq!(failure.code, -1074118650);
    }
}
