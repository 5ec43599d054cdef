//! Continuity and leakage sweeps against the simulated bench.

mod common;

use common::{bench, context, failing_bench, names};
use semitest::sweep::{continuity_test, leakage_test, ContinuityParameters, LeakageParameters, SweepPhase};
use semitest_core::error::{StepFailure, TestError};
use semitest_core::family::ChannelFamily;
use semitest_core::limits::tags;
use semitest_core::settings::{ComplianceLimit, OutputFunction};
use semitest_driver_mock::{ErrorConfig, EventKind, OP_MEASURE};

fn continuity_params() -> ContinuityParameters {
    ContinuityParameters {
        supply_pins: names(&["VDD"]),
        supply_current_limits: vec![0.05],
        continuity_pins: names(&["Sweep"]),
        current_levels: vec![-1e-4],
        voltage_limits_high: vec![1.5],
        voltage_limits_low: vec![-1.5],
        aperture_time: 0.0005,
        settle_time: 0.0,
    }
}

fn leakage_params(serial: bool) -> LeakageParameters {
    LeakageParameters {
        pins: names(&["A", "B", "C"]),
        voltage_level: 1.0,
        current_limit: 0.01,
        aperture_time: 0.001,
        settle_time: 0.0,
        serial,
    }
}

#[tokio::test]
async fn continuity_energizes_one_pin_at_a_time() {
    let bench = bench();
    let ctx = context(&bench);

    let report = continuity_test(&ctx, &continuity_params()).await.unwrap();

    assert_eq!(bench.log.max_simultaneously_energized(&["A", "B", "C"]), 1);
    for pin in ["A", "B", "C"] {
        assert_eq!(bench.log.last_forced_level(pin), Some(0.0), "{pin} not zeroed");
    }
    assert!(bench.log.energized_pins().is_empty());

    assert_eq!(report.measurements.len(), 3);
    assert_eq!(report.phases.first(), Some(&SweepPhase::Idle));
    assert_eq!(report.phases.last(), Some(&SweepPhase::Done));
    assert!(report.phases.windows(2).all(|w| w[0].can_advance_to(w[1])));

    let published: Vec<_> = bench
        .publisher
        .per_channel(tags::CONTINUITY)
        .into_iter()
        .map(|v| v.pin)
        .collect();
    assert_eq!(published, names(&["A", "B", "C"]));
}

#[tokio::test]
async fn continuity_forces_current_with_asymmetric_window() {
    let bench = bench();
    let ctx = context(&bench);

    continuity_test(&ctx, &continuity_params()).await.unwrap();

    let forced = bench
        .log
        .events_for("B")
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::Force {
                function: OutputFunction::DcCurrent,
                level,
                limit,
            } => Some((level, limit)),
            _ => None,
        })
        .unwrap();
    assert_eq!(forced.0, -1e-4);
    assert_eq!(
        forced.1,
        ComplianceLimit::Asymmetric {
            high: 1.5,
            low: -1.5
        }
    );

    // Zeroing uses the largest continuity current as its limit.
    let zero_limit = bench.log.events_for("C").into_iter().find_map(|e| match e.kind {
        EventKind::Force { level, limit, .. } if level == 0.0 => Some(limit.magnitude()),
        _ => None,
    });
    assert_eq!(zero_limit, Some(1e-4));
}

#[tokio::test]
async fn continuity_failure_zeroes_the_failed_pin_and_stops() {
    let bench = failing_bench(
        ChannelFamily::DigitalPpmu,
        ErrorConfig::fail_on_pin(OP_MEASURE, "B", -1074097793),
    );
    let ctx = context(&bench);

    let error = continuity_test(&ctx, &continuity_params()).await.unwrap_err();

    match &error {
        TestError::SweepAborted { pin_index, pin, .. } => {
            assert_eq!(*pin_index, 1);
            assert_eq!(pin, "B");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(bench.log.last_forced_level("B"), Some(0.0));
    assert!(!bench.log.events_for("C").iter().any(|e| e.energizes()));
    assert!(bench.log.energized_pins().is_empty());
    assert_eq!(StepFailure::from_error(error).code, -1074097793);
}

#[tokio::test]
async fn continuity_validates_before_touching_hardware() {
    let bench = bench();
    let ctx = context(&bench);
    let mut params = continuity_params();
    params.current_levels = vec![-1e-4, -2e-4];

    let error = continuity_test(&ctx, &params).await.unwrap_err();

    assert!(matches!(
        error,
        TestError::ParameterArraySizeMismatch { ref name, actual: 2, expected: 1 } if name == "current_levels"
    ));
    assert!(bench.log.is_empty());

    let mut params = continuity_params();
    params.voltage_limits_low.clear();
    let error = continuity_test(&ctx, &params).await.unwrap_err();
    assert!(matches!(error, TestError::MissingParameter(ref name) if name == "voltage_limits_low"));
    assert!(bench.log.is_empty());
}

#[tokio::test]
async fn serial_leakage_measures_in_request_order() {
    let bench = bench();
    let ctx = context(&bench);

    let report = leakage_test(&ctx, &leakage_params(true)).await.unwrap();

    let pins: Vec<_> = report.measurements.iter().map(|m| m.pin.as_str()).collect();
    assert_eq!(pins, vec!["A", "B", "C"]);
    assert!(report
        .measurements
        .iter()
        .all(|m| m.current.is_some() && m.voltage.is_none()));
    assert_eq!(bench.log.max_simultaneously_energized(&["A", "B", "C"]), 1);
    assert_eq!(bench.publisher.per_channel(tags::LEAKAGE).len(), 3);
}

#[tokio::test]
async fn parallel_leakage_forces_every_pin_then_zeroes() {
    let bench = bench();
    let ctx = context(&bench);

    let report = leakage_test(&ctx, &leakage_params(false)).await.unwrap();

    assert_eq!(report.measurements.len(), 3);
    assert!(!report
        .phases
        .iter()
        .any(|p| matches!(p, SweepPhase::ForcingPin(_))));
    assert_eq!(bench.log.max_simultaneously_energized(&["A", "B", "C"]), 3);
    assert!(bench.log.energized_pins().is_empty());

    // 1 V across the default 1 kOhm load.
    let leakage = bench.publisher.per_channel(tags::LEAKAGE);
    assert_eq!(leakage.len(), 3);
    assert!(leakage.iter().all(|v| (v.value - 1e-3).abs() < 1e-12));
}

#[tokio::test]
async fn leakage_with_unknown_pin_touches_nothing() {
    let bench = bench();
    let ctx = context(&bench);
    let mut params = leakage_params(false);
    params.pins.push("GHOST".into());

    let error = leakage_test(&ctx, &params).await.unwrap_err();

    assert!(matches!(error, TestError::UnresolvedPin(ref pin) if pin == "GHOST"));
    assert!(bench.log.is_empty());
}
