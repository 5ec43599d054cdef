//! Pin-at-a-time continuity and leakage sweeps.
//!
//! Both tests share one state machine:
//!
//! ```text
//!   Idle -> AllPinsZeroed -> { ForcingPin(i) -> Measuring(i) -> ZeroingPin(i) } * n
//!        -> AllPinsOff -> Done
//! ```
//!
//! Only one swept pin is ever away from zero: pin `i` is forced back to 0 V
//! and settled before pin `i + 1` is forced. If forcing or measuring pin `i`
//! fails, pin `i` is zeroed on a best-effort basis and the sweep returns
//! [`TestError::SweepAborted`] with the original cause.
//!
//! Leakage also has a parallel mode that forces, measures and zeroes every
//! pin at once (family branches in parallel). It skips the per-pin loop and
//! goes straight from `AllPinsZeroed` to `AllPinsOff`.

use crate::context::TestContext;
use crate::power;
use crate::steps::{in_family, settle};
use semitest_core::broadcast::{element_at_or_first, validate_broadcast};
use semitest_core::capabilities::ChannelFamilyController;
use semitest_core::error::{TestError, TestResult};
use semitest_core::fanout::FanOut;
use semitest_core::family::ChannelFamily;
use semitest_core::limits::tags;
use semitest_core::partition::PinPartition;
use semitest_core::settings::{
    seconds, ChannelMeasurement, ForceSettings, MeasureSettings, MeasurementType, PinForce,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Idle,
    AllPinsZeroed,
    ForcingPin(usize),
    Measuring(usize),
    ZeroingPin(usize),
    AllPinsOff,
    Done,
}

impl SweepPhase {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: SweepPhase) -> bool {
        use SweepPhase::*;
        match (*self, next) {
            (Idle, AllPinsZeroed) => true,
            (AllPinsZeroed, ForcingPin(0)) | (AllPinsZeroed, AllPinsOff) => true,
            (ForcingPin(i), Measuring(j)) | (Measuring(i), ZeroingPin(j)) => i == j,
            (ZeroingPin(i), ForcingPin(j)) => j == i + 1,
            (ZeroingPin(_), AllPinsOff) => true,
            (AllPinsOff, Done) => true,
            _ => false,
        }
    }
}

/// Everything needed to visit one swept pin.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepState {
    pub pin_index: usize,
    pub pin: String,
    pub family: ChannelFamily,
    pub force: ForceSettings,
    pub zero: ForceSettings,
    pub settle: Duration,
}

/// Result of a completed sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Phases in the order they were entered
    pub phases: Vec<SweepPhase>,
    pub measurements: Vec<ChannelMeasurement>,
}

struct Tracker {
    test: &'static str,
    phase: SweepPhase,
    report: SweepReport,
}

impl Tracker {
    fn new(test: &'static str) -> Self {
        Self {
            test,
            phase: SweepPhase::Idle,
            report: SweepReport {
                phases: vec![SweepPhase::Idle],
                measurements: Vec::new(),
            },
        }
    }

    fn advance(&mut self, next: SweepPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "{}: illegal sweep transition {:?} -> {:?}",
            self.test,
            self.phase,
            next
        );
        tracing::debug!(test = self.test, phase = ?next, "sweep phase");
        self.phase = next;
        self.report.phases.push(next);
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// Parameters of a continuity test.
///
/// Supply arrays are indexed by supply pin group; continuity arrays by
/// continuity pin group. Both follow the 0/1/N broadcast rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityParameters {
    #[serde(default)]
    pub supply_pins: Vec<String>,
    #[serde(default)]
    pub supply_current_limits: Vec<f64>,
    pub continuity_pins: Vec<String>,
    pub current_levels: Vec<f64>,
    pub voltage_limits_high: Vec<f64>,
    pub voltage_limits_low: Vec<f64>,
    /// Seconds
    pub aperture_time: f64,
    /// Seconds
    pub settle_time: f64,
}

impl ContinuityParameters {
    /// Largest current magnitude any continuity pin is forced to.
    fn max_current_level(&self) -> f64 {
        self.current_levels
            .iter()
            .fold(0.0_f64, |max, level| max.max(level.abs()))
    }
}

/// Parameters of a leakage test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakageParameters {
    pub pins: Vec<String>,
    pub voltage_level: f64,
    pub current_limit: f64,
    /// Seconds
    pub aperture_time: f64,
    /// Seconds
    pub settle_time: f64,
    /// Sweep one pin at a time instead of all pins at once
    #[serde(default)]
    pub serial: bool,
}

// =============================================================================
// Continuity
// =============================================================================

/// Force a small current into each continuity pin in turn and measure the
/// voltage across its protection diode.
pub async fn continuity_test(
    ctx: &TestContext,
    params: &ContinuityParameters,
) -> TestResult<SweepReport> {
    let continuity = ctx.resolve(&params.continuity_pins)?;
    let supply = if params.supply_pins.is_empty() {
        None
    } else {
        Some(ctx.resolve(&params.supply_pins)?)
    };

    validate_broadcast(
        continuity.pin_group_count(),
        &[
            ("current_levels", params.current_levels.len()),
            ("voltage_limits_high", params.voltage_limits_high.len()),
            ("voltage_limits_low", params.voltage_limits_low.len()),
        ],
    )?;
    for (name, values) in [
        ("current_levels", &params.current_levels),
        ("voltage_limits_high", &params.voltage_limits_high),
        ("voltage_limits_low", &params.voltage_limits_low),
    ] {
        if values.is_empty() {
            return Err(TestError::MissingParameter(name.into()));
        }
    }
    if let Some(supply) = &supply {
        validate_broadcast(
            supply.pin_group_count(),
            &[("supply_current_limits", params.supply_current_limits.len())],
        )?;
        if params.supply_current_limits.is_empty() {
            return Err(TestError::MissingParameter("supply_current_limits".into()));
        }
    }

    let settle_time = seconds(params.settle_time);
    let zero = ForceSettings::voltage(0.0, params.max_current_level());
    let mut tracker = Tracker::new("continuity");
    tracing::info!(pins = ?params.continuity_pins, "continuity test");

    // Supply pins go to 0 V at their own limits, continuity pins at the
    // largest continuity current.
    let mut baseline: Vec<(ChannelFamily, PinForce)> = Vec::new();
    if let Some(supply) = &supply {
        for assignment in supply.assignments() {
            let limit = element_at_or_first(&params.supply_current_limits, assignment.request_index)
                .unwrap_or_default();
            baseline.push((
                assignment.family,
                PinForce::new(assignment.pin, ForceSettings::voltage(0.0, limit)),
            ));
        }
    }
    for assignment in continuity.assignments() {
        baseline.push((assignment.family, PinForce::new(assignment.pin, zero)));
    }
    zero_all(ctx, baseline, settle_time).await?;
    tracker.advance(SweepPhase::AllPinsZeroed);

    let states: Vec<SweepState> = continuity
        .assignments()
        .into_iter()
        .enumerate()
        .map(|(pin_index, assignment)| {
            let index = assignment.request_index;
            let level = element_at_or_first(&params.current_levels, index).unwrap_or_default();
            let high = element_at_or_first(&params.voltage_limits_high, index).unwrap_or_default();
            let low = element_at_or_first(&params.voltage_limits_low, index).unwrap_or_default();
            SweepState {
                pin_index,
                pin: assignment.pin,
                family: assignment.family,
                force: ForceSettings::current_asymmetric(level, high, low),
                zero,
                settle: settle_time,
            }
        })
        .collect();
    let measure = MeasureSettings::new(MeasurementType::Voltage)
        .with_aperture_time(Some(params.aperture_time));
    run_serial(ctx, &states, measure, tags::CONTINUITY, &mut tracker).await?;

    let mut all_pins = params.supply_pins.clone();
    all_pins.extend(params.continuity_pins.iter().cloned());
    power::power_down(ctx, &all_pins, settle_time, false, false).await?;
    tracker.advance(SweepPhase::AllPinsOff);
    tracker.advance(SweepPhase::Done);
    Ok(tracker.report)
}

// =============================================================================
// Leakage
// =============================================================================

/// Force a voltage on each pin and measure the current it draws.
pub async fn leakage_test(ctx: &TestContext, params: &LeakageParameters) -> TestResult<SweepReport> {
    let partition = ctx.resolve(&params.pins)?;
    let settle_time = seconds(params.settle_time);
    let zero = ForceSettings::voltage(0.0, params.current_limit);
    let stress = ForceSettings::voltage(params.voltage_level, params.current_limit);
    let measure = MeasureSettings::new(MeasurementType::Current)
        .with_aperture_time(Some(params.aperture_time));
    let mut tracker = Tracker::new("leakage");
    tracing::info!(pins = ?params.pins, serial = params.serial, "leakage test");

    let baseline = partition
        .assignments()
        .into_iter()
        .map(|a| (a.family, PinForce::new(a.pin, zero)))
        .collect();
    zero_all(ctx, baseline, settle_time).await?;
    tracker.advance(SweepPhase::AllPinsZeroed);

    if params.serial {
        let states: Vec<SweepState> = partition
            .assignments()
            .into_iter()
            .enumerate()
            .map(|(pin_index, a)| SweepState {
                pin_index,
                pin: a.pin,
                family: a.family,
                force: stress,
                zero,
                settle: settle_time,
            })
            .collect();
        run_serial(ctx, &states, measure, tags::LEAKAGE, &mut tracker).await?;
    } else {
        let measurements = run_parallel(ctx, &partition, stress, zero, measure, settle_time).await?;
        tracker.report.measurements.extend(measurements);
    }

    power::power_down(ctx, &params.pins, settle_time, false, false).await?;
    tracker.advance(SweepPhase::AllPinsOff);
    tracker.advance(SweepPhase::Done);
    Ok(tracker.report)
}

// =============================================================================
// Shared passes
// =============================================================================

/// One force call per family, in parallel, then settle.
async fn zero_all(
    ctx: &TestContext,
    forces: Vec<(ChannelFamily, PinForce)>,
    settle_time: Duration,
) -> TestResult<()> {
    let mut fan_out = FanOut::new();
    for family in ChannelFamily::ALL {
        let family_forces: Vec<PinForce> = forces
            .iter()
            .filter(|(f, _)| *f == family)
            .map(|(_, force)| force.clone())
            .collect();
        if family_forces.is_empty() {
            continue;
        }
        let controller = ctx.controller(family)?;
        fan_out = fan_out.branch(family.label(), async move {
            controller
                .force(&family_forces)
                .await
                .map_err(in_family(family))?;
            settle(settle_time).await;
            Ok(())
        });
    }
    fan_out.join().await?;
    Ok(())
}

async fn run_serial(
    ctx: &TestContext,
    states: &[SweepState],
    measure: MeasureSettings,
    tag: &str,
    tracker: &mut Tracker,
) -> TestResult<()> {
    for state in states {
        let controller = ctx.controller(state.family)?;
        if let Err(cause) = visit_pin(ctx, controller.as_ref(), state, measure, tag, tracker).await {
            zero_after_abort(controller.as_ref(), state).await;
            return Err(TestError::SweepAborted {
                pin_index: state.pin_index,
                pin: state.pin.clone(),
                source: Box::new(cause),
            });
        }
    }
    Ok(())
}

async fn visit_pin(
    ctx: &TestContext,
    controller: &dyn ChannelFamilyController,
    state: &SweepState,
    measure: MeasureSettings,
    tag: &str,
    tracker: &mut Tracker,
) -> TestResult<()> {
    let family = state.family;
    let pins = std::slice::from_ref(&state.pin);

    tracker.advance(SweepPhase::ForcingPin(state.pin_index));
    controller
        .force(&[PinForce::new(state.pin.clone(), state.force)])
        .await
        .map_err(in_family(family))?;
    settle(state.settle).await;

    tracker.advance(SweepPhase::Measuring(state.pin_index));
    let readings = controller
        .measure(pins, &measure)
        .await
        .map_err(in_family(family))?;
    let values: Vec<_> = readings.iter().filter_map(|m| m.value(measure.kind)).collect();
    ctx.publisher().publish_per_channel(&values, tag);
    tracker.report.measurements.extend(readings);

    tracker.advance(SweepPhase::ZeroingPin(state.pin_index));
    controller
        .force(&[PinForce::new(state.pin.clone(), state.zero)])
        .await
        .map_err(in_family(family))?;
    settle(state.settle).await;
    Ok(())
}

/// Best-effort return of an aborted pin to zero.
async fn zero_after_abort(controller: &dyn ChannelFamilyController, state: &SweepState) {
    let zero = PinForce::new(state.pin.clone(), state.zero);
    match controller.force(std::slice::from_ref(&zero)).await {
        Ok(()) => tracing::warn!(pin = %state.pin, "sweep aborted; pin returned to zero"),
        Err(error) => tracing::error!(
            pin = %state.pin,
            error = %error,
            "sweep aborted and the pin could not be returned to zero"
        ),
    }
}

/// Force, measure and zero every pin at once, one branch per family each time.
async fn run_parallel(
    ctx: &TestContext,
    partition: &PinPartition,
    stress: ForceSettings,
    zero: ForceSettings,
    measure: MeasureSettings,
    settle_time: Duration,
) -> TestResult<Vec<ChannelMeasurement>> {
    let families: Vec<(ChannelFamily, Arc<dyn ChannelFamilyController>, Vec<String>)> = partition
        .families()
        .filter_map(|family| partition.family(family).map(|pins| (family, pins.flattened())))
        .map(|(family, pins)| ctx.controller(family).map(|c| (family, c, pins)))
        .collect::<TestResult<_>>()?;

    let force_all = |settings: ForceSettings| {
        let mut fan_out = FanOut::new();
        for (family, controller, pins) in &families {
            let (family, controller) = (*family, controller.clone());
            let forces: Vec<PinForce> = pins
                .iter()
                .map(|pin| PinForce::new(pin.clone(), settings))
                .collect();
            fan_out = fan_out.branch(family.label(), async move {
                controller.force(&forces).await.map_err(in_family(family))?;
                settle(settle_time).await;
                Ok(())
            });
        }
        fan_out
    };

    force_all(stress).join().await?;

    let mut measure_all = FanOut::new();
    for (family, controller, pins) in &families {
        let (family, controller, pins) = (*family, controller.clone(), pins.clone());
        measure_all = measure_all.branch(family.label(), async move {
            controller.measure(&pins, &measure).await.map_err(in_family(family))
        });
    }
    let measurements: Vec<ChannelMeasurement> = measure_all.join().await?.concat();
    let values: Vec<_> = measurements
        .iter()
        .filter_map(|m| m.value(measure.kind))
        .collect();
    ctx.publisher().publish_per_channel(&values, tags::LEAKAGE);

    force_all(zero).join().await?;
    Ok(measurements)
}
