use super::{in_family, settle};
use crate::context::TestContext;
use semitest_core::broadcast::BroadcastParameterSet;
use semitest_core::error::TestResult;
use semitest_core::fanout::FanOut;
use semitest_core::partition::FamilyPins;
use semitest_core::settings::{seconds, ForceSettings, PinForce};
use std::time::Duration;

/// Quantity a force step sources; the limit is always the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceQuantity {
    Voltage,
    Current,
}

/// Force per-pin-group voltages with per-pin-group current limits.
pub async fn force_voltage(
    ctx: &TestContext,
    pins: &[String],
    params: &BroadcastParameterSet,
) -> TestResult<()> {
    force(ctx, pins, params, SourceQuantity::Voltage).await
}

/// Force per-pin-group currents with per-pin-group voltage limits.
pub async fn force_current(
    ctx: &TestContext,
    pins: &[String],
    params: &BroadcastParameterSet,
) -> TestResult<()> {
    force(ctx, pins, params, SourceQuantity::Current).await
}

/// Force one voltage on every pin and wait `settle_time`.
pub async fn force_dc_voltage(
    ctx: &TestContext,
    pins: &[String],
    voltage: f64,
    current_limit: f64,
    settle_time: Duration,
) -> TestResult<()> {
    let params = BroadcastParameterSet::new(vec![voltage], vec![current_limit])
        .with_settle_times(vec![settle_time.as_secs_f64()]);
    force_voltage(ctx, pins, &params).await
}

/// Force one current on every pin and wait `settle_time`.
pub async fn force_dc_current(
    ctx: &TestContext,
    pins: &[String],
    current: f64,
    voltage_limit: f64,
    settle_time: Duration,
) -> TestResult<()> {
    let params = BroadcastParameterSet::new(vec![current], vec![voltage_limit])
        .with_settle_times(vec![settle_time.as_secs_f64()]);
    force_current(ctx, pins, &params).await
}

pub(crate) async fn force(
    ctx: &TestContext,
    pins: &[String],
    params: &BroadcastParameterSet,
    quantity: SourceQuantity,
) -> TestResult<()> {
    let partition = ctx.resolve(pins)?;
    params.validate(partition.pin_group_count())?;

    let mut fan_out = FanOut::new();
    for family in partition.families() {
        let Some(family_pins) = partition.family(family) else {
            continue;
        };
        let controller = ctx.controller(family)?;
        let (forces, wait) = family_forces(family_pins, params, quantity);
        fan_out = fan_out.branch(family.label(), async move {
            controller.force(&forces).await.map_err(in_family(family))?;
            settle(wait).await;
            Ok(())
        });
    }

    tracing::debug!(pins = ?pins, ?quantity, branches = fan_out.len(), "forcing");
    fan_out.join().await?;
    Ok(())
}

/// Per-pin settings for one family, plus the longest settle time among its groups.
pub(crate) fn family_forces(
    family_pins: &FamilyPins,
    params: &BroadcastParameterSet,
    quantity: SourceQuantity,
) -> (Vec<PinForce>, Duration) {
    let mut forces = Vec::new();
    let mut wait = Duration::ZERO;
    for (index, group) in family_pins.iter() {
        let base = match quantity {
            SourceQuantity::Voltage => ForceSettings::voltage(params.level(index), params.limit(index)),
            SourceQuantity::Current => ForceSettings::current(params.level(index), params.limit(index)),
        };
        let settings = base
            .with_sense(params.sense(index))
            .with_transient_response(params.transient_response(index));
        forces.extend(group.iter().map(|pin| PinForce::new(pin.clone(), settings)));
        if let Some(time) = params.settle_time(index) {
            wait = wait.max(seconds(time));
        }
    }
    (forces, wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use semitest_core::capabilities::TopologyLookup;
    use semitest_core::family::ChannelFamily;
    use semitest_core::partition::PinPartition;
    use semitest_core::settings::{MeasurementSense, OutputFunction};

    struct TwoGroups;

    impl TopologyLookup for TwoGroups {
        fn filter_pins_by_family(&self, names: &[String], family: ChannelFamily) -> Vec<String> {
            if family != ChannelFamily::DigitalPpmu {
                return Vec::new();
            }
            names
                .iter()
                .flat_map(|n| match n.as_str() {
                    "Odd" => vec!["IO1".to_string(), "IO3".to_string()],
                    "Even" => vec!["IO2".to_string()],
                    _ => Vec::new(),
                })
                .collect()
        }
    }

    #[test]
    fn settings_follow_group_index() {
        let request = vec!["Odd".to_string(), "Even".to_string()];
        let partition = PinPartition::resolve(&TwoGroups, &request).unwrap();
        let params = BroadcastParameterSet::new(vec![1.0, 2.0], vec![0.01])
            .with_settle_times(vec![0.001, 0.005])
            .with_senses(vec![MeasurementSense::Remote]);

        let (forces, wait) = family_forces(
            partition.family(ChannelFamily::DigitalPpmu).unwrap(),
            &params,
            SourceQuantity::Current,
        );

        let levels: Vec<(&str, f64)> = forces
            .iter()
            .map(|f| (f.pin.as_str(), f.settings.level))
            .collect();
        assert_eq!(levels, vec![("IO1", 1.0), ("IO3", 1.0), ("IO2", 2.0)]);
        assert!(forces
            .iter()
            .all(|f| f.settings.function == OutputFunction::DcCurrent
                && f.settings.sense == Some(MeasurementSense::Remote)));
        assert_eq!(wait, seconds(0.005));
    }
}
