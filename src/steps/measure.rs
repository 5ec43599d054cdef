use super::force::{force, SourceQuantity};
use super::{force_dc_current, force_dc_voltage, in_family};
use crate::context::TestContext;
use semitest_core::aggregate::SiteAggregator;
use semitest_core::broadcast::BroadcastParameterSet;
use semitest_core::error::TestResult;
use semitest_core::fanout::FanOut;
use semitest_core::limits::tags;
use semitest_core::partition::{FamilyPins, PinPartition};
use semitest_core::settings::{ChannelMeasurement, ChannelValue, MeasureSettings, MeasurementType};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a measurement step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSummary {
    /// Every channel, family by family in declaration order
    pub measurements: Vec<ChannelMeasurement>,
    /// Current summed over families per site, aligned to `site_numbers()`.
    /// `None` when only voltage was measured.
    pub total_current: Option<Vec<f64>>,
}

impl MeasurementSummary {
    /// Per-channel values of one quantity.
    pub fn values(&self, quantity: MeasurementType) -> Vec<ChannelValue> {
        self.measurements
            .iter()
            .filter_map(|m| m.value(quantity))
            .collect()
    }
}

/// Measure every channel of `pins` and publish the results.
pub async fn measure(
    ctx: &TestContext,
    pins: &[String],
    kind: MeasurementType,
) -> TestResult<MeasurementSummary> {
    measure_with_settings(ctx, pins, MeasureSettings::new(kind)).await
}

/// [`measure`] with explicit aperture time and sense.
pub async fn measure_with_settings(
    ctx: &TestContext,
    pins: &[String],
    settings: MeasureSettings,
) -> TestResult<MeasurementSummary> {
    let partition = ctx.resolve(pins)?;
    measure_partition(ctx, &partition, settings.kind, |_| settings).await
}

/// Force per-pin-group voltages, then measure.
///
/// Each pin group is measured with its own aperture time from `params`.
pub async fn force_voltage_and_measure(
    ctx: &TestContext,
    pins: &[String],
    params: &BroadcastParameterSet,
    kind: MeasurementType,
) -> TestResult<MeasurementSummary> {
    force_and_measure(ctx, pins, params, SourceQuantity::Voltage, kind).await
}

/// Force per-pin-group currents, then measure.
pub async fn force_current_and_measure(
    ctx: &TestContext,
    pins: &[String],
    params: &BroadcastParameterSet,
    kind: MeasurementType,
) -> TestResult<MeasurementSummary> {
    force_and_measure(ctx, pins, params, SourceQuantity::Current, kind).await
}

/// Force one voltage on every pin, settle, and measure current.
pub async fn force_voltage_measure_current(
    ctx: &TestContext,
    pins: &[String],
    voltage: f64,
    current_limit: f64,
    aperture_time: Option<f64>,
    settle_time: Duration,
) -> TestResult<MeasurementSummary> {
    force_dc_voltage(ctx, pins, voltage, current_limit, settle_time).await?;
    let settings =
        MeasureSettings::new(MeasurementType::Current).with_aperture_time(aperture_time);
    measure_with_settings(ctx, pins, settings).await
}

/// Force one current on every pin, settle, and measure voltage.
pub async fn force_current_measure_voltage(
    ctx: &TestContext,
    pins: &[String],
    current: f64,
    voltage_limit: f64,
    aperture_time: Option<f64>,
    settle_time: Duration,
) -> TestResult<MeasurementSummary> {
    force_dc_current(ctx, pins, current, voltage_limit, settle_time).await?;
    let settings =
        MeasureSettings::new(MeasurementType::Voltage).with_aperture_time(aperture_time);
    measure_with_settings(ctx, pins, settings).await
}

async fn force_and_measure(
    ctx: &TestContext,
    pins: &[String],
    params: &BroadcastParameterSet,
    quantity: SourceQuantity,
    kind: MeasurementType,
) -> TestResult<MeasurementSummary> {
    force(ctx, pins, params, quantity).await?;
    let partition = ctx.resolve(pins)?;
    measure_partition(ctx, &partition, kind, |index| MeasureSettings {
        kind,
        aperture_time: params.aperture_time(index),
        sense: params.sense(index),
    })
    .await
}

/// Fan out one measurement branch per family and publish.
///
/// `settings_for(request_index)` gives the settings of one pin group.
async fn measure_partition<F>(
    ctx: &TestContext,
    partition: &PinPartition,
    kind: MeasurementType,
    settings_for: F,
) -> TestResult<MeasurementSummary>
where
    F: Fn(usize) -> MeasureSettings,
{
    let aggregator = Arc::new(SiteAggregator::new());
    let mut fan_out = FanOut::new();
    for family in partition.families() {
        let Some(family_pins) = partition.family(family) else {
            continue;
        };
        let controller = ctx.controller(family)?;
        let batches = measurement_batches(family_pins, &settings_for);
        let aggregator = aggregator.clone();
        fan_out = fan_out.branch(family.label(), async move {
            let mut readings = Vec::new();
            for (pins, settings) in batches {
                let batch = controller
                    .measure(&pins, &settings)
                    .await
                    .map_err(in_family(family))?;
                readings.extend(batch);
            }
            if kind.includes_current() {
                aggregator.accumulate_all(
                    readings
                        .iter()
                        .filter_map(|m| m.current.map(|current| (m.site, current))),
                );
            }
            Ok(readings)
        });
    }

    let measurements: Vec<ChannelMeasurement> = fan_out.join().await?.concat();
    let summary = MeasurementSummary {
        total_current: kind
            .includes_current()
            .then(|| aggregator.publish(&ctx.site_numbers())),
        measurements,
    };

    let publisher = ctx.publisher();
    if kind.includes_voltage() {
        publisher.publish_per_channel(&summary.values(MeasurementType::Voltage), tags::VOLTAGE);
    }
    if kind.includes_current() {
        publisher.publish_per_channel(&summary.values(MeasurementType::Current), tags::CURRENT);
    }
    if let Some(total) = &summary.total_current {
        publisher.publish_per_site(total, tags::TOTAL_CURRENT);
    }

    tracing::debug!(
        channels = summary.measurements.len(),
        total_current = ?summary.total_current,
        "measured"
    );
    Ok(summary)
}

/// Consecutive pin groups that share settings are measured in one call.
fn measurement_batches<F>(
    family_pins: &FamilyPins,
    settings_for: &F,
) -> Vec<(Vec<String>, MeasureSettings)>
where
    F: Fn(usize) -> MeasureSettings,
{
    let mut batches: Vec<(Vec<String>, MeasureSettings)> = Vec::new();
    for (index, group) in family_pins.iter() {
        let settings = settings_for(index);
        if let Some((pins, last)) = batches.last_mut() {
            if *last == settings {
                pins.extend_from_slice(group);
                continue;
            }
        }
        batches.push((group.to_vec(), settings));
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use semitest_core::capabilities::TopologyLookup;
    use semitest_core::family::ChannelFamily;

    struct Flat;

    impl TopologyLookup for Flat {
        fn filter_pins_by_family(&self, names: &[String], family: ChannelFamily) -> Vec<String> {
            match family {
                ChannelFamily::DigitalPpmu => names.to_vec(),
                ChannelFamily::SourceMeasure => Vec::new(),
            }
        }
    }

    #[test]
    fn equal_settings_share_one_call() {
        let request: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let partition = PinPartition::resolve(&Flat, &request).unwrap();
        let pins = partition.family(ChannelFamily::DigitalPpmu).unwrap();

        let uniform = measurement_batches(pins, &|_| MeasureSettings::default());
        assert_eq!(uniform.len(), 1);
        assert_eq!(uniform[0].0, vec!["A", "B", "C"]);

        let apertures = [0.001, 0.001, 0.002];
        let split = measurement_batches(pins, &|i| {
            MeasureSettings::default().with_aperture_time(Some(apertures[i]))
        });
        assert_eq!(split.len(), 2);
        assert_eq!(split[1].0, vec!["C"]);
    }
}
