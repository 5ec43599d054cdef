//! DUT power sequencing across channel families.
//!
//! Both directions either fan out one branch per family, or walk the request
//! one concrete pin at a time when `serial` is set:
//!
//! ```text
//!   parallel:  [smu: all pins] || [ppmu: all pins]  -> settle
//!   serial:    pin0 -> settle -> pin1 -> settle -> ...   (request order)
//! ```
//!
//! Source-measure pins are forced to 0 V before their output is turned off.
//! By default the 0 V force uses each pin's programmed current limit. It can
//! instead be bracketed with the lowest safe current limit: read the
//! programmed limits, force 0 V at the lowest limit, then restore the
//! programmed limits whether or not the force succeeded.

use crate::context::TestContext;
use crate::steps::{in_family, settle};
use semitest_core::broadcast::{element_at_or_first, validate_broadcast};
use semitest_core::capabilities::ChannelFamilyController;
use semitest_core::error::{TestError, TestResult};
use semitest_core::fanout::FanOut;
use semitest_core::family::ChannelFamily;
use semitest_core::settings::{ForceSettings, PinForce};
use std::sync::Arc;
use std::time::Duration;

/// Force per-pin-group supply voltages.
///
/// `voltages` and `current_limits` follow the 0/1/N broadcast rule and must
/// not be empty.
pub async fn power_up(
    ctx: &TestContext,
    pins: &[String],
    voltages: &[f64],
    current_limits: &[f64],
    settle_time: Duration,
    serial: bool,
) -> TestResult<()> {
    let partition = ctx.resolve(pins)?;
    validate_broadcast(
        partition.pin_group_count(),
        &[
            ("voltages", voltages.len()),
            ("current_limits", current_limits.len()),
        ],
    )?;
    if voltages.is_empty() {
        return Err(TestError::MissingParameter("voltages".into()));
    }
    if current_limits.is_empty() {
        return Err(TestError::MissingParameter("current_limits".into()));
    }

    let supply = |index: usize| {
        ForceSettings::voltage(
            element_at_or_first(voltages, index).unwrap_or_default(),
            element_at_or_first(current_limits, index).unwrap_or_default(),
        )
    };

    tracing::info!(pins = ?pins, serial, "powering up DUT");
    if serial {
        for assignment in partition.assignments() {
            let controller = ctx.controller(assignment.family)?;
            let force = PinForce::new(assignment.pin.clone(), supply(assignment.request_index));
            controller
                .force(std::slice::from_ref(&force))
                .await
                .map_err(in_family(assignment.family))?;
            tracing::debug!(pin = %assignment.pin, "powered up");
            settle(settle_time).await;
        }
        return Ok(());
    }

    let mut fan_out = FanOut::new();
    for family in partition.families() {
        let Some(family_pins) = partition.family(family) else {
            continue;
        };
        let controller = ctx.controller(family)?;
        let forces: Vec<PinForce> = family_pins
            .iter()
            .flat_map(|(index, group)| {
                let settings = supply(index);
                group.iter().map(move |pin| PinForce::new(pin.clone(), settings))
            })
            .collect();
        fan_out = fan_out.branch(family.label(), async move {
            controller.force(&forces).await.map_err(in_family(family))?;
            settle(settle_time).await;
            Ok(())
        });
    }
    fan_out.join().await?;
    Ok(())
}

/// Bring `pins` to zero and turn their outputs off.
///
/// Source-measure pins are first forced to 0 V at their programmed current
/// limit. With `force_lowest_current_limit`, that force uses
/// [`TestContext::lowest_current_limit`] instead and the programmed limits are
/// restored afterwards. Digital pins always just turn their output off.
pub async fn power_down(
    ctx: &TestContext,
    pins: &[String],
    settle_time: Duration,
    serial: bool,
    force_lowest_current_limit: bool,
) -> TestResult<()> {
    let partition = ctx.resolve(pins)?;
    let lowest = force_lowest_current_limit.then_some(ctx.lowest_current_limit());

    tracing::info!(pins = ?pins, serial, force_lowest_current_limit, "powering down DUT");
    if serial {
        for assignment in partition.assignments() {
            let controller = ctx.controller(assignment.family)?;
            power_down_family(controller, vec![assignment.pin], settle_time, lowest).await?;
        }
        return Ok(());
    }

    let mut fan_out = FanOut::new();
    for family in partition.families() {
        let Some(family_pins) = partition.family(family) else {
            continue;
        };
        let controller = ctx.controller(family)?;
        let family_pins = family_pins.flattened();
        fan_out = fan_out.branch(
            family.label(),
            power_down_family(controller, family_pins, settle_time, lowest),
        );
    }
    fan_out.join().await?;
    Ok(())
}

async fn power_down_family(
    controller: Arc<dyn ChannelFamilyController>,
    pins: Vec<String>,
    settle_time: Duration,
    lowest_current_limit: Option<f64>,
) -> TestResult<()> {
    let family = controller.family();
    if family == ChannelFamily::SourceMeasure {
        match lowest_current_limit {
            Some(limit) => force_zero_at_lowest_limit(controller.as_ref(), &pins, limit).await?,
            None => force_zero_at_programmed_limit(controller.as_ref(), &pins).await?,
        }
    }
    controller
        .power_down(&pins, settle_time)
        .await
        .map_err(in_family(family))
}

/// Force 0 V at each pin's programmed current limit.
///
/// A pin on several sites is forced at the largest of its per-site limits.
async fn force_zero_at_programmed_limit(
    controller: &dyn ChannelFamilyController,
    pins: &[String],
) -> TestResult<()> {
    let family = controller.family();
    let programmed = controller
        .current_limits(pins)
        .await
        .map_err(in_family(family))?;

    let zero: Vec<PinForce> = pins
        .iter()
        .filter_map(|pin| {
            programmed
                .iter()
                .filter(|limit| &limit.pin == pin)
                .map(|limit| limit.value)
                .reduce(f64::max)
                .map(|limit| PinForce::new(pin.clone(), ForceSettings::voltage(0.0, limit)))
        })
        .collect();
    if zero.is_empty() {
        return Ok(());
    }
    controller.force(&zero).await.map_err(in_family(family))?;
    tracing::debug!(pins = ?pins, "forced 0 V at programmed current limit");
    Ok(())
}

/// Force 0 V at `limit`, then restore the programmed current limits.
///
/// Restoration is attempted even if forcing failed. When both fail, the
/// forcing failure is returned and the restoration failure is logged.
async fn force_zero_at_lowest_limit(
    controller: &dyn ChannelFamilyController,
    pins: &[String],
    limit: f64,
) -> TestResult<()> {
    let family = controller.family();
    let programmed = controller
        .current_limits(pins)
        .await
        .map_err(in_family(family))?;

    let zero: Vec<PinForce> = pins
        .iter()
        .map(|pin| PinForce::new(pin.clone(), ForceSettings::voltage(0.0, limit)))
        .collect();
    let forced = controller.force(&zero).await.map_err(in_family(family));
    let restored = controller
        .configure_current_limits(&programmed)
        .await
        .map_err(in_family(family));

    match (forced, restored) {
        (Err(force_error), Err(restore_error)) => {
            tracing::warn!(
                error = %restore_error,
                "restoring current limits failed after a failed zero force"
            );
            Err(force_error)
        }
        (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
        (Ok(()), Ok(())) => {
            tracing::debug!(pins = ?pins, limit, "forced 0 V at lowest current limit");
            Ok(())
        }
    }
}
