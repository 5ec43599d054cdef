//! Mixed-signal test steps.
//!
//! Every step resolves its pins, validates its parameters, and only then
//! touches hardware: one fan-out branch per channel family present in the
//! request. Pins of one family are driven in a single call.

mod force;
mod measure;

pub use force::{force_current, force_dc_current, force_dc_voltage, force_voltage, SourceQuantity};
pub use measure::{
    force_current_and_measure, force_current_measure_voltage, force_voltage_and_measure,
    force_voltage_measure_current, measure, measure_with_settings, MeasurementSummary,
};

use crate::context::TestContext;
use crate::power;
use semitest_core::error::{DriverError, TestError, TestResult};
use semitest_core::family::ChannelFamily;
use std::time::Duration;

/// Turn off output on `pins` across families in parallel.
pub async fn power_down(ctx: &TestContext, pins: &[String], settle: Duration) -> TestResult<()> {
    power::power_down(ctx, pins, settle, false, false).await
}

/// Attach `family` to a driver failure.
pub(crate) fn in_family(family: ChannelFamily) -> impl Fn(DriverError) -> TestError {
    move |source| TestError::family(family, source)
}

pub(crate) async fn settle(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
