//! Simulated channel family.
//!
//! One instance plays either the source-measure or the digital PPMU role.
//! Every pin owned by the family has one channel per site it is wired on.
//!
//! # Measurement Model
//!
//! Each channel drives a resistive load `R` (from the pin map):
//!
//! - forcing voltage `V` with current limit `Ilim`: reads `V`, `clamp(V / R, Ilim)`
//! - forcing current `I` with voltage window `Vlim`: reads `clamp(I * R, Vlim)`, `I`
//! - output off: reads `0`, `0`
//!
//! [`MockChannelFamily::set_reading`] overrides the model for one channel.

use crate::common::{ErrorConfig, TimingConfig};
use crate::event_log::{EventKind, EventLog};
use crate::pin_map::MockPinMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use semitest_core::capabilities::ChannelFamilyController;
use semitest_core::error::{DriverError, DriverErrorKind, DriverResult};
use semitest_core::family::ChannelFamily;
use semitest_core::settings::{
    ChannelMeasurement, ChannelValue, ComplianceLimit, MeasureSettings, OutputFunction, PinForce,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Current limit every channel starts with.
pub const DEFAULT_CURRENT_LIMIT: f64 = 0.01;

pub const OP_FORCE: &str = "force";
pub const OP_MEASURE: &str = "measure";
pub const OP_POWER_DOWN: &str = "power_down";
pub const OP_READ_LIMITS: &str = "current_limits";
pub const OP_CONFIGURE_LIMITS: &str = "configure_current_limits";

type ChannelKey = (u32, String);

/// Source state of one site/pin channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    pub function: OutputFunction,
    pub level: f64,
    pub limit: ComplianceLimit,
    /// Programmed current limit, kept while forcing current
    pub current_limit: f64,
    pub output_enabled: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            function: OutputFunction::DcVoltage,
            level: 0.0,
            limit: ComplianceLimit::Symmetric(DEFAULT_CURRENT_LIMIT),
            current_limit: DEFAULT_CURRENT_LIMIT,
            output_enabled: false,
        }
    }
}

/// Explicit reading for one channel, bypassing the load model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
}

pub struct MockChannelFamily {
    family: ChannelFamily,
    driver: String,
    pin_map: Arc<MockPinMap>,
    channels: Mutex<HashMap<ChannelKey, ChannelState>>,
    readings: Mutex<HashMap<ChannelKey, Reading>>,
    errors: ErrorConfig,
    timing: TimingConfig,
    log: EventLog,
}

impl MockChannelFamily {
    pub fn new(family: ChannelFamily, pin_map: Arc<MockPinMap>, log: EventLog) -> Self {
        Self {
            family,
            driver: format!("mock_{}", family.label()),
            pin_map,
            channels: Mutex::new(HashMap::new()),
            readings: Mutex::new(HashMap::new()),
            errors: ErrorConfig::none(),
            timing: TimingConfig::instant(),
            log,
        }
    }

    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn driver_name(&self) -> &str {
        &self.driver
    }

    /// Fix the reading of one channel.
    pub fn set_reading(&self, site: u32, pin: &str, reading: Reading) {
        self.readings.lock().insert((site, pin.to_string()), reading);
    }

    /// Current source state of one channel, if it was ever touched.
    pub fn channel(&self, site: u32, pin: &str) -> Option<ChannelState> {
        self.channels.lock().get(&(site, pin.to_string())).copied()
    }

    /// Site/pin channels of `pins`, rejecting pins this family does not own.
    fn channels_of(&self, pins: &[String]) -> DriverResult<Vec<ChannelKey>> {
        let mut keys = Vec::new();
        for pin in pins {
            if self.pin_map.family_of(pin) != Some(self.family) {
                return Err(DriverError::new(
                    &self.driver,
                    DriverErrorKind::InvalidParameter,
                    format!("Pin '{pin}' is not a {} channel", self.family),
                ));
            }
            keys.extend(self.pin_map.sites_of(pin).into_iter().map(|s| (s, pin.clone())));
        }
        Ok(keys)
    }

    fn resistance(&self, pin: &str) -> f64 {
        self.pin_map
            .pin(pin)
            .map(|p| p.resistance_ohms)
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(f64::MAX)
    }

    fn model(&self, pin: &str, state: &ChannelState) -> Reading {
        if !state.output_enabled {
            return Reading {
                voltage: Some(0.0),
                current: Some(0.0),
            };
        }
        let r = self.resistance(pin);
        let (voltage, current) = match state.function {
            OutputFunction::DcVoltage => (state.level, state.limit.clamp(state.level / r)),
            OutputFunction::DcCurrent => (state.limit.clamp(state.level * r), state.level),
        };
        Reading {
            voltage: Some(voltage),
            current: Some(current),
        }
    }

    async fn simulate(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChannelFamilyController for MockChannelFamily {
    fn family(&self) -> ChannelFamily {
        self.family
    }

    async fn force(&self, pins: &[PinForce]) -> DriverResult<()> {
        let names: Vec<String> = pins.iter().map(|p| p.pin.clone()).collect();
        self.errors.check_operation(&self.driver, OP_FORCE, &names)?;
        self.channels_of(&names)?;
        self.simulate(self.timing.force_delay()).await;

        let mut channels = self.channels.lock();
        for force in pins {
            let settings = force.settings;
            for site in self.pin_map.sites_of(&force.pin) {
                let state = channels.entry((site, force.pin.clone())).or_default();
                state.function = settings.function;
                state.level = settings.level;
                state.limit = settings.limit;
                if settings.function == OutputFunction::DcVoltage {
                    state.current_limit = settings.limit.magnitude();
                }
                state.output_enabled = true;
            }
            self.log.record(
                self.family,
                force.pin.clone(),
                EventKind::Force {
                    function: settings.function,
                    level: settings.level,
                    limit: settings.limit,
                },
            );
        }
        tracing::trace!(driver = %self.driver, pins = ?names, "forced");
        Ok(())
    }

    async fn measure(
        &self,
        pins: &[String],
        settings: &MeasureSettings,
    ) -> DriverResult<Vec<ChannelMeasurement>> {
        self.errors.check_operation(&self.driver, OP_MEASURE, pins)?;
        let keys = self.channels_of(pins)?;
        self.simulate(self.timing.measure_delay()).await;

        let channels = self.channels.lock();
        let readings = self.readings.lock();
        let measurements = keys
            .into_iter()
            .map(|(site, pin)| {
                let key = (site, pin.clone());
                let reading = match readings.get(&key) {
                    Some(fixed) => *fixed,
                    None => {
                        let state = channels.get(&key).copied().unwrap_or_default();
                        self.model(&pin, &state)
                    }
                };
                ChannelMeasurement {
                    site,
                    pin,
                    voltage: reading.voltage.filter(|_| settings.kind.includes_voltage()),
                    current: reading.current.filter(|_| settings.kind.includes_current()),
                }
            })
            .collect();
        drop(readings);
        drop(channels);

        for pin in pins {
            self.log.record(self.family, pin.clone(), EventKind::Measure);
        }
        Ok(measurements)
    }

    async fn power_down(&self, pins: &[String], settle: Duration) -> DriverResult<()> {
        self.errors.check_operation(&self.driver, OP_POWER_DOWN, pins)?;
        let keys = self.channels_of(pins)?;
        {
            let mut channels = self.channels.lock();
            for key in keys {
                let state = channels.entry(key).or_default();
                state.level = 0.0;
                state.output_enabled = false;
            }
        }
        for pin in pins {
            self.log.record(self.family, pin.clone(), EventKind::PowerDown);
        }
        self.simulate(settle).await;
        Ok(())
    }

    async fn current_limits(&self, pins: &[String]) -> DriverResult<Vec<ChannelValue>> {
        self.errors.check_operation(&self.driver, OP_READ_LIMITS, pins)?;
        let keys = self.channels_of(pins)?;
        let channels = self.channels.lock();
        Ok(keys
            .into_iter()
            .map(|(site, pin)| {
                let limit = channels
                    .get(&(site, pin.clone()))
                    .map(|s| s.current_limit)
                    .unwrap_or(DEFAULT_CURRENT_LIMIT);
                ChannelValue::new(site, pin, limit)
            })
            .collect())
    }

    async fn configure_current_limits(&self, limits: &[ChannelValue]) -> DriverResult<()> {
        let names: Vec<String> = limits.iter().map(|l| l.pin.clone()).collect();
        self.errors
            .check_operation(&self.driver, OP_CONFIGURE_LIMITS, &names)?;
        self.channels_of(&names)?;

        let mut channels = self.channels.lock();
        for limit in limits {
            let state = channels.entry((limit.site, limit.pin.clone())).or_default();
            state.current_limit = limit.value;
            if state.function == OutputFunction::DcVoltage {
                state.limit = ComplianceLimit::Symmetric(limit.value);
            }
            self.log.record(
                self.family,
                limit.pin.clone(),
                EventKind::LimitConfigured {
                    current_limit: limit.value,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin_map::PinSpec;
    use semitest_core::settings::{ForceSettings, MeasurementType};

    fn smu() -> MockChannelFamily {
        let map = MockPinMap::new(vec![0, 1])
            .with_pin(PinSpec::new("VCC", ChannelFamily::SourceMeasure).with_resistance(100.0))
            .with_pin(PinSpec::new("IO1", ChannelFamily::DigitalPpmu));
        MockChannelFamily::new(ChannelFamily::SourceMeasure, Arc::new(map), EventLog::new())
    }

    fn pins(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn forced_voltage_reads_back_through_load() {
        let smu = smu();
        smu.force(&[PinForce::new("VCC", ForceSettings::voltage(1.0, 0.1))])
            .await
            .unwrap();
        let readings = smu
            .measure(&pins(&["VCC"]), &MeasureSettings::new(MeasurementType::Both))
            .await
            .unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].voltage, Some(1.0));
        assert!((readings[0].current.unwrap() - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn current_is_clamped_by_limit() {
        let smu = smu();
        smu.force(&[PinForce::new("VCC", ForceSettings::voltage(5.0, 0.001))])
            .await
            .unwrap();
        let readings = smu
            .measure(&pins(&["VCC"]), &MeasureSettings::new(MeasurementType::Current))
            .await
            .unwrap();
        assert_eq!(readings[0].current, Some(0.001));
        assert_eq!(readings[0].voltage, None);
    }

    #[tokio::test]
    async fn foreign_pins_are_rejected() {
        let err = smu()
            .force(&[PinForce::new("IO1", ForceSettings::voltage(1.0, 0.1))])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn limits_round_trip_and_power_down_disables_output() {
        let smu = smu();
        smu.force(&[PinForce::new("VCC", ForceSettings::voltage(3.3, 0.05))])
            .await
            .unwrap();
        let limits = smu.current_limits(&pins(&["VCC"])).await.unwrap();
        assert!(limits.iter().all(|l| l.value == 0.05));

        smu.configure_current_limits(&[ChannelValue::new(0, "VCC", 1e-7)])
            .await
            .unwrap();
        assert_eq!(smu.channel(0, "VCC").unwrap().current_limit, 1e-7);
        assert_eq!(smu.channel(1, "VCC").unwrap().current_limit, 0.05);

        smu.power_down(&pins(&["VCC"]), Duration::ZERO).await.unwrap();
        assert!(!smu.channel(0, "VCC").unwrap().output_enabled);
    }

    #[tokio::test]
    async fn fixed_reading_overrides_model() {
        let smu = smu();
        smu.set_reading(
            1,
            "VCC",
            Reading {
                voltage: Some(0.7),
                current: Some(0.02),
            },
        );
        let readings = smu
            .measure(&pins(&["VCC"]), &MeasureSettings::default())
            .await
            .unwrap();
        assert_eq!(readings[1].current, Some(0.02));
        assert_eq!(readings[0].current, Some(0.0));
    }
}
