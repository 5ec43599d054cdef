//! Per-pin source and measure settings exchanged with channel families.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the channel sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFunction {
    DcVoltage,
    DcCurrent,
}

/// Remote or local sensing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSense {
    #[default]
    Local,
    Remote,
}

/// Source transient response of an SMU channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientResponse {
    #[default]
    Normal,
    Slow,
    Fast,
}

/// Which quantity a measurement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Voltage,
    Current,
    #[default]
    Both,
}

impl MeasurementType {
    pub fn includes_voltage(&self) -> bool {
        matches!(self, Self::Voltage | Self::Both)
    }

    pub fn includes_current(&self) -> bool {
        matches!(self, Self::Current | Self::Both)
    }
}

/// Compliance limit applied while forcing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ComplianceLimit {
    Symmetric(f64),
    Asymmetric { high: f64, low: f64 },
}

impl ComplianceLimit {
    /// Largest magnitude the limit allows.
    pub fn magnitude(&self) -> f64 {
        match *self {
            Self::Symmetric(limit) => limit.abs(),
            Self::Asymmetric { high, low } => high.abs().max(low.abs()),
        }
    }

    /// Clamp a value into the compliance window.
    pub fn clamp(&self, value: f64) -> f64 {
        match *self {
            Self::Symmetric(limit) => value.clamp(-limit.abs(), limit.abs()),
            Self::Asymmetric { high, low } => value.clamp(low.min(high), high.max(low)),
        }
    }
}

/// Source configuration for one pin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceSettings {
    pub function: OutputFunction,
    pub level: f64,
    pub limit: ComplianceLimit,
    #[serde(default)]
    pub sense: Option<MeasurementSense>,
    #[serde(default)]
    pub transient_response: Option<TransientResponse>,
}

impl ForceSettings {
    /// Force `level` volts with a symmetric current limit.
    pub fn voltage(level: f64, current_limit: f64) -> Self {
        Self {
            function: OutputFunction::DcVoltage,
            level,
            limit: ComplianceLimit::Symmetric(current_limit),
            sense: None,
            transient_response: None,
        }
    }

    /// Force `level` amperes with a symmetric voltage limit.
    pub fn current(level: f64, voltage_limit: f64) -> Self {
        Self {
            function: OutputFunction::DcCurrent,
            level,
            limit: ComplianceLimit::Symmetric(voltage_limit),
            sense: None,
            transient_response: None,
        }
    }

    /// Force `level` amperes with an asymmetric voltage window.
    pub fn current_asymmetric(level: f64, voltage_limit_high: f64, voltage_limit_low: f64) -> Self {
        Self {
            function: OutputFunction::DcCurrent,
            level,
            limit: ComplianceLimit::Asymmetric {
                high: voltage_limit_high,
                low: voltage_limit_low,
            },
            sense: None,
            transient_response: None,
        }
    }

    pub fn with_sense(mut self, sense: Option<MeasurementSense>) -> Self {
        self.sense = sense;
        self
    }

    pub fn with_transient_response(mut self, response: Option<TransientResponse>) -> Self {
        self.transient_response = response;
        self
    }

    /// Whether these settings put the pin at the zero/reference level.
    pub fn is_zero(&self) -> bool {
        self.level == 0.0
    }
}

/// Settings targeted at one concrete pin.
#[derive(Debug, Clone, PartialEq)]
pub struct PinForce {
    pub pin: String,
    pub settings: ForceSettings,
}

impl PinForce {
    pub fn new(pin: impl Into<String>, settings: ForceSettings) -> Self {
        Self {
            pin: pin.into(),
            settings,
        }
    }
}

/// Measurement configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasureSettings {
    pub kind: MeasurementType,
    /// Aperture time in seconds; `None` leaves the channel's current setting.
    pub aperture_time: Option<f64>,
    pub sense: Option<MeasurementSense>,
}

impl MeasureSettings {
    pub fn new(kind: MeasurementType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_aperture_time(mut self, seconds: Option<f64>) -> Self {
        self.aperture_time = seconds;
        self
    }
}

/// One measured channel: a pin on a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMeasurement {
    pub site: u32,
    pub pin: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
}

impl ChannelMeasurement {
    /// Project one quantity out of the measurement.
    pub fn value(&self, quantity: MeasurementType) -> Option<ChannelValue> {
        let value = match quantity {
            MeasurementType::Voltage => self.voltage,
            MeasurementType::Current => self.current,
            MeasurementType::Both => None,
        }?;
        Some(ChannelValue::new(self.site, self.pin.clone(), value))
    }
}

/// A scalar attached to one site/pin channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelValue {
    pub site: u32,
    pub pin: String,
    pub value: f64,
}

impl ChannelValue {
    pub fn new(site: u32, pin: impl Into<String>, value: f64) -> Self {
        Self {
            site,
            pin: pin.into(),
            value,
        }
    }
}

/// Convert a seconds value from a step parameter into a `Duration`.
///
/// Negative and non-finite values are treated as zero. Values too large for
/// a `Duration` saturate.
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}
