//! Configuration using Figment
//!
//! A test plan is loaded from a TOML file merged with environment variables
//! prefixed `SEMITEST_`. Nested keys are separated by a double underscore:
//! `SEMITEST_APPLICATION__LOG_LEVEL=debug`.
//!
//! # Example
//! ```no_run
//! use semitest::config::SemitestConfig;
//!
//! let config = SemitestConfig::load_from("config/bench.toml")?;
//! config.validate()?;
//! # Ok::<(), semitest::config::ConfigError>(())
//! ```

use crate::sweep::{ContinuityParameters, LeakageParameters};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use semitest_core::limits::LOWEST_CURRENT_LIMIT;
use semitest_core::settings::MeasurementType;
use semitest_driver_mock::BenchConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid log_level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("bench defines no sites")]
    NoSites,

    #[error("duplicate pin name: {0}")]
    DuplicatePin(String),

    #[error("group '{group}' references unknown pin '{pin}'")]
    UnknownGroupPin { group: String, pin: String },

    #[error("lowest_current_limit_a must be positive, got {0}")]
    InvalidLowestCurrentLimit(f64),

    #[error("step {index} ({kind}) lists no pins")]
    EmptyStep { index: usize, kind: &'static str },
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemitestConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    pub bench: BenchConfig,
    /// Test plan, executed in order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Values used by steps that leave a timing parameter out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub settle_time_s: f64,
    #[serde(default)]
    pub aperture_time_s: Option<f64>,
    #[serde(default = "default_lowest_current_limit")]
    pub lowest_current_limit_a: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            settle_time_s: 0.0,
            aperture_time_s: None,
            lowest_current_limit_a: LOWEST_CURRENT_LIMIT,
        }
    }
}

/// One entry of the `[[steps]]` plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    ForceVoltage {
        pins: Vec<String>,
        levels: Vec<f64>,
        limits: Vec<f64>,
        #[serde(default)]
        settle_times: Vec<f64>,
    },
    ForceCurrent {
        pins: Vec<String>,
        levels: Vec<f64>,
        limits: Vec<f64>,
        #[serde(default)]
        settle_times: Vec<f64>,
    },
    Measure {
        pins: Vec<String>,
        #[serde(default)]
        measurement: MeasurementType,
        #[serde(default)]
        aperture_time_s: Option<f64>,
    },
    ForceVoltageMeasureCurrent {
        pins: Vec<String>,
        voltage: f64,
        current_limit: f64,
        #[serde(default)]
        aperture_time_s: Option<f64>,
        #[serde(default)]
        settle_time_s: Option<f64>,
    },
    PowerUp {
        pins: Vec<String>,
        voltages: Vec<f64>,
        current_limits: Vec<f64>,
        #[serde(default)]
        settle_time_s: Option<f64>,
        #[serde(default)]
        serial: bool,
    },
    PowerDown {
        pins: Vec<String>,
        #[serde(default)]
        settle_time_s: Option<f64>,
        #[serde(default)]
        serial: bool,
        #[serde(default = "default_true")]
        force_lowest_current_limit: bool,
    },
    Continuity(ContinuityParameters),
    Leakage(LeakageParameters),
}

impl StepConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ForceVoltage { .. } => "force_voltage",
            Self::ForceCurrent { .. } => "force_current",
            Self::Measure { .. } => "measure",
            Self::ForceVoltageMeasureCurrent { .. } => "force_voltage_measure_current",
            Self::PowerUp { .. } => "power_up",
            Self::PowerDown { .. } => "power_down",
            Self::Continuity(_) => "continuity",
            Self::Leakage(_) => "leakage",
        }
    }

    /// Pins the step drives.
    pub fn pins(&self) -> Vec<&str> {
        match self {
            Self::ForceVoltage { pins, .. }
            | Self::ForceCurrent { pins, .. }
            | Self::Measure { pins, .. }
            | Self::ForceVoltageMeasureCurrent { pins, .. }
            | Self::PowerUp { pins, .. }
            | Self::PowerDown { pins, .. } => pins.iter().map(String::as_str).collect(),
            Self::Continuity(params) => params
                .supply_pins
                .iter()
                .chain(&params.continuity_pins)
                .map(String::as_str)
                .collect(),
            Self::Leakage(params) => params.pins.iter().map(String::as_str).collect(),
        }
    }
}

fn default_name() -> String {
    "semitest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_lowest_current_limit() -> f64 {
    LOWEST_CURRENT_LIMIT
}

impl SemitestConfig {
    /// Load from a TOML file, with `SEMITEST_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SEMITEST_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Parse from a TOML string without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(
                self.application.log_level.clone(),
            ));
        }

        if self.bench.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }

        let mut names = HashSet::new();
        for pin in &self.bench.pins {
            if !names.insert(pin.name.as_str()) {
                return Err(ConfigError::DuplicatePin(pin.name.clone()));
            }
        }
        for group in &self.bench.groups {
            if let Some(pin) = group.pins.iter().find(|p| !names.contains(p.as_str())) {
                return Err(ConfigError::UnknownGroupPin {
                    group: group.name.clone(),
                    pin: pin.clone(),
                });
            }
        }

        let lowest = self.defaults.lowest_current_limit_a;
        if !(lowest.is_finite() && lowest > 0.0) {
            return Err(ConfigError::InvalidLowestCurrentLimit(lowest));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.pins().is_empty() {
                return Err(ConfigError::EmptyStep {
                    index,
                    kind: step.kind(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PLAN: &str = r#"
        [application]
        name = "bench test"
        log_level = "debug"
        log_format = "json"

        [defaults]
        settle_time_s = 0.001

        [bench]
        sites = [0, 1]

        [[bench.pins]]
        name = "VDD"
        family = "smu"

        [[bench.pins]]
        name = "IO0"
        family = "ppmu"
        resistance_ohms = 2000.0

        [[bench.groups]]
        name = "Supplies"
        pins = ["VDD"]

        [[steps]]
        kind = "power_up"
        pins = ["Supplies"]
        voltages = [1.8]
        current_limits = [0.1]

        [[steps]]
        kind = "measure"
        pins = ["VDD", "IO0"]
        measurement = "both"

        [[steps]]
        kind = "leakage"
        pins = ["IO0"]
        voltage_level = 1.0
        current_limit = 0.001
        aperture_time = 0.001
        settle_time = 0.0
    "#;

    fn parsed() -> SemitestConfig {
        SemitestConfig::from_toml_str(PLAN).unwrap()
    }

    #[test]
    fn test_parse_plan() {
        let config = parsed();
        assert_eq!(config.application.log_format, LogFormat::Json);
        assert_eq!(config.defaults.lowest_current_limit_a, LOWEST_CURRENT_LIMIT);
        assert_eq!(config.bench.pins.len(), 2);

        let kinds: Vec<_> = config.steps.iter().map(StepConfig::kind).collect();
        assert_eq!(kinds, vec!["power_up", "measure", "leakage"]);
        assert!(matches!(
            config.steps[1],
            StepConfig::Measure {
                measurement: MeasurementType::Both,
                ..
            }
        ));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_power_down_brackets_by_default() {
        let config = SemitestConfig::from_toml_str(
            r#"
            [bench]
            sites = [0]

            [[bench.pins]]
            name = "VDD"
            family = "smu"

            [[steps]]
            kind = "power_down"
            pins = ["VDD"]

            [[steps]]
            kind = "power_down"
            pins = ["VDD"]
            force_lowest_current_limit = false
            "#,
        )
        .unwrap();

        let brackets: Vec<bool> = config
            .steps
            .iter()
            .filter_map(|step| match step {
                StepConfig::PowerDown {
                    force_lowest_current_limit,
                    ..
                } => Some(*force_lowest_current_limit),
                _ => None,
            })
            .collect();
        assert_eq!(brackets, vec![true, false]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PLAN.as_bytes()).unwrap();

        let config = SemitestConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "bench test");
        assert_eq!(config.steps.len(), 3);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SemitestConfig::load_from(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = parsed();
        config.application.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_duplicate_pin() {
        let mut config = parsed();
        let copy = config.bench.pins[0].clone();
        config.bench.pins.push(copy);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePin(name)) if name == "VDD"
        ));
    }

    #[test]
    fn test_group_with_unknown_pin() {
        let mut config = parsed();
        config.bench.groups[0].pins.push("VCC".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownGroupPin { pin, .. }) if pin == "VCC"
        ));
    }

    #[test]
    fn test_empty_sites_and_bad_limit() {
        let mut config = parsed();
        config.bench.sites.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoSites)));

        let mut config = parsed();
        config.defaults.lowest_current_limit_a = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLowestCurrentLimit(_))
        ));
    }
}
