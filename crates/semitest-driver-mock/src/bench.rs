//! A complete simulated test bench.
//!
//! Bundles the pin map, one mock controller per family, the recording
//! publisher and the shared event log, built from a [`BenchConfig`].

use crate::common::{ErrorConfig, TimingConfig};
use crate::event_log::EventLog;
use crate::mock_family::MockChannelFamily;
use crate::pin_map::{GroupSpec, MockPinMap, PinSpec};
use crate::publisher::RecordingPublisher;
use semitest_core::capabilities::ChannelFamilyController;
use semitest_core::family::ChannelFamily;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `[bench]` configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    pub sites: Vec<u32>,
    #[serde(default)]
    pub pins: Vec<PinSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

pub struct MockBench {
    pub pin_map: Arc<MockPinMap>,
    pub smu: Arc<MockChannelFamily>,
    pub ppmu: Arc<MockChannelFamily>,
    pub publisher: Arc<RecordingPublisher>,
    pub log: EventLog,
}

impl MockBench {
    pub fn new(pin_map: MockPinMap) -> Self {
        Self::with_families(pin_map, |family| family)
    }

    pub fn from_config(config: &BenchConfig) -> Self {
        Self::new(MockPinMap::from_specs(
            config.sites.clone(),
            &config.pins,
            &config.groups,
        ))
    }

    /// Build with a hook to customise each family (errors, timing).
    pub fn with_families<F>(pin_map: MockPinMap, customise: F) -> Self
    where
        F: Fn(MockChannelFamily) -> MockChannelFamily,
    {
        let pin_map = Arc::new(pin_map);
        let log = EventLog::new();
        let make = |family| {
            Arc::new(customise(MockChannelFamily::new(
                family,
                pin_map.clone(),
                log.clone(),
            )))
        };
        let smu = make(ChannelFamily::SourceMeasure);
        let ppmu = make(ChannelFamily::DigitalPpmu);
        Self {
            pin_map,
            smu,
            ppmu,
            publisher: Arc::new(RecordingPublisher::new()),
            log,
        }
    }

    /// Bench whose `family` controller injects `errors`.
    pub fn with_errors(pin_map: MockPinMap, family: ChannelFamily, errors: ErrorConfig) -> Self {
        Self::with_families(pin_map, move |f| {
            if f.family() == family {
                f.with_errors(errors.clone())
            } else {
                f
            }
        })
    }

    /// Bench where every call takes [`TimingConfig::realistic`] time.
    pub fn realistic(pin_map: MockPinMap) -> Self {
        Self::with_families(pin_map, |f| f.with_timing(TimingConfig::realistic()))
    }

    pub fn controller(&self, family: ChannelFamily) -> Arc<MockChannelFamily> {
        match family {
            ChannelFamily::SourceMeasure => self.smu.clone(),
            ChannelFamily::DigitalPpmu => self.ppmu.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semitest_core::capabilities::{SiteUniverse, TopologyLookup};

    #[test]
    fn builds_from_toml() {
        let config: BenchConfig = toml::from_str(
            r#"
            sites = [0, 1]

            [[pins]]
            name = "VCC"
            family = "smu"
            resistance_ohms = 50.0

            [[pins]]
            name = "IO1"
            family = "ppmu"
            sites = [1]

            [[groups]]
            name = "All"
            pins = ["VCC", "IO1"]
            "#,
        )
        .unwrap();

        let bench = MockBench::from_config(&config);
        assert_eq!(bench.pin_map.site_numbers(), vec![0, 1]);
        assert_eq!(bench.pin_map.sites_of("IO1"), vec![1]);
        assert_eq!(bench.pin_map.pin("VCC").unwrap().resistance_ohms, 50.0);
        assert_eq!(
            bench
                .pin_map
                .filter_pins_by_family(&["All".to_string()], ChannelFamily::DigitalPpmu),
            vec!["IO1"]
        );
    }
}
