//! Shared fixtures for integration tests.

#![allow(dead_code)]

use semitest::plan::bench_context;
use semitest::config::DefaultsConfig;
use semitest::TestContext;
use semitest_core::family::ChannelFamily;
use semitest_driver_mock::{ErrorConfig, MockBench, MockPinMap, PinSpec};

/// One site; SMU supply `VDD`, SMU `A`, PPMU `B` and `C`, group `Sweep = [A, B, C]`.
pub fn pin_map() -> MockPinMap {
    MockPinMap::new(vec![0])
        .with_pin(PinSpec::new("VDD", ChannelFamily::SourceMeasure).with_resistance(50.0))
        .with_pin(PinSpec::new("A", ChannelFamily::SourceMeasure))
        .with_pin(PinSpec::new("B", ChannelFamily::DigitalPpmu))
        .with_pin(PinSpec::new("C", ChannelFamily::DigitalPpmu))
        .with_group("Sweep", ["A", "B", "C"])
}

pub fn bench() -> MockBench {
    MockBench::new(pin_map())
}

pub fn failing_bench(family: ChannelFamily, errors: ErrorConfig) -> MockBench {
    MockBench::with_errors(pin_map(), family, errors)
}

pub fn context(bench: &MockBench) -> TestContext {
    bench_context(bench, &DefaultsConfig::default())
}

pub fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
