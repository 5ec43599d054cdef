//! Simulated hardware for semitest
//!
//! Everything the orchestration layer needs to run without instruments:
//!
//! - [`MockChannelFamily`] - source-measure or PPMU channel family with a
//!   resistive load model
//! - [`MockPinMap`] - pin/pin-group topology and site universe
//! - [`RecordingPublisher`] - result sink that keeps every publication
//! - [`EventLog`] - ordered record of every force/measure/power-down call,
//!   shared by all families of a bench
//! - [`ErrorConfig`] - failure injection keyed by operation and pin
//!
//! All mock calls use async-safe waits (`tokio::time::sleep`).
//!
//! ```rust,ignore
//! let bench = MockBench::new(
//!     MockPinMap::new(vec![0])
//!         .with_pin(PinSpec::new("VCC", ChannelFamily::SourceMeasure))
//!         .with_pin(PinSpec::new("IO1", ChannelFamily::DigitalPpmu)),
//! );
//! bench.smu.set_reading(0, "VCC", Reading { voltage: None, current: Some(0.02) });
//! ```

mod bench;
pub mod common;
mod event_log;
mod mock_family;
mod pin_map;
mod publisher;

pub use bench::{BenchConfig, MockBench};
pub use common::{ErrorConfig, ErrorScenario, MockRng, TimingConfig};
pub use event_log::{ChannelEvent, EventKind, EventLog};
pub use mock_family::{
    ChannelState, MockChannelFamily, Reading, DEFAULT_CURRENT_LIMIT, OP_CONFIGURE_LIMITS,
    OP_FORCE, OP_MEASURE, OP_POWER_DOWN, OP_READ_LIMITS,
};
pub use pin_map::{GroupSpec, MockPinMap, PinSpec};
pub use publisher::{PublishedResult, RecordingPublisher};
