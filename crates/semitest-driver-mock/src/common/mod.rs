//! Common infrastructure for the simulated bench.
//!
//! - **errors**: failure injection keyed by operation and pin
//! - **rng**: seeded random number generator for chaos-style failures
//! - **timing**: simulated driver call latency

pub mod errors;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::MockRng;
pub use timing::TimingConfig;
