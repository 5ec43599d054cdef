//! # semitest
//!
//! Mixed-signal test steps that drive analog source-measure units and the
//! per-pin measurement units of digital instruments through one site/pin
//! abstraction.
//!
//! ## Crate Structure
//!
//! - **`context`**: `TestContext`, the collaborators a step runs against
//!   (topology, site universe, result publisher, one controller per family).
//! - **`steps`**: force and measure steps fanned out across channel families,
//!   with per-site total current aggregated over families.
//! - **`sweep`**: continuity and leakage tests that visit one pin at a time
//!   and never leave more than one swept pin energized.
//! - **`power`**: DUT power-up and power-down, in parallel or pin by pin,
//!   with the optional lowest-current-limit bracket.
//! - **`config`**: figment-based loading of a bench description and a test plan.
//! - **`plan`**: runs a configured plan against a context.
//! - **`tracing_init`**: subscriber setup.
//!
//! Orchestration primitives live in `semitest-core`; the simulated bench used
//! by the CLI and the tests lives in `semitest-driver-mock`.

pub mod config;
pub mod context;
pub mod plan;
pub mod power;
pub mod steps;
pub mod sweep;
pub mod tracing_init;

pub use context::TestContext;
