//! `semitest-core`
//!
//! Core types and stateless orchestration services for driving electrical
//! tests across two channel families (analog source-measure units and
//! per-pin measurement units on digital instruments) that share one
//! site/pin abstraction.
//!
//! ## Services
//!
//! - [`broadcast`]: 0/1/N validation of per-pin-group parameter arrays and
//!   lazy index-or-first expansion
//! - [`partition`]: splits a pin/pin-group request into per-family subsets
//!   with index correlation back to the request
//! - [`fanout`]: concurrent per-family branches with deterministic failure
//!   selection
//! - [`aggregate`]: per-site accumulation across families, published dense
//!   against a caller-defined site ordering
//!
//! Hardware is reached only through the traits in [`capabilities`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let partition = PinPartition::resolve(topology.as_ref(), &pins)?;
//! params.validate(partition.pin_group_count())?;
//!
//! let mut fan_out = FanOut::new();
//! for family in partition.families() {
//!     fan_out = fan_out.branch(family.label(), force_family(family));
//! }
//! fan_out.join().await?;
//! ```

pub mod aggregate;
pub mod broadcast;
pub mod capabilities;
pub mod error;
pub mod family;
pub mod fanout;
pub mod limits;
pub mod partition;
pub mod settings;

pub use aggregate::SiteAggregator;
pub use broadcast::{element_at_or_first, validate_array_len, validate_broadcast, BroadcastParameterSet};
pub use capabilities::{ChannelFamilyController, ResultPublisher, SiteUniverse, TopologyLookup};
pub use error::{
    DriverError, DriverErrorKind, DriverResult, StepFailure, TestError, TestResult,
};
pub use family::ChannelFamily;
pub use fanout::{Branch, FanOut};
pub use limits::LOWEST_CURRENT_LIMIT;
pub use partition::{FamilyPins, PinAssignment, PinPartition};
pub use settings::{
    ChannelMeasurement, ChannelValue, ComplianceLimit, ForceSettings, MeasureSettings,
    MeasurementSense, MeasurementType, OutputFunction, PinForce, TransientResponse,
};
