//! Collaborator capabilities
//!
//! The orchestration services never talk to a concrete instrument driver.
//! They depend on four small capability traits:
//!
//! - [`ChannelFamilyController`]: force / measure / power down one channel family
//! - [`TopologyLookup`]: which concrete pins under a request belong to a family
//! - [`SiteUniverse`]: the caller-defined ordering of site numbers
//! - [`ResultPublisher`]: the per-site and per-channel result sink
//!
//! # Design Philosophy
//!
//! - Controllers are async (uses #[async_trait]) and thread-safe (Send + Sync),
//!   so a fan-out can drive them from independent tasks.
//! - Lookups and publication are synchronous; they never touch hardware.
//! - Driver failures come back as [`DriverError`] so the orchestration layer
//!   can attach the family and keep native codes.
//!
//! # Example
//!
//! ```rust,ignore
//! struct LoggingSmu;
//!
//! #[async_trait]
//! impl ChannelFamilyController for LoggingSmu {
//!     fn family(&self) -> ChannelFamily {
//!         ChannelFamily::SourceMeasure
//!     }
//!
//!     async fn force(&self, pins: &[PinForce]) -> DriverResult<()> {
//!         for p in pins {
//!             tracing::info!(pin = %p.pin, level = p.settings.level, "force");
//!         }
//!         Ok(())
//!     }
//!     // ...
//! }
//! ```

use crate::error::DriverResult;
use crate::family::ChannelFamily;
use crate::settings::{ChannelMeasurement, ChannelValue, MeasureSettings, PinForce};
use async_trait::async_trait;
use std::time::Duration;

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: one channel family's force/measure/power-down operations
///
/// # Contract
/// - Every method acts on all sites each pin is mapped to.
/// - `force` returns once the source settings are applied; settling is the
///   caller's responsibility.
/// - `power_down` disables output and waits `settle` before returning.
/// - Pins not owned by this family are a `DriverErrorKind::InvalidParameter`.
///
/// # Thread Safety
/// - All methods take `&self`; implementations use interior mutability.
#[async_trait]
pub trait ChannelFamilyController: Send + Sync {
    /// Family this controller drives.
    fn family(&self) -> ChannelFamily;

    /// Apply per-pin source settings.
    async fn force(&self, pins: &[PinForce]) -> DriverResult<()>;

    /// Measure every site/pin channel of `pins`.
    ///
    /// # Returns
    /// One entry per channel, in pin order then site order.
    async fn measure(
        &self,
        pins: &[String],
        settings: &MeasureSettings,
    ) -> DriverResult<Vec<ChannelMeasurement>>;

    /// Disable output on `pins` and wait `settle`.
    async fn power_down(&self, pins: &[String], settle: Duration) -> DriverResult<()>;

    /// Read back the current limit configured on every channel of `pins`.
    async fn current_limits(&self, pins: &[String]) -> DriverResult<Vec<ChannelValue>>;

    /// Program per-channel current limits without changing the level.
    async fn configure_current_limits(&self, limits: &[ChannelValue]) -> DriverResult<()>;
}

/// Capability: pin-map topology queries
pub trait TopologyLookup: Send + Sync {
    /// Concrete pins under `pins_or_groups` that belong to `family`.
    ///
    /// Possibly empty. Order follows the request, then pin-group internal order.
    fn filter_pins_by_family(&self, pins_or_groups: &[String], family: ChannelFamily)
        -> Vec<String>;
}

/// Capability: the site universe of the current test
pub trait SiteUniverse: Send + Sync {
    /// Every active site number, in the order results must be published.
    fn site_numbers(&self) -> Vec<u32>;
}

/// Capability: result publication sink
pub trait ResultPublisher: Send + Sync {
    /// Publish one value per site; `values[i]` belongs to `site_numbers()[i]`.
    fn publish_per_site(&self, values: &[f64], tag: &str);

    /// Publish one value per site/pin channel.
    fn publish_per_channel(&self, values: &[ChannelValue], tag: &str);
}
