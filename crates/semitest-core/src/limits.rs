//! Fixed electrical constants and result tags.

/// Current limit used to emulate a high-impedance state while powering down (100 nA).
pub const LOWEST_CURRENT_LIMIT: f64 = 1e-7;

/// Result tags passed to [`ResultPublisher`](crate::capabilities::ResultPublisher).
pub mod tags {
    pub const VOLTAGE: &str = "Voltage";
    pub const CURRENT: &str = "Current";
    pub const TOTAL_CURRENT: &str = "Total Current";
    pub const CONTINUITY: &str = "Continuity";
    pub const LEAKAGE: &str = "Leakage";
}
