//! Channel families.
//!
//! A pin is wired to exactly one hardware channel family. A pin *group* may
//! straddle families, which is why every orchestration service works on a
//! per-family view of the request.

use serde::{Deserialize, Serialize};

/// Hardware subsystem that drives a pin.
///
/// The declaration order is significant: fan-out branches are declared in
/// this order, and failure selection is deterministic with respect to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelFamily {
    /// Analog source-measure unit channels
    #[serde(alias = "smu")]
    SourceMeasure,
    /// Per-pin measurement unit channels on a digital pattern instrument
    #[serde(alias = "ppmu")]
    DigitalPpmu,
}

impl ChannelFamily {
    /// Every family, in declaration order.
    pub const ALL: [ChannelFamily; 2] = [ChannelFamily::SourceMeasure, ChannelFamily::DigitalPpmu];

    /// Short label used in logs and error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::SourceMeasure => "smu",
            Self::DigitalPpmu => "ppmu",
        }
    }

    /// Position in declaration order.
    pub fn ordinal(&self) -> usize {
        match self {
            Self::SourceMeasure => 0,
            Self::DigitalPpmu => 1,
        }
    }
}

impl std::fmt::Display for ChannelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
