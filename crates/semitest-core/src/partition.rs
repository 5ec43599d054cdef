//! Pin topology resolution.
//!
//! Splits an ordered pin/pin-group request into per-family ordered subsets,
//! keeping for every family group the index of the request name it came from
//! so per-pin-group parameters can be looked up with
//! [`element_at_or_first`](crate::broadcast::element_at_or_first).

use crate::capabilities::TopologyLookup;
use crate::error::{TestError, TestResult};
use crate::family::ChannelFamily;
use std::collections::BTreeMap;

/// The pins of one family, grouped by request name.
///
/// `groups[i]` came from `request[request_indices[i]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyPins {
    groups: Vec<Vec<String>>,
    request_indices: Vec<usize>,
}

impl FamilyPins {
    fn push(&mut self, request_index: usize, pins: Vec<String>) {
        self.groups.push(pins);
        self.request_indices.push(request_index);
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// Strictly increasing request indices, one per group.
    pub fn request_indices(&self) -> &[usize] {
        &self.request_indices
    }

    /// `(request_index, pins)` pairs in request order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[String])> + '_ {
        self.request_indices
            .iter()
            .copied()
            .zip(self.groups.iter().map(Vec::as_slice))
    }

    /// Every pin of the family, preserving group-internal order.
    pub fn flattened(&self) -> Vec<String> {
        self.groups.iter().flatten().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// One concrete pin together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinAssignment {
    pub request_index: usize,
    pub family: ChannelFamily,
    pub pin: String,
}

/// Result of resolving a pin/pin-group request against the topology.
///
/// Immutable once built; scoped to one step invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinPartition {
    request: Vec<String>,
    families: BTreeMap<ChannelFamily, FamilyPins>,
}

impl PinPartition {
    /// Resolve `request` against `topology`.
    ///
    /// # Errors
    /// - `NoPinsSpecified` if `request` is empty
    /// - `UnresolvedPin` if a name resolves to no pin in any family
    pub fn resolve(topology: &dyn TopologyLookup, request: &[String]) -> TestResult<Self> {
        if request.is_empty() {
            return Err(TestError::NoPinsSpecified);
        }

        let mut families: BTreeMap<ChannelFamily, FamilyPins> = BTreeMap::new();
        for (index, name) in request.iter().enumerate() {
            let single = std::slice::from_ref(name);
            let mut claimed = false;
            for family in ChannelFamily::ALL {
                let pins = topology.filter_pins_by_family(single, family);
                if pins.is_empty() {
                    continue;
                }
                claimed = true;
                families.entry(family).or_default().push(index, pins);
            }
            if !claimed {
                return Err(TestError::UnresolvedPin(name.clone()));
            }
        }

        tracing::trace!(
            request = ?request,
            families = ?families.keys().collect::<Vec<_>>(),
            "resolved pin partition"
        );
        Ok(Self {
            request: request.to_vec(),
            families,
        })
    }

    /// The original request names.
    pub fn request(&self) -> &[String] {
        &self.request
    }

    /// Number of request names, i.e. the N of the 0/1/N broadcast rule.
    pub fn pin_group_count(&self) -> usize {
        self.request.len()
    }

    /// Families present in the request, in declaration order.
    pub fn families(&self) -> impl Iterator<Item = ChannelFamily> + '_ {
        self.families.keys().copied()
    }

    pub fn family(&self, family: ChannelFamily) -> Option<&FamilyPins> {
        self.families.get(&family)
    }

    pub fn contains(&self, family: ChannelFamily) -> bool {
        self.families.contains_key(&family)
    }

    /// Every concrete pin, family by family.
    pub fn all_pins(&self) -> Vec<String> {
        self.families.values().flat_map(FamilyPins::flattened).collect()
    }

    /// Every concrete pin in request order.
    ///
    /// Within one request name: family declaration order, then group order.
    pub fn assignments(&self) -> Vec<PinAssignment> {
        let mut out: Vec<PinAssignment> = self
            .families
            .iter()
            .flat_map(|(family, pins)| {
                pins.iter().flat_map(move |(request_index, group)| {
                    group.iter().map(move |pin| PinAssignment {
                        request_index,
                        family: *family,
                        pin: pin.clone(),
                    })
                })
            })
            .collect();
        // Stable sort keeps family order and group order for equal indices.
        out.sort_by_key(|a| (a.request_index, a.family.ordinal()));
        out
    }
}
