//! Simulated pin map and site universe.

use semitest_core::capabilities::{SiteUniverse, TopologyLookup};
use semitest_core::family::ChannelFamily;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_resistance() -> f64 {
    1_000.0
}

/// One DUT pin wired to one channel family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinSpec {
    pub name: String,
    pub family: ChannelFamily,
    /// Load seen by the channel, used by the measurement model
    #[serde(default = "default_resistance")]
    pub resistance_ohms: f64,
    /// Sites the pin is wired on; every site when absent
    #[serde(default)]
    pub sites: Option<Vec<u32>>,
}

impl PinSpec {
    pub fn new(name: impl Into<String>, family: ChannelFamily) -> Self {
        Self {
            name: name.into(),
            family,
            resistance_ohms: default_resistance(),
            sites: None,
        }
    }

    pub fn with_resistance(mut self, ohms: f64) -> Self {
        self.resistance_ohms = ohms;
        self
    }

    pub fn on_sites(mut self, sites: Vec<u32>) -> Self {
        self.sites = Some(sites);
        self
    }
}

/// A named, ordered collection of pins; may straddle families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub pins: Vec<String>,
}

/// Pin map of the simulated bench.
#[derive(Debug, Clone, Default)]
pub struct MockPinMap {
    sites: Vec<u32>,
    pins: Vec<PinSpec>,
    index: HashMap<String, usize>,
    groups: HashMap<String, Vec<String>>,
}

impl MockPinMap {
    pub fn new(sites: Vec<u32>) -> Self {
        Self {
            sites,
            ..Default::default()
        }
    }

    pub fn from_specs(sites: Vec<u32>, pins: &[PinSpec], groups: &[GroupSpec]) -> Self {
        let mut map = Self::new(sites);
        for pin in pins {
            map.add_pin(pin.clone());
        }
        for group in groups {
            map.add_group(group.name.clone(), group.pins.clone());
        }
        map
    }

    pub fn with_pin(mut self, pin: PinSpec) -> Self {
        self.add_pin(pin);
        self
    }

    pub fn with_group<I, S>(mut self, name: impl Into<String>, pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_group(name.into(), pins.into_iter().map(Into::into).collect());
        self
    }

    /// Add or replace a pin.
    pub fn add_pin(&mut self, pin: PinSpec) {
        match self.index.get(&pin.name) {
            Some(&i) => self.pins[i] = pin,
            None => {
                self.index.insert(pin.name.clone(), self.pins.len());
                self.pins.push(pin);
            }
        }
    }

    pub fn add_group(&mut self, name: String, pins: Vec<String>) {
        self.groups.insert(name, pins);
    }

    pub fn pin(&self, name: &str) -> Option<&PinSpec> {
        self.index.get(name).map(|&i| &self.pins[i])
    }

    pub fn pins(&self) -> &[PinSpec] {
        &self.pins
    }

    pub fn family_of(&self, pin: &str) -> Option<ChannelFamily> {
        self.pin(pin).map(|p| p.family)
    }

    /// Sites `pin` is wired on, in site-universe order.
    pub fn sites_of(&self, pin: &str) -> Vec<u32> {
        match self.pin(pin) {
            Some(PinSpec {
                sites: Some(subset),
                ..
            }) => self
                .sites
                .iter()
                .copied()
                .filter(|s| subset.contains(s))
                .collect(),
            Some(_) => self.sites.clone(),
            None => Vec::new(),
        }
    }

    /// Concrete pins under one name: the group's members, or the pin itself.
    fn expand<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        if let Some(members) = self.groups.get(name) {
            return members.iter().map(String::as_str).collect();
        }
        if self.index.contains_key(name) {
            return vec![name];
        }
        Vec::new()
    }
}

impl TopologyLookup for MockPinMap {
    fn filter_pins_by_family(
        &self,
        pins_or_groups: &[String],
        family: ChannelFamily,
    ) -> Vec<String> {
        pins_or_groups
            .iter()
            .flat_map(|name| self.expand(name))
            .filter(|pin| self.family_of(pin) == Some(family))
            .map(str::to_string)
            .collect()
    }
}

impl SiteUniverse for MockPinMap {
    fn site_numbers(&self) -> Vec<u32> {
        self.sites.clone()
    }
}
