//! Shared, ordered record of every simulated hardware call.
//!
//! All mock families of one bench write into the same log, so tests can
//! replay the global order of force/zero transitions across families.

use parking_lot::Mutex;
use semitest_core::family::ChannelFamily;
use semitest_core::settings::{ComplianceLimit, OutputFunction};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Force {
        function: OutputFunction,
        level: f64,
        limit: ComplianceLimit,
    },
    Measure,
    PowerDown,
    LimitConfigured { current_limit: f64 },
}

/// One per-pin hardware event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    /// Global sequence number, strictly increasing across families
    pub seq: u64,
    pub family: ChannelFamily,
    pub pin: String,
    pub kind: EventKind,
}

impl ChannelEvent {
    /// Whether the event leaves the pin sourcing a non-zero level.
    pub fn energizes(&self) -> bool {
        matches!(self.kind, EventKind::Force { level, .. } if level != 0.0)
    }

    /// Whether the event returns the pin to zero or turns it off.
    pub fn de_energizes(&self) -> bool {
        match self.kind {
            EventKind::Force { level, .. } => level == 0.0,
            EventKind::PowerDown => true,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    next_seq: u64,
    events: Vec<ChannelEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<LogInner>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, family: ChannelFamily, pin: impl Into<String>, kind: EventKind) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.push(ChannelEvent {
            seq,
            family,
            pin: pin.into(),
            kind,
        });
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.inner.lock().events.clone()
    }

    pub fn events_for(&self, pin: &str) -> Vec<ChannelEvent> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.pin == pin)
            .cloned()
            .collect()
    }

    /// Level of the last `Force` recorded for `pin`.
    pub fn last_forced_level(&self, pin: &str) -> Option<f64> {
        self.inner
            .lock()
            .events
            .iter()
            .rev()
            .find_map(|e| match e.kind {
                EventKind::Force { level, .. } if e.pin == pin => Some(level),
                _ => None,
            })
    }

    /// Largest number of `pins` that were energized at the same time.
    ///
    /// Replays the log: a non-zero force energizes a pin; a zero force or a
    /// power-down de-energizes it.
    pub fn max_simultaneously_energized(&self, pins: &[&str]) -> usize {
        let watched: BTreeSet<&str> = pins.iter().copied().collect();
        let mut live: BTreeSet<String> = BTreeSet::new();
        let mut peak = 0;
        for event in self.inner.lock().events.iter() {
            if !watched.contains(event.pin.as_str()) {
                continue;
            }
            if event.energizes() {
                live.insert(event.pin.clone());
            } else if event.de_energizes() {
                live.remove(&event.pin);
            }
            peak = peak.max(live.len());
        }
        peak
    }

    /// Pins still energized after replaying the whole log.
    pub fn energized_pins(&self) -> BTreeSet<String> {
        let mut state: HashMap<String, bool> = HashMap::new();
        for event in self.inner.lock().events.iter() {
            if event.energizes() {
                state.insert(event.pin.clone(), true);
            } else if event.de_energizes() {
                state.insert(event.pin.clone(), false);
            }
        }
        state
            .into_iter()
            .filter_map(|(pin, on)| on.then_some(pin))
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.events.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
