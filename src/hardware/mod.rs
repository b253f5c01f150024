//! Hardware access layer for relay switches
//!
//! The relay board is a boundary dependency reached through an external
//! command-line tool, so it sits behind the [`RelayController`] capability
//! trait; tests substitute a fake controller without spawning subprocesses.

use async_trait::async_trait;
use std::collections::HashMap;

pub mod usbrelay;

pub use usbrelay::UsbRelayTool;

/// Observed state of a single relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    On,
    Off,
    /// The hardware tool did not report this id (tool failure or id absent)
    Unknown,
}

impl RelayState {
    /// Payload literal published for this state, if known
    pub fn payload(&self) -> Option<&'static str> {
        match self {
            RelayState::On => Some("on"),
            RelayState::Off => Some("off"),
            RelayState::Unknown => None,
        }
    }
}

/// Point-in-time read of all relay states as reported by the hardware tool.
///
/// Produced fresh on every reconciliation and discarded afterwards; ids the
/// tool did not report are [`RelayState::Unknown`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaySnapshot {
    states: HashMap<String, bool>,
}

impl RelaySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relay_id: impl Into<String>, on: bool) {
        self.states.insert(relay_id.into(), on);
    }

    pub fn state(&self, relay_id: &str) -> RelayState {
        match self.states.get(relay_id) {
            Some(true) => RelayState::On,
            Some(false) => RelayState::Off,
            None => RelayState::Unknown,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl FromIterator<(String, bool)> for RelaySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

/// Capability interface over the physical relays.
///
/// Both operations are fail-soft: hardware trouble is logged inside the
/// implementation and never propagated. `read_all` returns whatever partial
/// snapshot could be obtained so reconciliation always proceeds.
#[async_trait]
pub trait RelayController: Send + Sync {
    /// Query the state of every attached relay in one tool invocation
    async fn read_all(&self) -> RelaySnapshot;

    /// Switch one relay on or off
    async fn set(&self, relay_id: &str, on: bool);
}
