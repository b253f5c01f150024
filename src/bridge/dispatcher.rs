//! Per-relay command dispatch
//!
//! Translates an inbound topic payload into a hardware command for one relay.
//! The payload contract is exact: the UTF-8 text `on` or `off`, nothing else.

use crate::hardware::RelayController;
use std::sync::Arc;
use tracing::warn;

/// Decoded relay command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
}

impl RelayCommand {
    /// Decode a payload; anything but exactly `"on"` or `"off"` is rejected
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match std::str::from_utf8(payload).ok()? {
            "on" => Some(RelayCommand::On),
            "off" => Some(RelayCommand::Off),
            _ => None,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, RelayCommand::On)
    }
}

/// Dispatcher bound to one (relay id, topic) pair
pub struct CommandDispatcher {
    relay_id: String,
    relays: Arc<dyn RelayController>,
}

impl CommandDispatcher {
    pub fn new(relay_id: impl Into<String>, relays: Arc<dyn RelayController>) -> Self {
        Self {
            relay_id: relay_id.into(),
            relays,
        }
    }

    pub fn relay_id(&self) -> &str {
        &self.relay_id
    }

    /// Handle one inbound payload. Unknown payloads produce a warning and no
    /// hardware action; nothing is surfaced back to the broker either way.
    pub async fn dispatch(&self, payload: &[u8]) {
        match RelayCommand::parse(payload) {
            Some(command) => {
                self.relays.set(&self.relay_id, command.is_on()).await;
            }
            None => {
                warn!(
                    relay = %self.relay_id,
                    payload = %String::from_utf8_lossy(payload),
                    "Unknown relay state requested"
                );
            }
        }
    }
}
