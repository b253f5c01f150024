//! relaybridge - MQTT bridge for locally attached USB relay boards
//!
//! Lets external systems switch physical relays by publishing `"on"`/`"off"`
//! to configured topics, and announces current relay state through retained
//! messages whenever a broker connection is established.
//!
//! # Overview
//!
//! - [`hardware`] - capability trait over the relay control tool plus the
//!   subprocess-backed implementation
//! - [`transport`] - rumqttc-based broker session with reconnection
//!   supervision and the event/handle seams the core is written against
//! - [`bridge`] - connect-time reconciliation and per-relay command dispatch
//! - [`config`] - immutable TOML configuration loaded once at startup
//!
//! # Quick start
//!
//! ```no_run
//! use relaybridge::bridge::Reconciler;
//! use relaybridge::config::BridgeConfig;
//! use relaybridge::hardware::UsbRelayTool;
//! use relaybridge::transport::mqtt::MqttClient;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> relaybridge::BridgeResult<()> {
//! let config = Arc::new(BridgeConfig::load_from_file("relay-bridge.toml".as_ref())?);
//! let relays = Arc::new(UsbRelayTool::new(
//!     config.hardware.tool.clone(),
//!     Duration::from_secs(config.hardware.command_timeout_secs),
//! ));
//!
//! let mut client = MqttClient::new(config.clone());
//! let reconciler = Arc::new(Reconciler::new(config, relays, client.handle()));
//! client.set_event_sink(reconciler).await;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod testing;
pub mod transport;

pub use bridge::{CommandDispatcher, Reconciler, RelayCommand};
pub use config::{BridgeConfig, ConfigError, RelayBinding};
pub use error::{BridgeError, BridgeResult};
pub use hardware::{RelayController, RelaySnapshot, RelayState, UsbRelayTool};
pub use transport::mqtt::MqttClient;
