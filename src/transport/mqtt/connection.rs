//! Connection state and session configuration
//!
//! Pure pieces of the MQTT session: the connection state machine data,
//! reconnection backoff policy, and broker option construction.

use crate::config::BridgeConfig;
use rumqttc::v5::MqttOptions;
use std::time::Duration;
use thiserror::Error;

/// Connection state for the broker session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
}

/// Reconnection backoff policy
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds, walked once per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay used after the pattern is exhausted (retries are unlimited)
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        match self.backoff_pattern.get(index) {
            Some(delay) => *delay,
            None => self.sustained_delay,
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Build rumqttc options from the bridge configuration.
///
/// The client id carries a timestamp so a restarted process never collides
/// with its previous session on the broker.
pub fn configure_mqtt_options(config: &BridgeConfig) -> MqttOptions {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let client_id = format!("relaybridge-{timestamp}");

    let mut mqtt_options = MqttOptions::new(
        client_id,
        &config.mqtt.broker_host,
        config.mqtt.broker_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));

    if let Some(username) = config.mqtt_username() {
        let password = config.mqtt_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options
}
