//! Broker transport layer
//!
//! Provides the MQTT session implementation plus the two seams the bridge
//! core is written against: [`BrokerHandle`] for outbound publish/subscribe
//! and [`EventSink`] for inbound lifecycle and message events.

use async_trait::async_trait;

pub mod mqtt;

pub use mqtt::connection::{ConnectionState, MqttError};

/// Outbound broker operations available to the bridge core.
///
/// Both operations use QoS 1 ("at least once"); state publishes are retained
/// so late subscribers receive last-known state.
#[async_trait]
pub trait BrokerHandle: Send + Sync {
    /// Publish a retained state message
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), MqttError>;

    /// Subscribe to a command topic
    async fn subscribe(&self, topic: &str) -> Result<(), MqttError>;
}

/// Receiver of broker session events.
///
/// Implemented by the reconciler as an explicit object holding its
/// dependencies, rather than a set of captured closures. `on_connected` fires
/// on every successful handshake, including each reconnect, and must be
/// idempotent.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Session established (initial connect or reconnect)
    async fn on_connected(&self);

    /// Session lost; subscriptions are not assumed to survive
    async fn on_disconnected(&self, reason: &str);

    /// Message delivered on a subscribed topic
    async fn on_message(&self, topic: &str, payload: &[u8], retain: bool);
}
