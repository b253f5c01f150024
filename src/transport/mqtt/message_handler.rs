//! Event routing for the MQTT event loop
//!
//! Pure classification of rumqttc events into the handful of routes the
//! session supervisor cares about.

use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::warn;

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message delivered on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker closed the session
    Disconnected,
    /// Subscription confirmed by the broker
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, acks, outgoing packets)
    Infrastructure(String),
}

/// Classify a rumqttc event (pure routing decision)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => {
            use rumqttc::v5::mqttbytes::v5::Packet;
            match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::Infrastructure(format!("{other:?}")),
            }
        }
        Event::Outgoing(outgoing) => EventRoute::Infrastructure(format!("{outgoing:?}")),
    }
}

/// Broker event handed off to the sink worker task
#[derive(Debug)]
pub enum SinkEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
}

/// Hands broker events to the sink worker (impure I/O).
///
/// The channel is unbounded: the supervisor's poll loop must never block
/// behind a busy sink, because reconciliation publishes and subscribes
/// through the client's request queue, which only the poll loop drains.
pub struct SinkEventForwarder {
    sender: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkEventForwarder {
    pub fn new(sender: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { sender }
    }

    pub fn forward(&self, event: SinkEvent) {
        if self.sender.send(event).is_err() {
            warn!("Sink worker stopped; dropping broker event");
        }
    }
}
