//! MQTT session implementation built on rumqttc

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
