//! Mock implementations for testing
//!
//! Provides mock `BrokerHandle` and `RelayController` implementations so
//! reconciliation and dispatch can be exercised without a broker or
//! subprocesses.

use crate::hardware::{RelayController, RelaySnapshot};
use crate::transport::{BrokerHandle, MqttError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// (topic, payload, retain)
pub type PublishedMessage = (String, String, bool);

/// Mock broker handle recording publishes and subscriptions
#[derive(Debug, Default)]
pub struct MockBroker {
    pub published: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscribed: Arc<Mutex<Vec<String>>>,
    pub fail_publish: bool,
    pub fail_subscribe: bool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publish_failure() -> Self {
        Self {
            fail_publish: true,
            ..Default::default()
        }
    }

    pub fn with_subscribe_failure() -> Self {
        Self {
            fail_subscribe: true,
            ..Default::default()
        }
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.subscribed.lock().await.clear();
    }
}

#[async_trait]
impl BrokerHandle for MockBroker {
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), MqttError> {
        if self.fail_publish {
            return Err(MqttError::ConnectionFailed(
                "Mock publish failure".to_string(),
            ));
        }
        let mut published = self.published.lock().await;
        published.push((topic.to_string(), payload.to_string(), true));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        if self.fail_subscribe {
            return Err(MqttError::ConnectionFailed(
                "Mock subscribe failure".to_string(),
            ));
        }
        let mut subscribed = self.subscribed.lock().await;
        subscribed.push(topic.to_string());
        Ok(())
    }
}

/// (relay id, on)
pub type SetCall = (String, bool);

/// Mock relay controller with a preset snapshot, recording `set` calls
#[derive(Debug, Default)]
pub struct MockRelayController {
    snapshot: RelaySnapshot,
    pub set_calls: Arc<Mutex<Vec<SetCall>>>,
    pub read_count: Arc<Mutex<u32>>,
}

impl MockRelayController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller whose snapshot reports the given (id, on) states
    pub fn reporting(states: &[(&str, bool)]) -> Self {
        Self {
            snapshot: states
                .iter()
                .map(|(id, on)| (id.to_string(), *on))
                .collect(),
            ..Default::default()
        }
    }

    pub async fn set_calls(&self) -> Vec<SetCall> {
        self.set_calls.lock().await.clone()
    }

    pub async fn read_count(&self) -> u32 {
        *self.read_count.lock().await
    }
}

#[async_trait]
impl RelayController for MockRelayController {
    async fn read_all(&self) -> RelaySnapshot {
        let mut count = self.read_count.lock().await;
        *count += 1;
        self.snapshot.clone()
    }

    async fn set(&self, relay_id: &str, on: bool) {
        let mut calls = self.set_calls.lock().await;
        calls.push((relay_id.to_string(), on));
    }
}
