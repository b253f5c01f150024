//! Connect-time reconciliation
//!
//! On every established connection the reconciler aligns broker topic state
//! with real hardware state: one snapshot read, then per configured relay a
//! retained state publish (when the state is known), a subscription, and a
//! dispatcher binding. The cycle is idempotent by construction - running it
//! again with the same snapshot repeats the same publishes and subscriptions
//! and rebuilds an identical dispatcher table.

use crate::bridge::dispatcher::CommandDispatcher;
use crate::config::BridgeConfig;
use crate::hardware::RelayController;
use crate::transport::{BrokerHandle, EventSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Orchestrates connect-time synchronization and routes inbound messages to
/// the dispatcher bound to their topic.
pub struct Reconciler {
    config: Arc<BridgeConfig>,
    relays: Arc<dyn RelayController>,
    broker: Arc<dyn BrokerHandle>,
    /// Topic -> dispatcher table, rebuilt on every reconciliation.
    /// Only mutated from the sink worker task.
    dispatchers: Mutex<HashMap<String, CommandDispatcher>>,
}

impl Reconciler {
    pub fn new(
        config: Arc<BridgeConfig>,
        relays: Arc<dyn RelayController>,
        broker: Arc<dyn BrokerHandle>,
    ) -> Self {
        Self {
            config,
            relays,
            broker,
            dispatchers: Mutex::new(HashMap::new()),
        }
    }

    /// Run one full reconciliation cycle.
    ///
    /// The hardware is read exactly once per cycle; relays are processed in
    /// configuration order with no parallelism. Publish or subscribe failures
    /// are logged and the cycle continues with the next step.
    pub async fn reconcile(&self) {
        let snapshot = self.relays.read_all().await;
        info!(
            reported = snapshot.len(),
            configured = self.config.relays.len(),
            "Reconciling relay state"
        );

        let mut dispatchers = self.dispatchers.lock().await;
        dispatchers.clear();

        for binding in &self.config.relays {
            match snapshot.state(&binding.relay).payload() {
                Some(payload) => {
                    match self.broker.publish_retained(&binding.topic, payload).await {
                        Ok(()) => {
                            debug!(
                                relay = %binding.relay,
                                topic = %binding.topic,
                                state = payload,
                                "Published retained relay state"
                            );
                        }
                        Err(e) => {
                            warn!(
                                relay = %binding.relay,
                                topic = %binding.topic,
                                error = %e,
                                "Failed to publish relay state"
                            );
                        }
                    }
                }
                None => {
                    debug!(
                        relay = %binding.relay,
                        "Hardware did not report this relay; skipping initial publish"
                    );
                }
            }

            if let Err(e) = self.broker.subscribe(&binding.topic).await {
                warn!(
                    relay = %binding.relay,
                    topic = %binding.topic,
                    error = %e,
                    "Failed to subscribe relay topic"
                );
            }

            dispatchers.insert(
                binding.topic.clone(),
                CommandDispatcher::new(binding.relay.clone(), self.relays.clone()),
            );
        }

        info!(relays = dispatchers.len(), "Reconciliation complete");
    }
}

#[async_trait]
impl EventSink for Reconciler {
    async fn on_connected(&self) {
        info!("Broker session established, starting reconciliation");
        self.reconcile().await;
    }

    async fn on_disconnected(&self, reason: &str) {
        // No compensating hardware action; the next connect re-runs the cycle
        warn!(reason = %reason, "Broker connection lost");
    }

    async fn on_message(&self, topic: &str, payload: &[u8], retain: bool) {
        if retain {
            // The bridge's own retained state echoes back right after each
            // subscribe; live commands are never retained-flagged on delivery.
            debug!(topic = %topic, "Ignoring retained message");
            return;
        }

        let dispatchers = self.dispatchers.lock().await;
        match dispatchers.get(topic) {
            Some(dispatcher) => dispatcher.dispatch(payload).await,
            None => {
                debug!(topic = %topic, "Message on unbound topic ignored");
            }
        }
    }
}
