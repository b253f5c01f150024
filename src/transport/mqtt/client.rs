//! Broker session owner
//!
//! Owns the rumqttc client and its event loop, supervises reconnection, and
//! forwards broker events to a dedicated sink worker task. The worker handles
//! lifecycle events and message deliveries strictly one at a time, so dispatch
//! and hardware calls never run concurrently with each other, while the
//! supervisor keeps polling the event loop - polling is what drains the
//! client's outbound request queue, so the sink's own publishes and
//! subscribes during reconciliation complete instead of deadlocking.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::message_handler::{route_event, EventRoute, SinkEvent, SinkEventForwarder};
use crate::config::BridgeConfig;
use crate::transport::{BrokerHandle, EventSink};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Maximum wait for the first ConnAck before startup fails
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type SharedSink = Arc<Mutex<Option<Arc<dyn EventSink>>>>;

/// MQTT client owning the broker session for the process lifetime
pub struct MqttClient {
    config: Arc<BridgeConfig>,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: Option<EventLoop>,
    event_loop_handle: Option<JoinHandle<()>>,
    sink_worker_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    sink: SharedSink,
}

impl MqttClient {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        let mqtt_options = configure_mqtt_options(&config);
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        Self {
            config,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(event_loop),
            event_loop_handle: None,
            sink_worker_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the object receiving lifecycle and message events.
    /// Must be called before `connect()` so the first ConnAck reaches it.
    pub async fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        let mut guard = self.sink.lock().await;
        *guard = Some(sink);
    }

    /// Handle for outbound operations, shared with the bridge core.
    /// Remains valid across reconnects: the underlying client is swapped in
    /// place when a new session is established.
    pub fn handle(&self) -> Arc<dyn BrokerHandle> {
        Arc::new(BrokerLink {
            client: self.client.clone(),
        })
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone()));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(
                "No ConnAck received before timeout".to_string(),
            )),
        }
    }

    /// Connect to the broker and start the session supervisor.
    /// Returns once the broker acknowledges the connection; every later
    /// reconnect is handled by the supervisor transparently.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| MqttError::ConnectionFailed("Session already started".to_string()))?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        self.sink_worker_handle = Some(tokio::spawn(Self::drain_sink_events(
            self.sink.clone(),
            sink_rx,
        )));

        let supervisor = SessionSupervisor {
            config: self.config.clone(),
            shared_client: self.client.clone(),
            reconnect_config: self.reconnect_config.clone(),
            forwarder: SinkEventForwarder::new(sink_tx),
            state_tx,
            shutdown_rx,
        };
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop)));

        Self::wait_for_connection_confirmation(state_rx, CONNECT_TIMEOUT).await
    }

    /// Signal the supervisor to stop and close the broker session
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        {
            let client = self.client.lock().await;
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "Broker disconnect request failed");
            }
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Session supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Session supervisor ended with error: {e}");
                }
                Err(_) => warn!("Session supervisor did not stop in time, aborting"),
                _ => {}
            }
        }

        // Supervisor gone: the event channel is closed, so the worker exits
        // once it has drained what was queued
        if let Some(handle) = self.sink_worker_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(_) => debug!("Sink worker drained and stopped"),
                Err(_) => warn!("Sink worker did not stop in time"),
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// Current connection state; `None` before `connect()`
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    /// Sleep that wakes early when shutdown is signalled.
    /// Returns false if shutdown was requested.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Worker draining forwarded broker events into the registered sink,
    /// strictly one at a time. Runs on its own task so a sink busy
    /// reconciling never suspends the supervisor's poll loop. Exits when the
    /// supervisor drops its end of the channel.
    async fn drain_sink_events(
        sink: SharedSink,
        mut events: mpsc::UnboundedReceiver<SinkEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let registered = sink.lock().await.as_ref().cloned();
            let Some(registered) = registered else {
                warn!("Broker event received but no event sink registered");
                continue;
            };
            match event {
                SinkEvent::Connected => registered.on_connected().await,
                SinkEvent::Disconnected { reason } => registered.on_disconnected(&reason).await,
                SinkEvent::Message {
                    topic,
                    payload,
                    retain,
                } => registered.on_message(&topic, &payload, retain).await,
            }
        }
        debug!("Sink worker stopped");
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.sink_worker_handle.take() {
            handle.abort();
        }
    }
}

/// Outbound handle shared with the reconciler and dispatchers
struct BrokerLink {
    client: Arc<Mutex<AsyncClient>>,
}

#[async_trait]
impl BrokerHandle for BrokerLink {
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), MqttError> {
        let client = self.client.lock().await;
        client
            .publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        let client = self.client.lock().await;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscribeFailed(Box::new(e)))
    }
}

/// Background task owning the event loop: forwards broker events to the sink
/// worker and re-establishes the session after drops with bounded backoff.
struct SessionSupervisor {
    config: Arc<BridgeConfig>,
    shared_client: Arc<Mutex<AsyncClient>>,
    reconnect_config: ReconnectConfig,
    forwarder: SinkEventForwarder,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionSupervisor {
    async fn run(self, mut event_loop: EventLoop) {
        info!(
            broker = %format!("{}:{}", self.config.mqtt.broker_host, self.config.mqtt.broker_port),
            "Starting MQTT session supervisor"
        );
        let mut reconnect_attempts = 0u32;
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping session supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => match route_event(&event) {
                            EventRoute::ConnectionAcknowledged => {
                                let _ = self.state_tx.send(ConnectionState::Connected);
                                reconnect_attempts = 0;
                                info!("Broker connection established");
                                self.forwarder.forward(SinkEvent::Connected);
                            }
                            EventRoute::MessageReceived { topic, payload, retain } => {
                                self.forwarder.forward(SinkEvent::Message {
                                    topic,
                                    payload,
                                    retain,
                                });
                            }
                            EventRoute::Disconnected => {
                                let reason = "Disconnected by broker".to_string();
                                let _ = self.state_tx.send(
                                    ConnectionState::Disconnected(reason.clone()),
                                );
                                warn!("Broker closed the session");
                                self.forwarder.forward(SinkEvent::Disconnected {
                                    reason,
                                });
                                if !self.reconnect(&mut event_loop, &mut reconnect_attempts).await {
                                    break;
                                }
                            }
                            EventRoute::SubscriptionConfirmed { packet_id } => {
                                debug!(packet_id, "Subscription confirmed");
                            }
                            EventRoute::Infrastructure(event_str) => {
                                debug!(target: "mqtt_transport", "MQTT event: {event_str}");
                            }
                        },
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = self.state_tx.send(
                                ConnectionState::Disconnected(reason.clone()),
                            );
                            error!(error = %reason, "MQTT event loop error");
                            self.forwarder.forward(SinkEvent::Disconnected {
                                reason,
                            });
                            if !self.reconnect(&mut event_loop, &mut reconnect_attempts).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("MQTT session supervisor stopped");
    }

    /// Back off, then replace the client and event loop with a fresh session.
    /// Returns false when shutdown was requested during the backoff.
    async fn reconnect(&self, event_loop: &mut EventLoop, attempts: &mut u32) -> bool {
        *attempts += 1;
        let _ = self.state_tx.send(ConnectionState::Reconnecting(*attempts));
        let delay_ms = self.reconnect_config.backoff_delay(*attempts);
        info!(attempt = *attempts, delay_ms, "Attempting reconnection");

        if !MqttClient::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
            info!("Shutdown signal received during reconnection delay");
            return false;
        }
        if *self.shutdown_rx.borrow() {
            return false;
        }

        let mqtt_options = configure_mqtt_options(&self.config);
        let (new_client, new_event_loop) = AsyncClient::new(mqtt_options, 10);
        *event_loop = new_event_loop;
        // Swap the shared client so the outbound handle follows the new session
        {
            let mut client_guard = self.shared_client.lock().await;
            *client_guard = new_client;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(200))
                .await;
        assert!(result.is_ok(), "Should resolve once ConnAck state arrives");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        // Keep the sender alive but never signal
        let _handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(state_tx);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;
        assert!(result.is_err(), "Should time out without ConnAck");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("refused".to_string()));
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(200))
                .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("refused"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let ((_, _), (_shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();
        assert!(MqttClient::interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let ((_, _), (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!MqttClient::interruptible_sleep(shutdown_rx, 200).await);
    }

    #[tokio::test]
    async fn test_connection_state_before_connect() {
        let config = Arc::new(crate::config::BridgeConfig::test_config());
        let client = MqttClient::new(config);
        assert!(client.connection_state().is_none());
        assert!(!client.is_connected());
    }

    /// Sink that stalls inside `on_connected` until released, standing in for
    /// a reconciliation that publishes and subscribes many topics
    struct GatedSink {
        release: Arc<tokio::sync::Semaphore>,
        handled: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventSink for GatedSink {
        async fn on_connected(&self) {
            let _permit = self.release.acquire().await;
            self.handled.lock().await.push("connected".to_string());
        }

        async fn on_disconnected(&self, reason: &str) {
            self.handled.lock().await.push(format!("disconnected:{reason}"));
        }

        async fn on_message(&self, topic: &str, _payload: &[u8], _retain: bool) {
            self.handled.lock().await.push(format!("message:{topic}"));
        }
    }

    #[tokio::test]
    async fn test_event_intake_not_blocked_by_busy_sink() {
        let release = Arc::new(tokio::sync::Semaphore::new(0));
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn EventSink> = Arc::new(GatedSink {
            release: release.clone(),
            handled: handled.clone(),
        });
        let shared: SharedSink = Arc::new(Mutex::new(Some(sink)));

        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(MqttClient::drain_sink_events(shared, sink_rx));
        let forwarder = SinkEventForwarder::new(sink_tx);

        // The sink is stalled in on_connected, yet every later delivery
        // enqueues immediately. With more configured relays than the client's
        // outbound request queue holds, this is what keeps the poll loop
        // draining requests while reconciliation runs.
        forwarder.forward(SinkEvent::Connected);
        for i in 0..12 {
            forwarder.forward(SinkEvent::Message {
                topic: format!("t{i}"),
                payload: b"on".to_vec(),
                retain: false,
            });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handled.lock().await.is_empty(), "Sink still gated");

        release.add_permits(1);
        // Closing the channel lets the worker drain the backlog and exit
        drop(forwarder);
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("Worker must drain all queued events")
            .unwrap();

        let handled = handled.lock().await;
        assert_eq!(handled.len(), 13, "Every queued event reaches the sink");
        assert_eq!(handled[0], "connected");
        assert_eq!(handled[1], "message:t0");
        assert_eq!(handled[12], "message:t11");
    }

    #[tokio::test]
    async fn test_sink_worker_without_registered_sink() {
        let shared: SharedSink = Arc::new(Mutex::new(None));
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(MqttClient::drain_sink_events(shared, sink_rx));

        let forwarder = SinkEventForwarder::new(sink_tx);
        forwarder.forward(SinkEvent::Connected);
        drop(forwarder);

        // Events without a sink are logged and dropped; the worker still exits
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("Worker must exit once the channel closes")
            .unwrap();
    }
}
