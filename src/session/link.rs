//! Broker client seam and the rumqttc-backed implementation
//!
//! [`BrokerLink`] abstracts the protocol operations of a live connection and
//! [`BrokerConnector`] abstracts opening one, so the session manager can be
//! driven by a fake broker in tests. The real implementation delegates all
//! protocol work (framing, QoS handshakes, keepalive, re-dialing) to rumqttc.

use super::events::{decode_payload, route_event, EventRoute};
use super::{ConnectOptions, ConnectionState, QosLevel, SessionConfig};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before re-polling the event loop after a connection error. Polling
/// again makes rumqttc re-dial the broker, which is the transparent
/// library-level reconnection the session does not track.
const POLL_RETRY_DELAY_MS: u64 = 1000;

/// Error from the underlying MQTT library, carried as display text
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LinkError(String);

impl LinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Protocol operations available on a live connection
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError>;

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), LinkError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// Everything the session needs to own a freshly opened connection
pub struct BrokerHandle {
    pub link: Box<dyn BrokerLink>,
    /// Resolved by the event loop task on ConnAck/Disconnect
    pub state_rx: watch::Receiver<ConnectionState>,
    /// Signals the event loop task to stop
    pub shutdown_tx: watch::Sender<bool>,
    pub event_loop: Option<JoinHandle<()>>,
}

/// Opens broker connections; the injection point for fakes in tests
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn open(
        &self,
        opts: &ConnectOptions,
        config: &SessionConfig,
    ) -> Result<BrokerHandle, LinkError>;
}

fn to_rumqttc_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Client identifier to present to the broker
///
/// Generated ids carry a timestamp so a replaced session never collides with
/// its predecessor on the broker side.
pub(crate) fn effective_client_id(opts: &ConnectOptions) -> String {
    match &opts.client_id {
        Some(id) => id.clone(),
        None => {
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            format!("mqtt-bridge-{timestamp}")
        }
    }
}

/// Build rumqttc options from connect parameters
fn configure_mqtt_options(opts: &ConnectOptions, config: &SessionConfig) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(effective_client_id(opts), &opts.host, opts.port);
    mqtt_options.set_keep_alive(config.keepalive);

    // Credentials are passed through untouched; a username without a password
    // gets an empty one, matching broker expectations.
    if let Some(username) = &opts.username {
        let password = opts.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    // Default broker packet limits are too small for agent-sized payloads.
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    mqtt_options
}

/// Live connection backed by a rumqttc [`AsyncClient`]
pub struct RumqttcLink {
    client: AsyncClient,
}

#[async_trait]
impl BrokerLink for RumqttcLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError> {
        self.client
            .publish(topic.to_string(), to_rumqttc_qos(qos), retain, payload)
            .await
            .map_err(|e| LinkError::new(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), LinkError> {
        self.client
            .subscribe(topic.to_string(), to_rumqttc_qos(qos))
            .await
            .map_err(|e| LinkError::new(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.client
            .unsubscribe(topic.to_string())
            .await
            .map_err(|e| LinkError::new(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| LinkError::new(e.to_string()))
    }
}

/// Opens real broker connections and spawns their event loop tasks
#[derive(Debug, Default)]
pub struct RumqttcConnector;

impl RumqttcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for RumqttcConnector {
    async fn open(
        &self,
        opts: &ConnectOptions,
        config: &SessionConfig,
    ) -> Result<BrokerHandle, LinkError> {
        let mqtt_options = configure_mqtt_options(opts, config);
        let (client, event_loop) = AsyncClient::new(mqtt_options, config.channel_capacity);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broker_address = opts.broker_address();
        let handle = tokio::spawn(run_event_loop(
            event_loop,
            state_tx,
            shutdown_rx,
            broker_address,
        ));

        Ok(BrokerHandle {
            link: Box::new(RumqttcLink { client }),
            state_rx,
            shutdown_tx,
            event_loop: Some(handle),
        })
    }
}

/// Drive the rumqttc event loop, translating broker events into state updates
/// and message logging
///
/// Poll errors mark the state disconnected but do not stop the loop; the next
/// poll re-dials. Only the shutdown signal ends the task.
async fn run_event_loop(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    broker_address: String,
) {
    debug!(broker = %broker_address, "event loop started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A closed channel means the session dropped the connection.
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(broker = %broker_address, "shutdown signal received, stopping event loop");
                    break;
                }
            }

            polled = event_loop.poll() => match polled {
                Ok(event) => match route_event(&event) {
                    EventRoute::ConnectionAccepted => {
                        info!(broker = %broker_address, "connected to MQTT broker");
                        let _ = state_tx.send(ConnectionState::Connected);
                    }
                    EventRoute::ConnectionRefused(reason) => {
                        warn!(broker = %broker_address, %reason, "broker refused connection");
                        let _ = state_tx.send(ConnectionState::Disconnected(reason));
                    }
                    EventRoute::Disconnected => {
                        warn!(broker = %broker_address, "disconnected by broker");
                        let _ = state_tx.send(ConnectionState::Disconnected(
                            "disconnected by broker".to_string(),
                        ));
                    }
                    EventRoute::MessageReceived { topic, payload, retain } => {
                        // Delivered messages are logged, never queued or stored.
                        info!(
                            target: "mqtt_message",
                            %topic,
                            retain,
                            payload = %decode_payload(&payload),
                            "received message"
                        );
                    }
                    EventRoute::SubscriptionConfirmed { packet_id } => {
                        debug!(packet_id, "subscription confirmed");
                    }
                    EventRoute::Infrastructure(event) => {
                        debug!(target: "mqtt_session", event = %event, "MQTT event");
                    }
                    EventRoute::Outgoing => {}
                },
                Err(e) => {
                    warn!(broker = %broker_address, error = %e, "event loop error");
                    let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                    if !interruptible_sleep(shutdown_rx.clone(), POLL_RETRY_DELAY_MS).await {
                        break;
                    }
                }
            }
        }
    }

    debug!(broker = %broker_address, "event loop stopped");
}

/// Sleep that returns false when interrupted by the shutdown signal
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_client_id_honors_explicit_id() {
        let opts = ConnectOptions::new("localhost").with_client_id("my-client");
        assert_eq!(effective_client_id(&opts), "my-client");
    }

    #[test]
    fn effective_client_id_generates_when_absent() {
        let opts = ConnectOptions::new("localhost");
        let id = effective_client_id(&opts);
        assert!(id.starts_with("mqtt-bridge-"));
        assert!(id.len() > "mqtt-bridge-".len());
    }

    #[test]
    fn qos_mapping_is_faithful() {
        assert_eq!(to_rumqttc_qos(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_rumqttc_qos(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_rumqttc_qos(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(interruptible_sleep(rx, 10).await);
    }

    #[tokio::test]
    async fn interruptible_sleep_interrupted_by_shutdown() {
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });

        assert!(!interruptible_sleep(rx, 5000).await);
    }
}
