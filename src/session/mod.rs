//! Session and connection lifecycle management
//!
//! A [`SessionManager`] owns at most one broker connection at a time. Lifecycle
//! operations request state changes; confirmation arrives asynchronously from
//! the event loop task through a watch channel, so the connected flag is only
//! ever set by broker events (ConnAck, Disconnect), never by the operations
//! themselves.

use crate::error::sanitize_error_message;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod events;
pub mod link;

use link::{BrokerConnector, BrokerLink, LinkError};

/// Connection state as observed from broker events
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Connect request issued, no ConnAck yet
    Connecting,
    /// ConnAck accepted - ready for publish/subscribe
    Connected,
    /// Disconnected with reason (refused ConnAck, broker disconnect, or network error)
    Disconnected(String),
}

/// MQTT Quality of Service level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    /// QoS 0 - at most once
    AtMostOnce,
    /// QoS 1 - at least once
    AtLeastOnce,
    /// QoS 2 - exactly once
    ExactlyOnce,
}

impl QosLevel {
    /// Map a caller-supplied integer onto a QoS level
    pub fn from_u8(value: u8) -> Result<Self, SessionError> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(SessionError::InvalidQos(other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> u8 {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// Session errors - `Display` is the caller-facing status text
///
/// Every failure funnels into a returned string at the tool boundary, so the
/// error messages here are written for the remote caller, not for operators.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Already connected to MQTT broker. Disconnect first if you want to connect to a different broker.")]
    AlreadyConnected,
    #[error("Not connected to MQTT broker. Use mqtt_connect first.")]
    NotConnected,
    /// Unsubscribe's precondition text omits the connect hint
    #[error("Not connected to MQTT broker.")]
    NoBrokerConnection,
    #[error("QoS must be 0, 1, or 2")]
    InvalidQos(u8),
    #[error("Failed to connect to MQTT broker: {0}")]
    ConnectFailed(String),
    #[error("Failed to publish message: {0}")]
    PublishFailed(String),
    #[error("Failed to subscribe to topic: {0}")]
    SubscribeFailed(String),
    #[error("Failed to unsubscribe from topic: {0}")]
    UnsubscribeFailed(String),
    #[error("Error during disconnect: {0}")]
    DisconnectFailed(String),
}

/// Parameters for a connect attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// Broker hostname or IP
    pub host: String,
    /// Broker port (1883 unless overridden)
    pub port: u16,
    /// Client identifier; generated when absent
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// `host:port` form reported in status texts and snapshots
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tunables for the session layer, bridged from [`crate::config::BridgeConfig`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// MQTT keepalive interval
    pub keepalive: Duration,
    /// Bounded wait for the ConnAck after a connect request
    pub connect_grace: Duration,
    /// Bounded wait for the event loop task to stop during disconnect
    pub disconnect_grace: Duration,
    /// Request channel capacity handed to the MQTT client
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(60),
            connect_grace: Duration::from_secs(1),
            disconnect_grace: Duration::from_secs(2),
            channel_capacity: 10,
        }
    }
}

/// Point-in-time view of the session, returned by the status operation
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    /// `host:port` of the broker, present only while connected
    pub broker: Option<String>,
    /// Active topic filters, sorted and deduplicated
    pub subscriptions: Vec<String>,
}

/// Outcome of waiting for the connect acknowledgment
#[derive(Debug, Clone, PartialEq)]
enum ConnectOutcome {
    Confirmed,
    Refused(String),
    Pending,
}

/// One live (or pending) broker connection
struct ActiveConnection {
    link: Box<dyn BrokerLink>,
    broker_address: String,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop: Option<JoinHandle<()>>,
    subscriptions: BTreeSet<String>,
}

impl ActiveConnection {
    fn is_confirmed(&self) -> bool {
        matches!(*self.state_rx.borrow(), ConnectionState::Connected)
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        // Teardown already stops the task; this covers the paths that drop the
        // connection without going through it.
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

/// Owner of the single broker connection
///
/// Constructed once at startup and shared behind an `Arc`. The inner mutex is
/// the only path to session state, so overlapping tool invocations and
/// event-callback updates cannot interleave mid-operation.
pub struct SessionManager {
    connector: Box<dyn BrokerConnector>,
    config: SessionConfig,
    active: Mutex<Option<ActiveConnection>>,
}

impl SessionManager {
    pub fn new(connector: Box<dyn BrokerConnector>, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            active: Mutex::new(None),
        }
    }

    /// Connect to a broker and wait a bounded grace period for the ConnAck
    ///
    /// An unconfirmed attempt is kept alive - the event loop keeps polling and
    /// the connection may still be confirmed after this returns. A stale
    /// unconfirmed connection from an earlier attempt is torn down first.
    pub async fn connect(&self, opts: ConnectOptions) -> Result<String, SessionError> {
        let mut active = self.active.lock().await;

        if let Some(conn) = active.as_ref() {
            if conn.is_confirmed() {
                return Err(SessionError::AlreadyConnected);
            }
            debug!(broker = %conn.broker_address, "replacing unconfirmed connection");
            if let Some(stale) = active.take() {
                let _ = teardown(stale, &self.config).await;
            }
        }

        let address = opts.broker_address();
        info!(broker = %address, "connecting to MQTT broker");

        let handle = self
            .connector
            .open(&opts, &self.config)
            .await
            .map_err(|e| SessionError::ConnectFailed(sanitize_error_message(&e.to_string())))?;

        let conn = ActiveConnection {
            link: handle.link,
            broker_address: address.clone(),
            state_rx: handle.state_rx.clone(),
            shutdown_tx: handle.shutdown_tx,
            event_loop: handle.event_loop,
            subscriptions: BTreeSet::new(),
        };

        let outcome = wait_for_connack(handle.state_rx, self.config.connect_grace).await;
        *active = Some(conn);

        match outcome {
            ConnectOutcome::Confirmed => {
                info!(broker = %address, "connection confirmed");
                Ok(format!("Successfully connected to MQTT broker at {address}"))
            }
            ConnectOutcome::Refused(reason) => {
                warn!(broker = %address, %reason, "broker refused connection");
                Ok(unconfirmed_text(&address))
            }
            ConnectOutcome::Pending => {
                warn!(broker = %address, "no ConnAck within grace period");
                Ok(unconfirmed_text(&address))
            }
        }
    }

    /// Publish a message; blocks until the link accepts it
    pub async fn publish(
        &self,
        topic: &str,
        message: &str,
        qos: u8,
        retain: bool,
    ) -> Result<String, SessionError> {
        let active = self.active.lock().await;
        let conn = active
            .as_ref()
            .filter(|c| c.is_confirmed())
            .ok_or(SessionError::NotConnected)?;
        let qos = QosLevel::from_u8(qos)?;

        conn.link
            .publish(topic, message.as_bytes().to_vec(), qos, retain)
            .await
            .map_err(|e| SessionError::PublishFailed(e.to_string()))?;

        debug!(%topic, qos = u8::from(qos), retain, "published message");
        Ok(format!("Successfully published message to topic '{topic}'"))
    }

    /// Subscribe to a topic filter; idempotent on the subscription set
    pub async fn subscribe(&self, topic: &str, qos: u8) -> Result<String, SessionError> {
        let mut active = self.active.lock().await;
        let conn = active
            .as_mut()
            .filter(|c| c.is_confirmed())
            .ok_or(SessionError::NotConnected)?;
        let qos = QosLevel::from_u8(qos)?;

        conn.link
            .subscribe(topic, qos)
            .await
            .map_err(|e| SessionError::SubscribeFailed(e.to_string()))?;

        conn.subscriptions.insert(topic.to_string());
        info!(%topic, qos = u8::from(qos), "subscribed");
        Ok(format!(
            "Successfully subscribed to topic '{topic}'. Messages will be logged to stderr."
        ))
    }

    /// Unsubscribe from a topic filter; removing a non-member is a silent no-op
    pub async fn unsubscribe(&self, topic: &str) -> Result<String, SessionError> {
        let mut active = self.active.lock().await;
        let conn = active
            .as_mut()
            .filter(|c| c.is_confirmed())
            .ok_or(SessionError::NoBrokerConnection)?;

        conn.link
            .unsubscribe(topic)
            .await
            .map_err(|e| SessionError::UnsubscribeFailed(e.to_string()))?;

        conn.subscriptions.remove(topic);
        info!(%topic, "unsubscribed");
        Ok(format!("Successfully unsubscribed from topic '{topic}'"))
    }

    /// Disconnect and release the connection handle
    ///
    /// The handle is always released and the subscription set always cleared,
    /// even when the broker disconnect request itself fails - the error is
    /// still reported, but a second disconnect is the no-op.
    pub async fn disconnect(&self) -> Result<String, SessionError> {
        let mut active = self.active.lock().await;
        let Some(conn) = active.take() else {
            return Ok("No active MQTT connection.".to_string());
        };

        let broker = conn.broker_address.clone();
        match teardown(conn, &self.config).await {
            Ok(()) => {
                info!(%broker, "disconnected from MQTT broker");
                Ok("Successfully disconnected from MQTT broker.".to_string())
            }
            Err(e) => {
                warn!(%broker, error = %e, "disconnect request failed; handle released anyway");
                Err(SessionError::DisconnectFailed(e.to_string()))
            }
        }
    }

    /// Pure read of the current session state; never fails
    pub async fn status(&self) -> StatusSnapshot {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(conn) => {
                let connected = conn.is_confirmed();
                StatusSnapshot {
                    connected,
                    broker: connected.then(|| conn.broker_address.clone()),
                    subscriptions: conn.subscriptions.iter().cloned().collect(),
                }
            }
            None => StatusSnapshot::default(),
        }
    }
}

fn unconfirmed_text(address: &str) -> String {
    format!("Connection initiated to {address}, but not yet confirmed. Please check broker availability.")
}

/// Stop the event loop, issue the broker disconnect, and drop the connection
///
/// Dropping `conn` releases the link and clears the subscription set no matter
/// how the disconnect request went.
async fn teardown(mut conn: ActiveConnection, config: &SessionConfig) -> Result<(), LinkError> {
    let _ = conn.shutdown_tx.send(true);
    let result = conn.link.disconnect().await;

    if let Some(handle) = conn.event_loop.take() {
        let abort = handle.abort_handle();
        match tokio::time::timeout(config.disconnect_grace, handle).await {
            Ok(Ok(())) => debug!("event loop task stopped cleanly"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("event loop task ended with error: {e}"),
            Err(_) => {
                warn!("event loop task did not stop in time, aborting");
                abort.abort();
            }
            _ => {}
        }
    }

    result
}

/// Wait for the ConnAck (or a refusal) on the state channel, bounded by `grace`
async fn wait_for_connack(
    mut state_rx: watch::Receiver<ConnectionState>,
    grace: Duration,
) -> ConnectOutcome {
    let current = outcome_for(&state_rx.borrow());
    if let Some(outcome) = current {
        return outcome;
    }

    let waited = tokio::time::timeout(grace, async {
        loop {
            if state_rx.changed().await.is_err() {
                return ConnectOutcome::Pending;
            }
            if let Some(outcome) = outcome_for(&state_rx.borrow()) {
                return outcome;
            }
        }
    })
    .await;

    waited.unwrap_or(ConnectOutcome::Pending)
}

fn outcome_for(state: &ConnectionState) -> Option<ConnectOutcome> {
    match state {
        ConnectionState::Connected => Some(ConnectOutcome::Confirmed),
        ConnectionState::Disconnected(reason) => Some(ConnectOutcome::Refused(reason.clone())),
        ConnectionState::Connecting => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_level_round_trip() {
        assert_eq!(QosLevel::from_u8(0).unwrap(), QosLevel::AtMostOnce);
        assert_eq!(QosLevel::from_u8(1).unwrap(), QosLevel::AtLeastOnce);
        assert_eq!(QosLevel::from_u8(2).unwrap(), QosLevel::ExactlyOnce);
        assert_eq!(u8::from(QosLevel::ExactlyOnce), 2);
    }

    #[test]
    fn qos_level_rejects_out_of_range() {
        let err = QosLevel::from_u8(5).unwrap_err();
        assert_eq!(err.to_string(), "QoS must be 0, 1, or 2");
        assert!(QosLevel::from_u8(3).is_err());
        assert!(QosLevel::from_u8(255).is_err());
    }

    #[test]
    fn connect_options_builder() {
        let opts = ConnectOptions::new("test.mosquitto.org")
            .with_port(8883)
            .with_client_id("bridge-1")
            .with_credentials("alice", Some("hunter2".to_string()));

        assert_eq!(opts.broker_address(), "test.mosquitto.org:8883");
        assert_eq!(opts.client_id.as_deref(), Some("bridge-1"));
        assert_eq!(opts.username.as_deref(), Some("alice"));
    }

    #[test]
    fn connect_options_default_port() {
        let opts = ConnectOptions::new("localhost");
        assert_eq!(opts.broker_address(), "localhost:1883");
        assert!(opts.client_id.is_none());
    }

    #[test]
    fn status_snapshot_serializes_null_broker() {
        let snapshot = StatusSnapshot::default();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"connected": false, "broker": null, "subscriptions": []})
        );
    }

    #[test]
    fn session_error_texts_match_tool_surface() {
        assert_eq!(
            SessionError::NotConnected.to_string(),
            "Not connected to MQTT broker. Use mqtt_connect first."
        );
        assert_eq!(
            SessionError::NoBrokerConnection.to_string(),
            "Not connected to MQTT broker."
        );
        assert!(SessionError::AlreadyConnected
            .to_string()
            .starts_with("Already connected to MQTT broker."));
        assert_eq!(
            SessionError::PublishFailed("boom".to_string()).to_string(),
            "Failed to publish message: boom"
        );
    }

    #[tokio::test]
    async fn wait_for_connack_sees_existing_confirmation() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let outcome = wait_for_connack(state_rx, Duration::from_millis(100)).await;
        assert_eq!(outcome, ConnectOutcome::Confirmed);
        drop(state_tx);
    }

    #[tokio::test]
    async fn wait_for_connack_resolves_on_late_confirmation() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let outcome = wait_for_connack(state_rx, Duration::from_millis(200)).await;
        assert_eq!(outcome, ConnectOutcome::Confirmed);
    }

    #[tokio::test]
    async fn wait_for_connack_times_out_as_pending() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        // Keep the sender alive past the grace period so the channel stays open.
        let _holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(state_tx);
        });

        let outcome = wait_for_connack(state_rx, Duration::from_millis(20)).await;
        assert_eq!(outcome, ConnectOutcome::Pending);
    }

    #[tokio::test]
    async fn wait_for_connack_reports_refusal() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("not authorized".to_string()));
        });

        let outcome = wait_for_connack(state_rx, Duration::from_millis(200)).await;
        assert_eq!(outcome, ConnectOutcome::Refused("not authorized".to_string()));
    }
}
