//! Mock broker implementations for testing
//!
//! [`MockConnector`] stands in for the rumqttc-backed connector: it records
//! every link operation, lets tests choose how the fake broker answers the
//! connect request, and exposes the state channel so tests can drive
//! connection events deterministically.

use crate::session::link::{BrokerConnector, BrokerHandle, BrokerLink, LinkError};
use crate::session::{ConnectOptions, ConnectionState, QosLevel, SessionConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// How the fake broker answers a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockConnectBehavior {
    /// ConnAck success before the grace period starts
    AcceptImmediately,
    /// No ConnAck at all; the grace period elapses
    NeverConfirm,
    /// ConnAck refusal
    Refuse,
}

/// Which link operations should fail
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkFailures {
    pub publish: bool,
    pub subscribe: bool,
    pub unsubscribe: bool,
    pub disconnect: bool,
}

/// Everything the fake link has been asked to do
#[derive(Debug, Default)]
pub struct LinkRecords {
    pub opens: Mutex<u32>,
    pub published: Mutex<Vec<(String, Vec<u8>, QosLevel, bool)>>,
    pub subscribed: Mutex<Vec<(String, QosLevel)>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub disconnects: Mutex<u32>,
}

struct MockLink {
    records: Arc<LinkRecords>,
    failures: LinkFailures,
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError> {
        if self.failures.publish {
            return Err(LinkError::new("mock publish failure"));
        }
        self.records
            .published
            .lock()
            .await
            .push((topic.to_string(), payload, qos, retain));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), LinkError> {
        if self.failures.subscribe {
            return Err(LinkError::new("mock subscribe failure"));
        }
        self.records
            .subscribed
            .lock()
            .await
            .push((topic.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        if self.failures.unsubscribe {
            return Err(LinkError::new("mock unsubscribe failure"));
        }
        self.records
            .unsubscribed
            .lock()
            .await
            .push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        *self.records.disconnects.lock().await += 1;
        if self.failures.disconnect {
            return Err(LinkError::new("mock disconnect failure"));
        }
        Ok(())
    }
}

/// Fake broker connector
pub struct MockConnector {
    pub behavior: MockConnectBehavior,
    pub failures: LinkFailures,
    /// Shared record of link activity; clone before boxing the connector
    pub records: Arc<LinkRecords>,
    /// State sender of the most recently opened connection, for tests that
    /// drive ConnAck/Disconnect events themselves
    pub state_handle: Arc<Mutex<Option<watch::Sender<ConnectionState>>>>,
}

impl MockConnector {
    pub fn new(behavior: MockConnectBehavior) -> Self {
        Self {
            behavior,
            failures: LinkFailures::default(),
            records: Arc::new(LinkRecords::default()),
            state_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_failures(behavior: MockConnectBehavior, failures: LinkFailures) -> Self {
        Self {
            failures,
            ..Self::new(behavior)
        }
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn open(
        &self,
        _opts: &ConnectOptions,
        _config: &SessionConfig,
    ) -> Result<BrokerHandle, LinkError> {
        *self.records.opens.lock().await += 1;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        match self.behavior {
            MockConnectBehavior::AcceptImmediately => {
                let _ = state_tx.send(ConnectionState::Connected);
            }
            MockConnectBehavior::Refuse => {
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "connection refused: not authorized".to_string(),
                ));
            }
            MockConnectBehavior::NeverConfirm => {}
        }

        *self.state_handle.lock().await = Some(state_tx);

        // Stands in for the event loop task: alive until the shutdown signal.
        let task = tokio::spawn(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        });

        Ok(BrokerHandle {
            link: Box::new(MockLink {
                records: self.records.clone(),
                failures: self.failures,
            }),
            state_rx,
            shutdown_tx,
            event_loop: Some(task),
        })
    }
}
