//! MQTT Bridge
//!
//! Exposes a small set of MQTT client operations (connect, publish, subscribe,
//! unsubscribe, disconnect, status) as remotely invokable tools for an agent
//! framework. Protocol work is delegated to rumqttc; this crate contributes
//! the single-connection session lifecycle, the tool surface with JSON Schema
//! validation, and the event routing that turns broker callbacks into state
//! transitions and log lines.
//!
//! # Quick start
//!
//! ```
//! use mqtt_bridge::session::ConnectOptions;
//!
//! let opts = ConnectOptions::new("test.mosquitto.org")
//!     .with_port(1883)
//!     .with_client_id("my-bridge");
//!
//! assert_eq!(opts.broker_address(), "test.mosquitto.org:1883");
//! ```
//!
//! Wiring the tool surface to a live session:
//!
//! ```no_run
//! use mqtt_bridge::session::link::RumqttcConnector;
//! use mqtt_bridge::session::{SessionConfig, SessionManager};
//! use mqtt_bridge::tools::mqtt::register_mqtt_tools;
//! use mqtt_bridge::tools::ToolSystem;
//! use std::sync::Arc;
//!
//! let session = Arc::new(SessionManager::new(
//!     Box::new(RumqttcConnector::new()),
//!     SessionConfig::default(),
//! ));
//! let mut tools = ToolSystem::new();
//! register_mqtt_tools(&mut tools, session);
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod server;
pub mod session;
pub mod testing;
pub mod tools;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use session::{
    ConnectOptions, ConnectionState, QosLevel, SessionError, SessionManager, StatusSnapshot,
};
pub use tools::{Tool, ToolDescription, ToolError, ToolSystem};
