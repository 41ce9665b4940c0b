//! The six MQTT tools
//!
//! Thin handlers over [`SessionManager`]: extract arguments, invoke the
//! session operation, and fold both outcomes into the returned value. A
//! session failure is a successful tool call whose result is the failure text,
//! so no operation ever raises past this boundary.

use crate::session::{ConnectOptions, SessionManager};
use crate::tools::{Tool, ToolDescription, ToolError, ToolSystem};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Register all six MQTT tools against a shared session
pub fn register_mqtt_tools(system: &mut ToolSystem, session: Arc<SessionManager>) {
    system.register(Box::new(ConnectTool::new(session.clone())));
    system.register(Box::new(PublishTool::new(session.clone())));
    system.register(Box::new(SubscribeTool::new(session.clone())));
    system.register(Box::new(UnsubscribeTool::new(session.clone())));
    system.register(Box::new(DisconnectTool::new(session.clone())));
    system.register(Box::new(StatusTool::new(session)));
}

fn required_str<'a>(parameters: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required string field '{key}'")))
}

fn optional_str(parameters: &Value, key: &str) -> Option<String> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// QoS argument as given by the caller; out-of-range values are passed to the
/// session so it can report its own "QoS must be 0, 1, or 2" text
fn qos_arg(parameters: &Value) -> u8 {
    let raw = parameters.get("qos").and_then(Value::as_u64).unwrap_or(0);
    u8::try_from(raw).unwrap_or(u8::MAX)
}

/// Connect to an MQTT broker
pub struct ConnectTool {
    session: Arc<SessionManager>,
}

impl ConnectTool {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for ConnectTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "mqtt_connect".to_string(),
            description: "Connect to an MQTT broker".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "broker_host": {
                        "type": "string",
                        "description": "MQTT broker hostname or IP (e.g., 'test.mosquitto.org')"
                    },
                    "client_id": {
                        "type": "string",
                        "description": "Optional client ID for the connection"
                    },
                    "username": {
                        "type": "string",
                        "description": "Optional username for authentication"
                    },
                    "password": {
                        "type": "string",
                        "description": "Optional password for authentication"
                    },
                    "port": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 65535,
                        "description": "MQTT broker port (default: 1883)"
                    }
                },
                "required": ["broker_host"]
            }),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let host = required_str(parameters, "broker_host")?;

        let mut opts = ConnectOptions::new(host);
        if let Some(port) = parameters.get("port").and_then(Value::as_u64) {
            opts = opts.with_port(port as u16);
        }
        if let Some(client_id) = optional_str(parameters, "client_id") {
            opts = opts.with_client_id(client_id);
        }
        if let Some(username) = optional_str(parameters, "username") {
            opts = opts.with_credentials(username, optional_str(parameters, "password"));
        }

        let text = self
            .session
            .connect(opts)
            .await
            .unwrap_or_else(|e| e.to_string());
        Ok(Value::String(text))
    }
}

/// Publish a message to an MQTT topic
pub struct PublishTool {
    session: Arc<SessionManager>,
}

impl PublishTool {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for PublishTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "mqtt_publish".to_string(),
            description: "Publish a message to an MQTT topic".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "The MQTT topic to publish to"
                    },
                    "message": {
                        "type": "string",
                        "description": "The message payload to publish"
                    },
                    "qos": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Quality of Service level (0, 1, or 2). Default is 0"
                    },
                    "retain": {
                        "type": "boolean",
                        "description": "Whether to retain the message on the broker. Default is false"
                    }
                },
                "required": ["topic", "message"]
            }),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let topic = required_str(parameters, "topic")?;
        let message = required_str(parameters, "message")?;
        let retain = parameters
            .get("retain")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let text = self
            .session
            .publish(topic, message, qos_arg(parameters), retain)
            .await
            .unwrap_or_else(|e| e.to_string());
        Ok(Value::String(text))
    }
}

/// Subscribe to an MQTT topic
pub struct SubscribeTool {
    session: Arc<SessionManager>,
}

impl SubscribeTool {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for SubscribeTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "mqtt_subscribe".to_string(),
            description: "Subscribe to an MQTT topic to receive messages".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "The MQTT topic to subscribe to (supports wildcards: + for single level, # for multi-level)"
                    },
                    "qos": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Quality of Service level (0, 1, or 2). Default is 0"
                    }
                },
                "required": ["topic"]
            }),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let topic = required_str(parameters, "topic")?;

        let text = self
            .session
            .subscribe(topic, qos_arg(parameters))
            .await
            .unwrap_or_else(|e| e.to_string());
        Ok(Value::String(text))
    }
}

/// Unsubscribe from an MQTT topic
pub struct UnsubscribeTool {
    session: Arc<SessionManager>,
}

impl UnsubscribeTool {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for UnsubscribeTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "mqtt_unsubscribe".to_string(),
            description: "Unsubscribe from an MQTT topic".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "The MQTT topic to unsubscribe from"
                    }
                },
                "required": ["topic"]
            }),
        }
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let topic = required_str(parameters, "topic")?;

        let text = self
            .session
            .unsubscribe(topic)
            .await
            .unwrap_or_else(|e| e.to_string());
        Ok(Value::String(text))
    }
}

/// Disconnect from the MQTT broker
pub struct DisconnectTool {
    session: Arc<SessionManager>,
}

impl DisconnectTool {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for DisconnectTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "mqtt_disconnect".to_string(),
            description: "Disconnect from the MQTT broker".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn execute(&self, _parameters: &Value) -> Result<Value, ToolError> {
        let text = self
            .session
            .disconnect()
            .await
            .unwrap_or_else(|e| e.to_string());
        Ok(Value::String(text))
    }
}

/// Report the current connection status
pub struct StatusTool {
    session: Arc<SessionManager>,
}

impl StatusTool {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for StatusTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "mqtt_status".to_string(),
            description: "Get the current MQTT connection status".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn execute(&self, _parameters: &Value) -> Result<Value, ToolError> {
        let snapshot = self.session.status().await;
        serde_json::to_value(snapshot).map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::testing::mocks::{MockConnectBehavior, MockConnector};

    fn mock_session(behavior: MockConnectBehavior) -> Arc<SessionManager> {
        let connector = MockConnector::new(behavior);
        Arc::new(SessionManager::new(
            Box::new(connector),
            SessionConfig::default(),
        ))
    }

    fn tool_system(session: Arc<SessionManager>) -> ToolSystem {
        let mut system = ToolSystem::new();
        register_mqtt_tools(&mut system, session);
        system
    }

    #[tokio::test]
    async fn all_six_tools_are_registered() {
        let system = tool_system(mock_session(MockConnectBehavior::AcceptImmediately));
        assert_eq!(
            system.list_tools(),
            vec![
                "mqtt_connect",
                "mqtt_disconnect",
                "mqtt_publish",
                "mqtt_status",
                "mqtt_subscribe",
                "mqtt_unsubscribe",
            ]
        );
    }

    #[tokio::test]
    async fn connect_requires_broker_host() {
        let system = tool_system(mock_session(MockConnectBehavior::AcceptImmediately));
        let result = system.execute_tool("mqtt_connect", &json!({})).await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }

    #[tokio::test]
    async fn connect_returns_success_text() {
        let system = tool_system(mock_session(MockConnectBehavior::AcceptImmediately));
        let result = system
            .execute_tool("mqtt_connect", &json!({"broker_host": "localhost"}))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!("Successfully connected to MQTT broker at localhost:1883")
        );
    }

    #[tokio::test]
    async fn publish_before_connect_returns_not_connected_text() {
        let system = tool_system(mock_session(MockConnectBehavior::AcceptImmediately));
        let result = system
            .execute_tool(
                "mqtt_publish",
                &json!({"topic": "sensors/temp", "message": "21.5"}),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            json!("Not connected to MQTT broker. Use mqtt_connect first.")
        );
    }

    #[tokio::test]
    async fn publish_with_invalid_qos_returns_qos_text() {
        let session = mock_session(MockConnectBehavior::AcceptImmediately);
        session
            .connect(ConnectOptions::new("localhost"))
            .await
            .unwrap();

        let system = tool_system(session);
        let result = system
            .execute_tool(
                "mqtt_publish",
                &json!({"topic": "sensors/temp", "message": "21.5", "qos": 5}),
            )
            .await
            .unwrap();
        assert_eq!(result, json!("QoS must be 0, 1, or 2"));
    }

    #[tokio::test]
    async fn status_returns_structured_snapshot() {
        let system = tool_system(mock_session(MockConnectBehavior::AcceptImmediately));
        let result = system.execute_tool("mqtt_status", &json!({})).await.unwrap();
        assert_eq!(
            result,
            json!({"connected": false, "broker": null, "subscriptions": []})
        );
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_noop_text() {
        let system = tool_system(mock_session(MockConnectBehavior::AcceptImmediately));
        let result = system
            .execute_tool("mqtt_disconnect", &json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!("No active MQTT connection."));
    }
}
