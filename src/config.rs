//! Configuration for the bridge
//!
//! Everything has a default: the bridge runs without any configuration file,
//! and a TOML file only overrides the session tunables.

use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub session: SessionSection,
}

/// Session tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// MQTT keepalive interval in seconds (default: 60)
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Grace period for the connect acknowledgment in milliseconds (default: 1000)
    #[serde(default = "default_connect_grace_ms")]
    pub connect_grace_ms: u64,
    /// Grace period for event loop shutdown in milliseconds (default: 2000)
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    /// Request channel capacity handed to the MQTT client (default: 10)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_connect_grace_ms() -> u64 {
    1000
}

fn default_disconnect_grace_ms() -> u64 {
    2000
}

fn default_channel_capacity() -> usize {
    10
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            connect_grace_ms: default_connect_grace_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.keepalive_secs == 0 {
            return Err(ConfigError::Validation(
                "session.keepalive_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "session.channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Bridge into the session layer's config type
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keepalive: Duration::from_secs(self.session.keepalive_secs),
            connect_grace: Duration::from_millis(self.session.connect_grace_ms),
            disconnect_grace: Duration::from_millis(self.session.disconnect_grace_ms),
            channel_capacity: self.session.channel_capacity,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_expectations() {
        let config = BridgeConfig::default();
        assert_eq!(config.session.keepalive_secs, 60);
        assert_eq!(config.session.connect_grace_ms, 1000);
        assert_eq!(config.session.disconnect_grace_ms, 2000);
        assert_eq!(config.session.channel_capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn session_config_converts_units() {
        let config = BridgeConfig::default();
        let session = config.session_config();
        assert_eq!(session.keepalive, Duration::from_secs(60));
        assert_eq!(session.connect_grace, Duration::from_millis(1000));
        assert_eq!(session.disconnect_grace, Duration::from_millis(2000));
    }

    #[test]
    fn load_from_file_with_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nconnect_grace_ms = 250").unwrap();

        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.session.connect_grace_ms, 250);
        // Unspecified fields keep their defaults.
        assert_eq!(config.session.keepalive_secs, 60);
    }

    #[test]
    fn load_from_file_empty_file_uses_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn load_from_file_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session = not-a-table").unwrap();

        let result = BridgeConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validate_rejects_zero_keepalive() {
        let mut config = BridgeConfig::default();
        config.session.keepalive_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = BridgeConfig::default();
        config.session.channel_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let result = BridgeConfig::load_from_file("/nonexistent/bridge.toml");
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }
}
