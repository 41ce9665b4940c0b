//! Top-level error types for the MQTT bridge
//!
//! Session failures never surface to remote callers as errors - they funnel
//! into status strings at the tool boundary. The types here cover everything
//! else: startup, configuration, and the serving loop.

use thiserror::Error;

/// Main error type for bridge startup and serving
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Strip credential-like patterns from error text before it reaches a caller
///
/// Connect failures can echo broker handshake details; passwords passed
/// through the connect tool must not survive into the returned status string.
pub(crate) fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .expect("credential pattern is valid")
        .replace_all(message, "${1}=***")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        // Back off to a char boundary so multibyte text cannot split a char.
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}
