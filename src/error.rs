//! Error types for Postbox
//!
//! One crate-wide error enum for systemic failures (store, config, admin
//! misuse). Per-attempt delivery failures live in
//! [`crate::transport::TransportError`] and never surface here.

use crate::queue::MessageStatus;
use thiserror::Error;

/// Result type alias for Postbox operations
pub type Result<T> = std::result::Result<T, PostboxError>;

/// Comprehensive error type for Postbox operations
#[derive(Error, Debug)]
pub enum PostboxError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage errors that are not raw SQLite failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Message rejected at enqueue time
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Queued message not found
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Transport settings row not found
    #[error("Transport settings not found: {0}")]
    SettingsNotFound(String),

    /// Admin action not allowed from the message's current status
    #[error("Cannot {action} message {id} while it is {status}")]
    InvalidTransition {
        id: String,
        status: MessageStatus,
        action: &'static str,
    },

    /// Other errors
    #[error("{0}")]
    Other(String),
}
