//! Mail transport abstraction
//!
//! Defines the trait for pluggable delivery backends. A transport attempts to
//! hand exactly one message to the relay and reports success or a diagnostic.

mod smtp;

pub use smtp::SmtpMailTransport;

use crate::queue::QueuedMessage;
use crate::settings::TransportSettings;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Why a single delivery attempt failed
///
/// The `Display` text is what operators see as the message's error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The relay refused the message or the conversation broke down
    #[error("{0}")]
    Delivery(String),

    /// The message could not be turned into valid MIME
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The attempt exceeded the worker's per-attempt budget
    #[error("delivery attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The transport panicked mid-attempt
    #[error("transport panicked: {0}")]
    Panicked(String),
}

/// What the transport is asked to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    /// Message-ID header value, angle brackets included
    pub message_id: String,
}

impl OutgoingEmail {
    /// Build the outgoing form of a queued message
    pub fn from_queued(message: &QueuedMessage, message_id: impl Into<String>) -> Self {
        Self {
            to: message.recipient_email.clone(),
            to_name: message.recipient_name.clone(),
            subject: message.subject.clone(),
            html: message.body_html.clone(),
            text: message.body_text.clone(),
            message_id: message_id.into(),
        }
    }
}

/// Generate a fresh Message-ID in the sender's domain
pub fn generate_message_id(settings: &TransportSettings) -> String {
    format!("<{}@{}>", uuid::Uuid::new_v4(), settings.sender_domain())
}

/// Trait for delivery backends
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Attempt delivery of one message
    async fn send(
        &self,
        settings: &TransportSettings,
        email: &OutgoingEmail,
    ) -> Result<(), TransportError>;
}
