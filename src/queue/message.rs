//! Queued message types
//!
//! The unit of work for the delivery worker, its status enumeration and the
//! request shape used by enqueuing collaborators.

use crate::{PostboxError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Default cap on delivery attempts for a new message
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique queued-message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(String);

impl QueueId {
    /// Create a new random identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status value found in storage that this build does not know
#[derive(Debug, Error)]
#[error("unknown value '{0}'")]
pub struct UnknownValue(pub String);

/// Delivery state of a queued message
///
/// ```text
/// pending --claim--> processing --ok--> sent
///                    processing --err, attempts < max--> pending
///                    processing --err, attempts == max--> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting for a worker invocation
    Pending,
    /// Claimed by a worker; the transport call is in flight
    Processing,
    /// Accepted by the relay
    Sent,
    /// Retries exhausted
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }

    /// `sent` and `failed` never change without an operator
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// What kind of message this is; used for reporting only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Notification,
    Reply,
    Confirmation,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Notification => "notification",
            MessageType::Reply => "reply",
            MessageType::Confirmation => "confirmation",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "notification" => Ok(MessageType::Notification),
            "reply" => Ok(MessageType::Reply),
            "confirmation" => Ok(MessageType::Confirmation),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// A message row as persisted in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: QueueId,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Diagnostic from the most recent failed attempt
    pub error_message: Option<String>,
    /// Opaque data owned by the enqueuing side
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    /// Whether a worker invocation may select this message
    pub fn is_eligible(&self) -> bool {
        self.status == MessageStatus::Pending && self.attempts < self.max_attempts
    }

    /// Attempts left before the message fails terminally
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// A message as submitted by an enqueuing collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub recipient_email: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl NewMessage {
    /// Create a notification with the default attempt cap
    pub fn new(
        recipient_email: impl Into<String>,
        subject: impl Into<String>,
        body_html: impl Into<String>,
    ) -> Self {
        Self {
            recipient_email: recipient_email.into(),
            recipient_name: None,
            subject: subject.into(),
            body_html: body_html.into(),
            body_text: None,
            message_type: MessageType::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            metadata: None,
        }
    }

    pub fn with_recipient_name(mut self, name: impl Into<String>) -> Self {
        self.recipient_name = Some(name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reject messages that could never be delivered
    pub fn validate(&self) -> Result<()> {
        let email = self.recipient_email.trim();
        let valid_email = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
            None => false,
        };
        if !valid_email {
            return Err(PostboxError::InvalidMessage(format!(
                "recipient '{}' is not an email address",
                self.recipient_email
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(PostboxError::InvalidMessage("subject is empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(PostboxError::InvalidMessage(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Processing,
            MessageStatus::Sent,
            MessageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("queued".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serde_matches_storage_values() {
        let json = serde_json::to_string(&MessageStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_message_type_default() {
        assert_eq!(MessageType::default(), MessageType::Notification);
        assert_eq!("reply".parse::<MessageType>().unwrap(), MessageType::Reply);
    }

    #[test]
    fn test_new_message_defaults() {
        let msg = NewMessage::new("guest@example.org", "Hello", "<p>Hi</p>");
        assert_eq!(msg.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(msg.message_type, MessageType::Notification);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_new_message_validation() {
        assert!(NewMessage::new("nobody", "Hi", "x").validate().is_err());
        assert!(NewMessage::new("@example.org", "Hi", "x").validate().is_err());
        assert!(NewMessage::new("a@b.c", "   ", "x").validate().is_err());
        assert!(NewMessage::new("a@b.c", "Hi", "x")
            .with_max_attempts(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_new_message_deserialize_defaults() {
        let msg: NewMessage = serde_json::from_str(
            r#"{"recipient_email":"a@b.c","subject":"s","body_html":"<p/>"}"#,
        )
        .unwrap();
        assert_eq!(msg.max_attempts, 3);
        assert!(msg.body_text.is_none());
    }

    #[test]
    fn test_queue_ids_are_unique() {
        assert_ne!(QueueId::new(), QueueId::new());
    }
}
