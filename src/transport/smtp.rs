//! SMTP transport backed by the `relay` crate

use super::{MailTransport, OutgoingEmail, TransportError};
use crate::settings::TransportSettings;
use async_trait::async_trait;
use relay::{Envelope, Relay};

/// Delivers through the relay described by the invocation's settings
pub struct SmtpMailTransport {
    /// Name announced in EHLO
    hello_name: Option<String>,
}

impl SmtpMailTransport {
    /// Use this machine's host name in EHLO when it is available
    pub fn new() -> Self {
        let hello_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty());
        Self { hello_name }
    }

    /// Announce a fixed name in EHLO
    pub fn with_hello_name(name: impl Into<String>) -> Self {
        Self {
            hello_name: Some(name.into()),
        }
    }

    fn envelope(email: &OutgoingEmail) -> Envelope {
        let mut envelope = Envelope::new(&email.to, &email.subject, &email.html)
            .with_message_id(&email.message_id);
        if let Some(ref name) = email.to_name {
            envelope = envelope.with_to_name(name);
        }
        if let Some(ref text) = email.text {
            envelope = envelope.with_text(text);
        }
        envelope
    }
}

impl Default for SmtpMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl From<relay::Error> for TransportError {
    fn from(err: relay::Error) -> Self {
        match err {
            relay::Error::InvalidAddress { .. } | relay::Error::Build(_) => {
                TransportError::InvalidMessage(err.to_string())
            }
            other => TransportError::Delivery(other.to_string()),
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(
        &self,
        settings: &TransportSettings,
        email: &OutgoingEmail,
    ) -> Result<(), TransportError> {
        // lettre connects lazily, so building per attempt costs no round trip
        let relay = Relay::new(settings.to_relay_config(self.hello_name.as_deref()))?;

        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            tls = %settings.tls,
            message_id = %email.message_id,
            "Handing message to relay"
        );

        let reply = relay.send(&Self::envelope(email)).await?;
        tracing::debug!(message_id = %email.message_id, reply = %reply, "Relay accepted message");
        Ok(())
    }
}
