//! SMTP relay wrapper for Rust
//!
//! A type-safe interface for handing one transactional message to an
//! authenticated SMTP relay, built on lettre's async tokio transport.
//!
//! # Example
//!
//! ```no_run
//! use relay::{Envelope, Relay, RelayConfig, TlsMode};
//!
//! # async fn run() -> relay::Result<()> {
//! let config = RelayConfig::new("smtp.example.com", 587, "noreply@example.com")
//!     .with_credentials("noreply@example.com", "secret")
//!     .with_tls(TlsMode::StartTls);
//! let relay = Relay::new(config)?;
//!
//! let envelope = Envelope::new("guest@example.org", "Booking received", "<p>Thanks!</p>")
//!     .with_text("Thanks!")
//!     .with_message_id("<0f3c@example.com>");
//! let reply = relay.send(&envelope).await?;
//! println!("relay answered {}", reply);
//! # Ok(())
//! # }
//! ```

use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("{0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("invalid TLS mode '{0}' (expected none, starttls or tls)")]
    InvalidTlsMode(String),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// How the connection to the relay is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection, no TLS at all
    None,
    /// Plain connection upgraded with STARTTLS (required, not opportunistic)
    #[default]
    StartTls,
    /// Implicit TLS from the first byte (usually port 465)
    Tls,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::None => "none",
            TlsMode::StartTls => "starttls",
            TlsMode::Tls => "tls",
        }
    }
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(TlsMode::None),
            "starttls" => Ok(TlsMode::StartTls),
            "tls" | "ssl" => Ok(TlsMode::Tls),
            other => Err(Error::InvalidTlsMode(other.to_string())),
        }
    }
}

/// Connection and sender identity for one relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub tls: TlsMode,
    pub timeout: Duration,
    /// Name announced in EHLO; lettre's default is used when unset
    pub hello_name: Option<String>,
}

impl RelayConfig {
    /// Create a config with no credentials, STARTTLS and a 30s timeout
    pub fn new(host: impl Into<String>, port: u16, from_email: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            from_email: from_email.into(),
            from_name: None,
            tls: TlsMode::default(),
            timeout: Duration::from_secs(30),
            hello_name: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_hello_name(mut self, name: impl Into<String>) -> Self {
        self.hello_name = Some(name.into());
        self
    }
}

/// One outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    /// Value of the Message-ID header, including angle brackets
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            to_name: None,
            subject: subject.into(),
            html: html.into(),
            text: None,
            message_id: None,
        }
    }

    pub fn with_to_name(mut self, name: impl Into<String>) -> Self {
        self.to_name = Some(name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Handle to a configured relay
pub struct Relay {
    config: RelayConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl Relay {
    /// Build the SMTP transport for `config`
    ///
    /// No connection is opened here; lettre connects lazily on send.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let tls = match config.tls {
            TlsMode::None => Tls::None,
            TlsMode::StartTls => Tls::Required(tls_parameters(&config.host)?),
            TlsMode::Tls => Tls::Wrapper(tls_parameters(&config.host)?),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .timeout(Some(config.timeout))
            .tls(tls);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        if let Some(ref name) = config.hello_name {
            builder = builder.hello_name(ClientId::Domain(name.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            config,
        })
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Render an envelope into a MIME message with this relay's sender identity
    pub fn build_message(&self, envelope: &Envelope) -> Result<Message> {
        let from = mailbox(self.config.from_name.clone(), &self.config.from_email)?;
        let to = mailbox(envelope.to_name.clone(), &envelope.to)?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(envelope.subject.clone())
            .message_id(envelope.message_id.clone());

        let message = match envelope.text {
            Some(ref text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                envelope.html.clone(),
            ))?,
            None => builder.singlepart(SinglePart::html(envelope.html.clone()))?,
        };

        Ok(message)
    }

    /// Send one envelope and return the relay's reply line
    pub async fn send(&self, envelope: &Envelope) -> Result<String> {
        let message = self.build_message(envelope)?;
        let response = self.mailer.send(message).await?;
        let reply = match response.first_line() {
            Some(line) => format!("{} {}", response.code(), line),
            None => response.code().to_string(),
        };
        Ok(reply)
    }
}

fn tls_parameters(host: &str) -> Result<TlsParameters> {
    TlsParameters::new(host.to_string()).map_err(|e| Error::Tls(e.to_string()))
}

fn mailbox(name: Option<String>, address: &str) -> Result<Mailbox> {
    let parsed = address.parse().map_err(|source| Error::InvalidAddress {
        address: address.to_string(),
        source,
    })?;
    Ok(Mailbox::new(name, parsed))
}
