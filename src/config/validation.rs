//! Configuration validation
//!
//! Validates postbox configuration for correctness:
//! - Worker limits are usable
//! - Stale recovery cannot race a live attempt
//! - A fixed transport block names a relay and a sender address

use super::postbox_config::PostboxConfig;
use crate::queue::BUSY_TIMEOUT;
use crate::settings::TransportSettings;
use crate::PostboxError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a postbox configuration, collecting every problem
pub fn validate_config(config: &PostboxConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.default_max_attempts == 0 {
        errors.push(ValidationError::new(
            "default_max_attempts",
            "Must allow at least one attempt",
        ));
    }

    let worker = &config.worker;
    if worker.batch_size == 0 {
        errors.push(ValidationError::new(
            "worker.batch_size",
            "Batch size must be greater than 0",
        ));
    }
    if worker.concurrency == 0 {
        errors.push(ValidationError::new(
            "worker.concurrency",
            "Concurrency must be greater than 0",
        ));
    }
    if worker.deadline.is_zero() {
        errors.push(ValidationError::new(
            "worker.deadline",
            "Deadline must be greater than 0",
        ));
    }
    if worker.attempt_timeout.is_zero() {
        errors.push(ValidationError::new(
            "worker.attempt_timeout",
            "Attempt timeout must be greater than 0",
        ));
    }
    // The outcome write and its fallback can each wait out the busy timeout
    let min_stale_after = worker.attempt_timeout + BUSY_TIMEOUT * 2;
    if worker.stale_after <= min_stale_after {
        errors.push(ValidationError::new(
            "worker.stale_after",
            format!(
                "Must exceed attempt_timeout plus twice the store busy timeout ({}s), \
                 otherwise live attempts are recovered as stale",
                min_stale_after.as_secs()
            ),
        ));
    }
    if worker.poll_interval.is_zero() {
        errors.push(ValidationError::new(
            "worker.poll_interval",
            "Poll interval must be greater than 0",
        ));
    }

    if let Some(ref transport) = config.transport {
        errors.extend(validate_transport(transport, "transport"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate relay settings, prefixing field names with `prefix`
pub fn validate_transport(settings: &TransportSettings, prefix: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if settings.name.trim().is_empty() {
        errors.push(ValidationError::new(
            format!("{}.name", prefix),
            "Settings name cannot be empty",
        ));
    }
    if settings.host.trim().is_empty() {
        errors.push(ValidationError::new(
            format!("{}.host", prefix),
            "Relay host cannot be empty",
        ));
    }
    if settings.port == 0 {
        errors.push(ValidationError::new(
            format!("{}.port", prefix),
            "Port must be greater than 0",
        ));
    }
    if !settings.from_email.contains('@') {
        errors.push(ValidationError::new(
            format!("{}.from_email", prefix),
            format!("Invalid sender address: {}", settings.from_email),
        ));
    }
    if settings.username.is_some() != settings.password.is_some() {
        errors.push(ValidationError::new(
            format!("{}.username", prefix),
            "Username and password must be set together",
        ));
    }

    errors
}

/// Validate and return a single error describing every problem
pub fn validate_config_result(config: &PostboxConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        PostboxError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
