//! Configuration system
//!
//! Loads ~/.config/postbox/config.yaml with support for:
//! - Queue database location
//! - Worker batch size, concurrency and time budgets
//! - An optional fixed relay configuration

mod postbox_config;
pub mod validation;

pub use postbox_config::{duration_secs, PostboxConfig};
pub use validation::{validate_config, validate_config_result, validate_transport, ValidationError};
