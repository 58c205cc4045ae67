//! Postbox - transactional email delivery queue
//!
//! A persistent queue of outbound messages (notifications, replies,
//! confirmations) and a periodically invoked worker that hands them to an
//! SMTP relay. The worker retries transient failures up to a per-message cap,
//! never sends a message twice and never loses one silently.
//!
//! # Architecture
//!
//! - **queue**: Message model and the SQLite-backed queue store
//! - **settings**: Relay settings and the provider the worker reads them from
//! - **transport**: Delivery trait and the SMTP implementation
//! - **worker**: One invocation over the queue (`process_queue`)
//! - **scheduler**: Interval trigger with signal handling
//! - **config**: YAML configuration and validation
//! - **metrics**: Prometheus metrics

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod queue;

// Components
pub mod metrics;
pub mod scheduler;
pub mod settings;
pub mod transport;
pub mod worker;

// Re-exports
pub use error::{PostboxError, Result};
