//! Queue worker
//!
//! A stateless procedure run once per scheduler tick. Each invocation reads
//! the active transport settings, recovers rows left in `processing` by a
//! dead invocation, selects a FIFO batch of eligible messages and attempts
//! each one:
//!
//! ```text
//! claim (pending -> processing, attempts + 1)
//!   -> transport.send
//!   -> ok:  processing -> sent
//!   -> err: processing -> pending | failed
//! ```
//!
//! Every transition is a conditional update in the store, so overlapping
//! invocations never deliver the same message twice.

mod summary;

pub use summary::{AttemptOutcome, QueueSummary};

use crate::config::duration_secs;
use crate::metrics;
use crate::queue::{MessageStatus, QueueId, QueuedMessage, SharedStore};
use crate::settings::{SettingsProvider, TransportSettings};
use crate::transport::{generate_message_id, MailTransport, OutgoingEmail, TransportError};
use crate::{PostboxError, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default number of messages selected per invocation
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default wall-clock budget of one invocation
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(55);

/// Default bound on a single transport call
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age after which a `processing` row counts as abandoned
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// Default scheduler tick
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Worker tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum messages selected per invocation
    pub batch_size: usize,

    /// Attempts in flight at once; 1 keeps strict FIFO order
    pub concurrency: usize,

    /// No new claims once this much time has passed since invocation start
    #[serde(with = "duration_secs")]
    pub deadline: Duration,

    /// Bound on one transport call; exceeding it is a failed attempt
    #[serde(with = "duration_secs")]
    pub attempt_timeout: Duration,

    /// `processing` rows whose last attempt is older than this are recovered
    #[serde(with = "duration_secs")]
    pub stale_after: Duration,

    /// Interval between scheduled invocations
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            deadline: DEFAULT_DEADLINE,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WorkerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Delivers queued messages through a transport
pub struct QueueWorker {
    store: SharedStore,
    settings: Arc<dyn SettingsProvider>,
    transport: Arc<dyn MailTransport>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(
        store: SharedStore,
        settings: Arc<dyn SettingsProvider>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            store,
            settings,
            transport,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Run one invocation over the persisted queue
    ///
    /// Per-message failures are recorded on the message and never returned.
    /// An error means the settings or the store were unreachable before any
    /// message was selected.
    pub async fn process_queue(&self) -> Result<QueueSummary> {
        let started = Instant::now();
        let result = self.run_invocation(started).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(ref summary) => {
                let label = if summary.disabled { "disabled" } else { "ok" };
                metrics::record_invocation(label, elapsed);
            }
            Err(ref e) => {
                metrics::record_invocation("error", elapsed);
                tracing::error!(error = %e, "Queue invocation failed");
            }
        }
        result
    }

    async fn run_invocation(&self, started: Instant) -> Result<QueueSummary> {
        let settings = match self.settings.active_settings().await? {
            Some(settings) => settings,
            None => {
                metrics::set_transport_configured(false);
                tracing::info!("No active transport settings, queue disabled");
                return Ok(QueueSummary::disabled());
            }
        };
        metrics::set_transport_configured(true);

        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| PostboxError::Config(format!("stale_after out of range: {}", e)))?;
        let cutoff = Utc::now() - stale_after;

        let (recovered, batch) = {
            let store = self.store.lock().await;
            let recovered = store.requeue_stale(cutoff)?;
            let batch = store.eligible(self.config.batch_size)?;
            (recovered, batch)
        };
        if recovered > 0 {
            metrics::record_recovered("stale", recovered);
        }

        let mut summary = QueueSummary {
            processed: batch.len(),
            recovered,
            ..QueueSummary::default()
        };
        if batch.is_empty() {
            tracing::debug!(recovered, "No eligible messages");
            self.refresh_depth().await;
            return Ok(summary);
        }

        let deadline = started + self.config.deadline;
        tracing::debug!(
            batch = batch.len(),
            concurrency = self.config.concurrency,
            relay = %settings.host,
            "Processing batch"
        );

        if self.config.concurrency <= 1 {
            for message in &batch {
                let outcome = self.attempt(message, &settings, deadline).await;
                summary.record(outcome);
            }
        } else {
            let outcomes: Vec<AttemptOutcome> = stream::iter(
                batch
                    .iter()
                    .map(|message| self.attempt(message, &settings, deadline)),
            )
            .buffered(self.config.concurrency)
            .collect()
            .await;
            for outcome in outcomes {
                summary.record(outcome);
            }
        }

        self.refresh_depth().await;
        tracing::info!(
            processed = summary.processed,
            sent = summary.sent,
            failed = summary.failed,
            retrying = summary.retrying,
            skipped = summary.skipped,
            recovered = summary.recovered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Queue invocation complete"
        );
        Ok(summary)
    }

    /// Claim, deliver and record one message
    async fn attempt(
        &self,
        message: &QueuedMessage,
        settings: &TransportSettings,
        deadline: Instant,
    ) -> AttemptOutcome {
        if Instant::now() >= deadline {
            tracing::debug!(id = %message.id, "Deadline reached, leaving message pending");
            return AttemptOutcome::Skipped;
        }

        let claimed = {
            let store = self.store.lock().await;
            store.claim(&message.id, Utc::now())
        };
        let attempt = match claimed {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                tracing::debug!(id = %message.id, "Message claimed elsewhere, skipping");
                return AttemptOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(id = %message.id, error = %e, "Failed to claim message");
                return AttemptOutcome::Skipped;
            }
        };

        let email = OutgoingEmail::from_queued(message, generate_message_id(settings));
        tracing::debug!(
            id = %message.id,
            attempt,
            max_attempts = message.max_attempts,
            message_type = %message.message_type,
            message_id = %email.message_id,
            "Attempting delivery"
        );

        let send_started = Instant::now();
        // Never run past the invocation deadline
        let budget = self
            .config
            .attempt_timeout
            .min(deadline.saturating_duration_since(send_started));
        let delivery = self.deliver(settings, &email, budget).await;
        let elapsed = send_started.elapsed().as_secs_f64();

        let outcome = self.record(&message.id, attempt, delivery).await;
        metrics::record_delivery(outcome.as_str(), elapsed);
        outcome
    }

    /// Call the transport, turning timeouts and panics into failed attempts
    async fn deliver(
        &self,
        settings: &TransportSettings,
        email: &OutgoingEmail,
        budget: Duration,
    ) -> std::result::Result<(), TransportError> {
        let send = AssertUnwindSafe(self.transport.send(settings, email)).catch_unwind();
        match tokio::time::timeout(budget, send).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(TransportError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(TransportError::Timeout(budget)),
        }
    }

    /// Write the outcome of a claimed attempt
    async fn record(
        &self,
        id: &QueueId,
        attempt: u32,
        delivery: std::result::Result<(), TransportError>,
    ) -> AttemptOutcome {
        let store = self.store.lock().await;

        let diagnostic = match delivery {
            Ok(()) => match store.mark_sent(id, attempt, Utc::now()) {
                Ok(true) => {
                    tracing::debug!(id = %id, attempt, "Message sent");
                    return AttemptOutcome::Sent;
                }
                Ok(false) => {
                    tracing::warn!(id = %id, attempt, "Claim lost before delivery was recorded");
                    return AttemptOutcome::Skipped;
                }
                Err(e) => {
                    tracing::error!(id = %id, attempt, error = %e, "Failed to record delivery");
                    format!("delivered but the outcome could not be recorded: {}", e)
                }
            },
            Err(err) => {
                let diagnostic = err.to_string();
                match store.mark_attempt_failed(id, attempt, &diagnostic) {
                    Ok(Some(status)) => return failure_outcome(id, attempt, status, &diagnostic),
                    Ok(None) => {
                        tracing::warn!(id = %id, attempt, "Claim lost before failure was recorded");
                        return AttemptOutcome::Skipped;
                    }
                    Err(e) => {
                        tracing::error!(id = %id, attempt, error = %e, "Failed to record failure");
                        diagnostic
                    }
                }
            }
        };

        // One more write so the row does not stay in `processing`
        match store.mark_attempt_failed(id, attempt, &diagnostic) {
            Ok(Some(status)) => failure_outcome(id, attempt, status, &diagnostic),
            Ok(None) => AttemptOutcome::Skipped,
            Err(e) => {
                tracing::error!(
                    id = %id,
                    attempt,
                    error = %e,
                    "Could not release message, leaving it for stale recovery"
                );
                AttemptOutcome::Unrecorded
            }
        }
    }

    /// Update queue depth gauges; failures only cost observability
    async fn refresh_depth(&self) {
        let stats = {
            let store = self.store.lock().await;
            store.stats()
        };
        match stats {
            Ok(stats) => {
                metrics::set_queue_depth(MessageStatus::Pending.as_str(), stats.pending);
                metrics::set_queue_depth(MessageStatus::Processing.as_str(), stats.processing);
                metrics::set_queue_depth(MessageStatus::Sent.as_str(), stats.sent);
                metrics::set_queue_depth(MessageStatus::Failed.as_str(), stats.failed);
            }
            Err(e) => tracing::debug!(error = %e, "Failed to read queue stats"),
        }
    }
}

fn failure_outcome(
    id: &QueueId,
    attempt: u32,
    status: MessageStatus,
    diagnostic: &str,
) -> AttemptOutcome {
    if status == MessageStatus::Failed {
        tracing::warn!(id = %id, attempt, error = %diagnostic, "Message failed permanently");
        AttemptOutcome::Failed
    } else {
        tracing::warn!(id = %id, attempt, error = %diagnostic, "Delivery failed, will retry");
        AttemptOutcome::Retrying
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
