//! Invocation summary

use serde::Serialize;

/// What happened to one selected message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Relay accepted the message
    Sent,
    /// Attempt failed, attempts remain
    Retrying,
    /// Attempt failed and was the last one
    Failed,
    /// Not attempted: deadline reached or another invocation claimed it
    Skipped,
    /// Attempted, but neither outcome write succeeded
    Unrecorded,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "sent",
            AttemptOutcome::Retrying => "retrying",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Skipped => "skipped",
            AttemptOutcome::Unrecorded => "unrecorded",
        }
    }
}

/// Result of one worker invocation
///
/// `processed`, `sent` and `failed` are what schedulers rely on; the other
/// counters are operator detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    /// Eligible messages selected for this invocation
    pub processed: usize,
    pub sent: usize,
    /// Messages moved to terminal failure
    pub failed: usize,
    /// Failed attempts returned to `pending`
    pub retrying: usize,
    pub skipped: usize,
    /// Attempts whose outcome could not be written
    pub unrecorded: usize,
    /// Abandoned `processing` rows released before selection
    pub recovered: usize,
    /// No active transport settings
    pub disabled: bool,
}

impl QueueSummary {
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Sent => self.sent += 1,
            AttemptOutcome::Retrying => self.retrying += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Skipped => self.skipped += 1,
            AttemptOutcome::Unrecorded => self.unrecorded += 1,
        }
    }
}

impl std::fmt::Display for QueueSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.disabled {
            return write!(f, "queue disabled: no active transport settings");
        }
        write!(
            f,
            "processed {}, sent {}, failed {}, retrying {}, skipped {}",
            self.processed, self.sent, self.failed, self.retrying, self.skipped
        )?;
        if self.recovered > 0 {
            write!(f, ", recovered {}", self.recovered)?;
        }
        if self.unrecorded > 0 {
            write!(f, ", unrecorded {}", self.unrecorded)?;
        }
        Ok(())
    }
}
