//! SQLite-backed queue store
//!
//! Every state change the worker makes is a single conditional UPDATE keyed by
//! message id and the expected prior state, so overlapping worker invocations
//! (separate processes or separate connections) cannot both claim a message.

use super::message::{MessageStatus, MessageType, NewMessage, QueueId, QueuedMessage};
use crate::{PostboxError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long a connection waits on a locked database before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Diagnostic written when a stuck `processing` row is recovered
pub const INTERRUPTED_ATTEMPT_ERROR: &str =
    "delivery attempt interrupted before its outcome was recorded";

const MESSAGE_COLUMNS: &str = "id, recipient_email, recipient_name, subject, body_html, body_text, \
     message_type, status, attempts, max_attempts, error_message, metadata, \
     created_at, last_attempt_at, sent_at";

/// Store handle shared between the worker, the settings provider and admin commands
pub type SharedStore = Arc<Mutex<QueueStore>>;

/// Message counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.sent + self.failed
    }
}

/// Durable table of queued messages
pub struct QueueStore {
    pub(crate) conn: Connection,
    path: PathBuf,
}

impl QueueStore {
    /// Open or create a queue database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!(path = %path.display(), "Opening queue database");

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self { conn, path };
        store.init_schema()?;
        Ok(store)
    }

    /// Wrap the store for sharing across async tasks
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queued_messages (
                id TEXT PRIMARY KEY,
                recipient_email TEXT NOT NULL,
                recipient_name TEXT,
                subject TEXT NOT NULL,
                body_html TEXT NOT NULL,
                body_text TEXT,
                message_type TEXT NOT NULL DEFAULT 'notification',
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                error_message TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT,
                sent_at TEXT,
                CHECK (attempts <= max_attempts)
            );

            CREATE INDEX IF NOT EXISTS idx_queue_status_created
                ON queued_messages(status, created_at);

            CREATE TABLE IF NOT EXISTS transport_settings (
                name TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT,
                password TEXT,
                from_email TEXT NOT NULL,
                from_name TEXT,
                tls TEXT NOT NULL,
                timeout_secs INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Add a message to the queue as `pending` with zero attempts
    pub fn enqueue(&self, new: NewMessage) -> Result<QueuedMessage> {
        new.validate()?;

        let message = QueuedMessage {
            id: QueueId::new(),
            recipient_email: new.recipient_email.trim().to_string(),
            recipient_name: new.recipient_name,
            subject: new.subject,
            body_html: new.body_html,
            body_text: new.body_text,
            message_type: new.message_type,
            status: MessageStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts,
            error_message: None,
            metadata: new.metadata,
            // Same precision as the stored text
            created_at: Utc::now().trunc_subsecs(6),
            last_attempt_at: None,
            sent_at: None,
        };

        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT INTO queued_messages
            (id, recipient_email, recipient_name, subject, body_html, body_text,
             message_type, status, attempts, max_attempts, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11)
            "#,
            params![
                message.id.as_str(),
                message.recipient_email,
                message.recipient_name,
                message.subject,
                message.body_html,
                message.body_text,
                message.message_type.as_str(),
                message.status.as_str(),
                message.max_attempts,
                metadata,
                format_ts(&message.created_at),
            ],
        )?;

        tracing::debug!(
            id = %message.id,
            message_type = %message.message_type,
            max_attempts = message.max_attempts,
            "Message enqueued"
        );

        Ok(message)
    }

    /// Get a message by ID
    pub fn get(&self, id: &QueueId) -> Result<Option<QueuedMessage>> {
        let sql = format!("SELECT {} FROM queued_messages WHERE id = ?1", MESSAGE_COLUMNS);
        let message = self
            .conn
            .query_row(&sql, params![id.as_str()], message_from_row)
            .optional()?;
        Ok(message)
    }

    /// Select up to `limit` eligible messages, oldest first
    pub fn eligible(&self, limit: usize) -> Result<Vec<QueuedMessage>> {
        let sql = format!(
            r#"
            SELECT {} FROM queued_messages
            WHERE status = 'pending' AND attempts < max_attempts
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?1
            "#,
            MESSAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![sql_limit(limit)], message_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Move a pending message to `processing` and count the attempt
    ///
    /// Returns the new attempt number, or `None` when the message is no longer
    /// eligible (another invocation claimed it, an operator deleted it, or its
    /// attempts are exhausted).
    pub fn claim(&self, id: &QueueId, now: DateTime<Utc>) -> Result<Option<u32>> {
        let attempt = self
            .conn
            .query_row(
                r#"
                UPDATE queued_messages
                SET status = 'processing', attempts = attempts + 1, last_attempt_at = ?1
                WHERE id = ?2 AND status = 'pending' AND attempts < max_attempts
                RETURNING attempts
                "#,
                params![format_ts(&now), id.as_str()],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(attempt)
    }

    /// Record a successful delivery for the given claimed attempt
    ///
    /// Returns false when the row no longer matches the claim.
    pub fn mark_sent(&self, id: &QueueId, attempt: u32, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE queued_messages
            SET status = 'sent', sent_at = ?1, error_message = NULL
            WHERE id = ?2 AND status = 'processing' AND attempts = ?3
            "#,
            params![format_ts(&now), id.as_str(), attempt],
        )?;
        Ok(changed == 1)
    }

    /// Record a failed delivery for the given claimed attempt
    ///
    /// The row returns to `pending` while attempts remain and becomes `failed`
    /// once `attempts` reaches `max_attempts`. Returns the resulting status, or
    /// `None` when the row no longer matches the claim.
    pub fn mark_attempt_failed(
        &self,
        id: &QueueId,
        attempt: u32,
        error: &str,
    ) -> Result<Option<MessageStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                r#"
                UPDATE queued_messages
                SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                    error_message = ?1
                WHERE id = ?2 AND status = 'processing' AND attempts = ?3
                RETURNING status
                "#,
                params![error, id.as_str(), attempt],
                |row| row.get(0),
            )
            .optional()?;

        status
            .map(|s| {
                s.parse::<MessageStatus>()
                    .map_err(|e| PostboxError::Storage(format!("bad status after update: {}", e)))
            })
            .transpose()
    }

    /// Release `processing` rows whose last attempt started before `cutoff`
    ///
    /// Such rows belong to an invocation that died mid-attempt. They go back
    /// to `pending`, or to `failed` when that attempt was their last one.
    pub fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE queued_messages
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                error_message = ?1
            WHERE status = 'processing'
              AND (last_attempt_at IS NULL OR last_attempt_at < ?2)
            "#,
            params![INTERRUPTED_ATTEMPT_ERROR, format_ts(&cutoff)],
        )?;

        if changed > 0 {
            tracing::warn!(count = changed, "Recovered messages stuck in processing");
        }
        Ok(changed)
    }

    /// List messages, newest first, optionally filtered by status
    pub fn list(&self, status: Option<MessageStatus>, limit: usize) -> Result<Vec<QueuedMessage>> {
        let messages = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM queued_messages WHERE status = ?1 \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    MESSAGE_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows =
                    stmt.query_map(params![status.as_str(), sql_limit(limit)], message_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM queued_messages \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    MESSAGE_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![sql_limit(limit)], message_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(messages)
    }

    /// Make a `failed` or `pending` message eligible again
    ///
    /// Attempts are reset to zero so the message gets its full budget back.
    pub fn retry(&self, id: &QueueId) -> Result<QueuedMessage> {
        let current = self
            .get(id)?
            .ok_or_else(|| PostboxError::MessageNotFound(id.to_string()))?;

        if matches!(current.status, MessageStatus::Sent | MessageStatus::Processing) {
            return Err(PostboxError::InvalidTransition {
                id: id.to_string(),
                status: current.status,
                action: "retry",
            });
        }

        let changed = self.conn.execute(
            r#"
            UPDATE queued_messages
            SET status = 'pending', attempts = 0, error_message = NULL
            WHERE id = ?1 AND status IN ('pending', 'failed')
            "#,
            params![id.as_str()],
        )?;

        let updated = self
            .get(id)?
            .ok_or_else(|| PostboxError::MessageNotFound(id.to_string()))?;

        if changed == 0 {
            // A worker claimed it between the read and the update
            return Err(PostboxError::InvalidTransition {
                id: id.to_string(),
                status: updated.status,
                action: "retry",
            });
        }

        tracing::info!(id = %id, previous = %current.status, "Message queued for retry");
        Ok(updated)
    }

    /// Delete a message; returns false if it did not exist
    pub fn delete(&self, id: &QueueId) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM queued_messages WHERE id = ?1", params![id.as_str()])?;
        Ok(changed == 1)
    }

    /// Delete delivered messages sent before `cutoff`
    pub fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self.conn.execute(
            "DELETE FROM queued_messages WHERE status = 'sent' AND sent_at < ?1",
            params![format_ts(&cutoff)],
        )?;
        tracing::info!(count = changed, "Purged delivered messages");
        Ok(changed)
    }

    /// Count messages per status
    pub fn stats(&self) -> Result<QueueStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM queued_messages GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match status.parse::<MessageStatus>() {
                Ok(MessageStatus::Pending) => stats.pending = count,
                Ok(MessageStatus::Processing) => stats.processing = count,
                Ok(MessageStatus::Sent) => stats.sent = count,
                Ok(MessageStatus::Failed) => stats.failed = count,
                Err(e) => tracing::warn!(error = %e, "Ignoring unknown status in stats"),
            }
        }
        Ok(stats)
    }
}

/// Fixed-width RFC 3339 so that text comparison matches time order
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}

/// Convert a database row selected with `MESSAGE_COLUMNS`
fn message_from_row(row: &Row) -> rusqlite::Result<QueuedMessage> {
    let message_type: String = row.get(6)?;
    let status: String = row.get(7)?;
    let metadata: Option<String> = row.get(11)?;
    let created_at: String = row.get(12)?;

    let metadata = metadata
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;

    Ok(QueuedMessage {
        id: QueueId::from_string(row.get::<_, String>(0)?),
        recipient_email: row.get(1)?,
        recipient_name: row.get(2)?,
        subject: row.get(3)?,
        body_html: row.get(4)?,
        body_text: row.get(5)?,
        // Reporting tag only; an unknown value should not hide the row
        message_type: message_type.parse().unwrap_or(MessageType::Notification),
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        attempts: row.get(8)?,
        max_attempts: row.get(9)?,
        error_message: row.get(10)?,
        metadata,
        created_at: parse_ts(12, &created_at)?,
        last_attempt_at: parse_opt_ts(13, row.get(13)?)?,
        sent_at: parse_opt_ts(14, row.get(14)?)?,
    })
}

/// SQLite reads a negative LIMIT as unbounded, so clamp instead of wrapping
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn create_test_store() -> (QueueStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path().join("queue.db")).unwrap();
        (store, temp_dir)
    }

    fn sample(to: &str) -> NewMessage {
        NewMessage::new(to, "Viewing request", "<p>Thanks for your interest</p>")
    }

    #[test]
    fn test_enqueue_and_get() {
        let (store, _dir) = create_test_store();

        let queued = store
            .enqueue(
                sample("guest@example.org")
                    .with_recipient_name("Guest")
                    .with_text("Thanks")
                    .with_type(MessageType::Confirmation)
                    .with_metadata(serde_json::json!({"property_id": 42})),
            )
            .unwrap();

        assert_eq!(queued.status, MessageStatus::Pending);
        assert_eq!(queued.attempts, 0);
        assert_eq!(queued.max_attempts, 3);

        let loaded = store.get(&queued.id).unwrap().unwrap();
        assert_eq!(loaded.recipient_name.as_deref(), Some("Guest"));
        assert_eq!(loaded.message_type, MessageType::Confirmation);
        assert_eq!(loaded.metadata, Some(serde_json::json!({"property_id": 42})));
        assert_eq!(format_ts(&loaded.created_at), format_ts(&queued.created_at));
    }

    #[test]
    fn test_enqueue_rejects_invalid() {
        let (store, _dir) = create_test_store();
        let err = store.enqueue(sample("not-an-email")).unwrap_err();
        assert!(matches!(err, PostboxError::InvalidMessage(_)));
        assert_eq!(store.stats().unwrap().total(), 0);
    }

    #[test]
    fn test_get_missing() {
        let (store, _dir) = create_test_store();
        assert!(store.get(&QueueId::from_string("nope")).unwrap().is_none());
    }

    #[test]
    fn test_eligible_is_fifo_and_limited() {
        let (store, _dir) = create_test_store();
        let first = store.enqueue(sample("one@example.org")).unwrap();
        let second = store.enqueue(sample("two@example.org")).unwrap();
        store.enqueue(sample("three@example.org")).unwrap();

        let batch = store.eligible(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, first.id);
        assert_eq!(batch[1].id, second.id);
    }

    #[test]
    fn test_oversized_limit_is_clamped() {
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
        assert_eq!(sql_limit(25), 25);

        let (store, _dir) = create_test_store();
        store.enqueue(sample("one@example.org")).unwrap();
        store.enqueue(sample("two@example.org")).unwrap();
        assert_eq!(store.eligible(usize::MAX).unwrap().len(), 2);
        assert_eq!(store.list(None, usize::MAX).unwrap().len(), 2);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (store, _dir) = create_test_store();
        let msg = store.enqueue(sample("guest@example.org")).unwrap();

        assert_eq!(store.claim(&msg.id, Utc::now()).unwrap(), Some(1));
        assert_eq!(store.claim(&msg.id, Utc::now()).unwrap(), None);

        let loaded = store.get(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Processing);
        assert_eq!(loaded.attempts, 1);
        assert!(loaded.last_attempt_at.is_some());
        assert!(store.eligible(10).unwrap().is_empty());
    }

    #[test]
    fn test_claim_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.db");
        let a = QueueStore::open(&path).unwrap();
        let b = QueueStore::open(&path).unwrap();

        let msg = a.enqueue(sample("guest@example.org")).unwrap();

        // Both connections see it as eligible before either claims
        assert_eq!(a.eligible(10).unwrap().len(), 1);
        assert_eq!(b.eligible(10).unwrap().len(), 1);

        assert_eq!(b.claim(&msg.id, Utc::now()).unwrap(), Some(1));
        assert_eq!(a.claim(&msg.id, Utc::now()).unwrap(), None);
    }

    #[test]
    fn test_mark_sent_clears_error() {
        let (store, _dir) = create_test_store();
        let msg = store.enqueue(sample("guest@example.org")).unwrap();

        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();
        store.mark_attempt_failed(&msg.id, attempt, "SMTP 451").unwrap();
        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();
        assert!(store.mark_sent(&msg.id, attempt, Utc::now()).unwrap());

        let loaded = store.get(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Sent);
        assert_eq!(loaded.attempts, 2);
        assert!(loaded.sent_at.is_some());
        assert!(loaded.error_message.is_none());
    }

    #[test]
    fn test_mark_sent_requires_matching_claim() {
        let (store, _dir) = create_test_store();
        let msg = store.enqueue(sample("guest@example.org")).unwrap();

        // Never claimed
        assert!(!store.mark_sent(&msg.id, 1, Utc::now()).unwrap());

        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();
        assert!(!store.mark_sent(&msg.id, attempt + 1, Utc::now()).unwrap());
        assert!(store.mark_sent(&msg.id, attempt, Utc::now()).unwrap());
    }

    #[test]
    fn test_failed_attempt_returns_to_pending_then_fails() {
        let (store, _dir) = create_test_store();
        let msg = store
            .enqueue(sample("guest@example.org").with_max_attempts(2))
            .unwrap();

        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();
        let status = store.mark_attempt_failed(&msg.id, attempt, "timeout").unwrap();
        assert_eq!(status, Some(MessageStatus::Pending));

        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();
        let status = store.mark_attempt_failed(&msg.id, attempt, "timeout again").unwrap();
        assert_eq!(status, Some(MessageStatus::Failed));

        let loaded = store.get(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.attempts, 2);
        assert_eq!(loaded.error_message.as_deref(), Some("timeout again"));
        assert_eq!(store.claim(&msg.id, Utc::now()).unwrap(), None);
    }

    #[test]
    fn test_requeue_stale() {
        let (store, _dir) = create_test_store();
        let retryable = store.enqueue(sample("a@example.org")).unwrap();
        let last_chance = store
            .enqueue(sample("b@example.org").with_max_attempts(1))
            .unwrap();
        let fresh = store.enqueue(sample("c@example.org")).unwrap();

        let long_ago = Utc::now() - ChronoDuration::hours(1);
        store.claim(&retryable.id, long_ago).unwrap();
        store.claim(&last_chance.id, long_ago).unwrap();
        store.claim(&fresh.id, Utc::now()).unwrap();

        let cutoff = Utc::now() - ChronoDuration::minutes(10);
        assert_eq!(store.requeue_stale(cutoff).unwrap(), 2);

        let retryable = store.get(&retryable.id).unwrap().unwrap();
        assert_eq!(retryable.status, MessageStatus::Pending);
        assert_eq!(retryable.attempts, 1);
        assert_eq!(
            retryable.error_message.as_deref(),
            Some(INTERRUPTED_ATTEMPT_ERROR)
        );

        let last_chance = store.get(&last_chance.id).unwrap().unwrap();
        assert_eq!(last_chance.status, MessageStatus::Failed);
        assert_eq!(last_chance.attempts, last_chance.max_attempts);

        let fresh = store.get(&fresh.id).unwrap().unwrap();
        assert_eq!(fresh.status, MessageStatus::Processing);
    }

    #[test]
    fn test_list_filters_by_status() {
        let (store, _dir) = create_test_store();
        let a = store.enqueue(sample("a@example.org")).unwrap();
        store.enqueue(sample("b@example.org")).unwrap();
        store.claim(&a.id, Utc::now()).unwrap();

        assert_eq!(store.list(None, 100).unwrap().len(), 2);
        let processing = store.list(Some(MessageStatus::Processing), 100).unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, a.id);
        assert!(store.list(Some(MessageStatus::Sent), 100).unwrap().is_empty());
    }

    #[test]
    fn test_retry_failed_message() {
        let (store, _dir) = create_test_store();
        let msg = store
            .enqueue(sample("guest@example.org").with_max_attempts(1))
            .unwrap();
        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();
        store.mark_attempt_failed(&msg.id, attempt, "rejected").unwrap();

        let retried = store.retry(&msg.id).unwrap();
        assert_eq!(retried.status, MessageStatus::Pending);
        assert_eq!(retried.attempts, 0);
        assert!(retried.error_message.is_none());
        assert!(retried.is_eligible());
    }

    #[test]
    fn test_retry_rejects_sent_and_missing() {
        let (store, _dir) = create_test_store();
        let msg = store.enqueue(sample("guest@example.org")).unwrap();
        let attempt = store.claim(&msg.id, Utc::now()).unwrap().unwrap();

        let err = store.retry(&msg.id).unwrap_err();
        assert!(matches!(
            err,
            PostboxError::InvalidTransition {
                status: MessageStatus::Processing,
                ..
            }
        ));

        store.mark_sent(&msg.id, attempt, Utc::now()).unwrap();
        assert!(store.retry(&msg.id).is_err());

        let err = store.retry(&QueueId::from_string("missing")).unwrap_err();
        assert!(matches!(err, PostboxError::MessageNotFound(_)));
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = create_test_store();
        let msg = store.enqueue(sample("guest@example.org")).unwrap();
        assert!(store.delete(&msg.id).unwrap());
        assert!(!store.delete(&msg.id).unwrap());
        assert!(store.get(&msg.id).unwrap().is_none());
    }

    #[test]
    fn test_purge_and_stats() {
        let (store, _dir) = create_test_store();
        let sent = store.enqueue(sample("a@example.org")).unwrap();
        store.enqueue(sample("b@example.org")).unwrap();

        let attempt = store.claim(&sent.id, Utc::now()).unwrap().unwrap();
        store.mark_sent(&sent.id, attempt, Utc::now()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.total(), 2);

        let future = Utc::now() + ChronoDuration::minutes(1);
        assert_eq!(store.purge_sent_before(future).unwrap(), 1);
        assert_eq!(store.stats().unwrap().sent, 0);
        assert_eq!(store.stats().unwrap().pending, 1);
    }
}
