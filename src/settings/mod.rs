//! Transport settings and the provider the worker reads them from
//!
//! The worker asks its [`SettingsProvider`] once per invocation and passes the
//! result down to every attempt; nothing here is global state.
//!
//! Saved configurations live in the `transport_settings` table of the queue
//! database. At most one of them is active; when none is, the queue is
//! disabled and invocations do nothing.

use crate::queue::store::{format_ts, parse_ts, QueueStore, SharedStore};
use crate::{PostboxError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay::{RelayConfig, TlsMode};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay connection and sender identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Name of this saved configuration
    #[serde(default = "default_name")]
    pub name: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Sender address; also supplies the domain of generated Message-IDs
    pub from_email: String,

    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default)]
    pub tls: TlsMode,

    /// Relay-level timeout for connect and each SMTP command
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_active() -> bool {
    true
}

impl TransportSettings {
    /// Create active settings with STARTTLS on port 587
    pub fn new(host: impl Into<String>, from_email: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            host: host.into(),
            port: default_port(),
            username: None,
            password: None,
            from_email: from_email.into(),
            from_name: None,
            tls: TlsMode::default(),
            timeout_secs: default_timeout_secs(),
            active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
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

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Domain part of the sender address
    pub fn sender_domain(&self) -> &str {
        self.from_email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
            .unwrap_or("localhost")
    }

    /// Build the relay connection config
    pub fn to_relay_config(&self, hello_name: Option<&str>) -> RelayConfig {
        let mut config = RelayConfig::new(&self.host, self.port, &self.from_email)
            .with_tls(self.tls)
            .with_timeout(Duration::from_secs(self.timeout_secs));

        if let Some(ref name) = self.from_name {
            config = config.with_from_name(name);
        }
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            config = config.with_credentials(user, pass);
        }
        if let Some(name) = hello_name {
            config = config.with_hello_name(name);
        }
        config
    }
}

/// Source of the active transport configuration
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// The configuration to use for this invocation; `None` disables the queue
    async fn active_settings(&self) -> Result<Option<TransportSettings>>;
}

/// Settings read from the queue database on every invocation
pub struct StoreSettings {
    store: SharedStore,
}

impl StoreSettings {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SettingsProvider for StoreSettings {
    async fn active_settings(&self) -> Result<Option<TransportSettings>> {
        let store = self.store.lock().await;
        store.active_transport_settings()
    }
}

/// A fixed configuration, e.g. the `transport:` block of the config file
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(Option<TransportSettings>);

impl StaticSettings {
    pub fn new(settings: Option<TransportSettings>) -> Self {
        Self(settings)
    }

    /// A provider that always reports the queue as disabled
    pub fn disabled() -> Self {
        Self(None)
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn active_settings(&self) -> Result<Option<TransportSettings>> {
        Ok(self.0.clone().filter(|s| s.active))
    }
}

/// A saved settings row with its bookkeeping timestamp
#[derive(Debug, Clone)]
pub struct SavedSettings {
    pub settings: TransportSettings,
    pub updated_at: DateTime<Utc>,
}

const SETTINGS_COLUMNS: &str =
    "name, host, port, username, password, from_email, from_name, tls, timeout_secs, active, updated_at";

impl QueueStore {
    /// Insert or replace a saved configuration
    ///
    /// Saving an active configuration deactivates every other one.
    pub fn save_transport_settings(&self, settings: &TransportSettings) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        if settings.active {
            tx.execute("UPDATE transport_settings SET active = 0", [])?;
        }

        tx.execute(
            r#"
            INSERT OR REPLACE INTO transport_settings
            (name, host, port, username, password, from_email, from_name, tls, timeout_secs, active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                settings.name,
                settings.host,
                settings.port,
                settings.username,
                settings.password,
                settings.from_email,
                settings.from_name,
                settings.tls.as_str(),
                settings.timeout_secs as i64,
                settings.active,
                format_ts(&Utc::now()),
            ],
        )?;

        tx.commit()?;

        tracing::info!(
            name = %settings.name,
            host = %settings.host,
            active = settings.active,
            "Transport settings saved"
        );
        Ok(())
    }

    /// Make the named configuration the only active one
    pub fn activate_transport_settings(&self, name: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("UPDATE transport_settings SET active = 0", [])?;
        let changed = tx.execute(
            "UPDATE transport_settings SET active = 1, updated_at = ?1 WHERE name = ?2",
            params![format_ts(&Utc::now()), name],
        )?;

        if changed == 0 {
            // Dropping the transaction rolls back the deactivation
            return Err(PostboxError::SettingsNotFound(name.to_string()));
        }

        tx.commit()?;
        tracing::info!(name = %name, "Transport settings activated");
        Ok(())
    }

    /// Deactivate every configuration, disabling the queue
    pub fn deactivate_transport_settings(&self) -> Result<usize> {
        let changed = self
            .conn
            .execute("UPDATE transport_settings SET active = 0 WHERE active = 1", [])?;
        tracing::info!("Transport settings deactivated; queue disabled");
        Ok(changed)
    }

    /// The active configuration, if any
    ///
    /// If several rows are somehow active the most recently updated one wins.
    pub fn active_transport_settings(&self) -> Result<Option<TransportSettings>> {
        let sql = format!(
            "SELECT {} FROM transport_settings WHERE active = 1 ORDER BY updated_at DESC LIMIT 1",
            SETTINGS_COLUMNS
        );
        let saved = self.conn.query_row(&sql, [], settings_from_row).optional()?;
        Ok(saved.map(|s| s.settings))
    }

    /// All saved configurations, active first
    pub fn list_transport_settings(&self) -> Result<Vec<SavedSettings>> {
        let sql = format!(
            "SELECT {} FROM transport_settings ORDER BY active DESC, name ASC",
            SETTINGS_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], settings_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn settings_from_row(row: &Row) -> rusqlite::Result<SavedSettings> {
    let tls: String = row.get(7)?;
    let timeout_secs: i64 = row.get(8)?;
    let updated_at: String = row.get(10)?;

    let settings = TransportSettings {
        name: row.get(0)?,
        host: row.get(1)?,
        port: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        from_email: row.get(5)?,
        from_name: row.get(6)?,
        tls: tls.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
        timeout_secs: timeout_secs.max(0) as u64,
        active: row.get(9)?,
    };

    Ok(SavedSettings {
        settings,
        updated_at: parse_ts(10, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (QueueStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path().join("queue.db")).unwrap();
        (store, temp_dir)
    }

    fn primary() -> TransportSettings {
        TransportSettings::new("smtp.example.com", "noreply@harborlofts.example")
            .with_name("primary")
            .with_credentials("noreply", "secret")
            .with_from_name("Harbor Lofts")
    }

    #[test]
    fn test_no_settings_means_disabled() {
        let (store, _dir) = create_test_store();
        assert!(store.active_transport_settings().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_active() {
        let (store, _dir) = create_test_store();
        store.save_transport_settings(&primary()).unwrap();

        let active = store.active_transport_settings().unwrap().unwrap();
        assert_eq!(active, primary());
    }

    #[test]
    fn test_only_one_active() {
        let (store, _dir) = create_test_store();
        store.save_transport_settings(&primary()).unwrap();
        let backup = TransportSettings::new("backup.example.com", "noreply@harborlofts.example")
            .with_name("backup");
        store.save_transport_settings(&backup).unwrap();

        let saved = store.list_transport_settings().unwrap();
        assert_eq!(saved.iter().filter(|s| s.settings.active).count(), 1);
        assert_eq!(store.active_transport_settings().unwrap().unwrap().name, "backup");

        store.activate_transport_settings("primary").unwrap();
        assert_eq!(store.active_transport_settings().unwrap().unwrap().name, "primary");
    }

    #[test]
    fn test_activate_unknown_keeps_current() {
        let (store, _dir) = create_test_store();
        store.save_transport_settings(&primary()).unwrap();

        let err = store.activate_transport_settings("ghost").unwrap_err();
        assert!(matches!(err, PostboxError::SettingsNotFound(_)));
        assert_eq!(store.active_transport_settings().unwrap().unwrap().name, "primary");
    }

    #[test]
    fn test_deactivate() {
        let (store, _dir) = create_test_store();
        store.save_transport_settings(&primary()).unwrap();
        assert_eq!(store.deactivate_transport_settings().unwrap(), 1);
        assert!(store.active_transport_settings().unwrap().is_none());
    }

    #[test]
    fn test_sender_domain() {
        assert_eq!(primary().sender_domain(), "harborlofts.example");
        assert_eq!(TransportSettings::new("h", "broken").sender_domain(), "localhost");
    }

    #[test]
    fn test_relay_config_conversion() {
        let config = primary().with_tls(TlsMode::Tls).with_port(465).to_relay_config(Some("worker-1"));
        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 465);
        assert_eq!(config.tls, TlsMode::Tls);
        assert_eq!(config.username.as_deref(), Some("noreply"));
        assert_eq!(config.from_name.as_deref(), Some("Harbor Lofts"));
        assert_eq!(config.hello_name.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_settings_yaml_defaults() {
        let settings: TransportSettings =
            serde_yaml::from_str("host: smtp.example.com\nfrom_email: a@example.com\n").unwrap();
        assert_eq!(settings.port, 587);
        assert_eq!(settings.tls, TlsMode::StartTls);
        assert!(settings.active);
    }

    #[tokio::test]
    async fn test_store_provider() {
        let (store, _dir) = create_test_store();
        store.save_transport_settings(&primary()).unwrap();
        let provider = StoreSettings::new(store.into_shared());

        let active = provider.active_settings().await.unwrap();
        assert_eq!(active.map(|s| s.name), Some("primary".to_string()));
    }

    #[tokio::test]
    async fn test_static_provider() {
        assert!(StaticSettings::disabled().active_settings().await.unwrap().is_none());

        let inactive = StaticSettings::new(Some(primary().with_active(false)));
        assert!(inactive.active_settings().await.unwrap().is_none());

        let active = StaticSettings::new(Some(primary()));
        assert!(active.active_settings().await.unwrap().is_some());
    }
}
