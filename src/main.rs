//! Postbox - transactional email queue
//!
//! Main entry point for the postbox CLI.

mod commands;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use commands::{Cli, Commands, SettingsCommands};
use postbox::config::{validate_config_result, validate_transport, PostboxConfig};
use postbox::queue::{MessageStatus, MessageType, NewMessage, QueueId, QueueStore, SharedStore};
use postbox::scheduler::Scheduler;
use postbox::settings::{SettingsProvider, StaticSettings, StoreSettings, TransportSettings};
use postbox::transport::SmtpMailTransport;
use postbox::worker::QueueWorker;
use relay::TlsMode;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = postbox::logging::init(&cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(PostboxConfig::default_path);

    if let Commands::Init { force } = cli.command {
        return handle_init(&config_path, cli.database.as_deref(), force);
    }

    let mut config = PostboxConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    validate_config_result(&config)?;

    let store = open_store(&config.database)?;

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Enqueue {
            to,
            name,
            subject,
            html,
            html_file,
            text,
            message_type,
            max_attempts,
            metadata,
        } => {
            let html = match (html, html_file) {
                (Some(html), _) => html,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("--html or --html-file is required"),
            };
            let message_type: MessageType = message_type
                .parse()
                .with_context(|| "Invalid --type (notification, reply, confirmation)")?;

            let mut new = NewMessage::new(to, subject, html)
                .with_type(message_type)
                .with_max_attempts(max_attempts.unwrap_or(config.default_max_attempts));
            if let Some(name) = name {
                new = new.with_recipient_name(name);
            }
            if let Some(text) = text {
                new = new.with_text(text);
            }
            if let Some(metadata) = metadata {
                let value: serde_json::Value =
                    serde_json::from_str(&metadata).context("--metadata is not valid JSON")?;
                new = new.with_metadata(value);
            }

            let message = store.lock().await.enqueue(new)?;
            println!("{}", message.id);
        }
        Commands::Process { metrics_file, json } => {
            let worker = build_worker(&config, store);
            let summary = worker.process_queue().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary);
            }
            if let Some(path) = metrics_file {
                write_metrics(&path)?;
            }
        }
        Commands::Run { interval } => {
            let worker = build_worker(&config, store);
            let mut scheduler = Scheduler::new(worker);
            if let Some(secs) = interval {
                scheduler = scheduler.with_interval(Duration::from_secs(secs));
            }
            scheduler.run().await?;
        }
        Commands::List {
            status,
            limit,
            json,
        } => {
            let status = status
                .map(|s| s.parse::<MessageStatus>())
                .transpose()
                .with_context(|| "Invalid --status (pending, processing, sent, failed)")?;
            let messages = store.lock().await.list(status, limit)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else if messages.is_empty() {
                println!("No messages");
            } else {
                for m in &messages {
                    println!(
                        "{}  {:<10} {}/{}  {:<12} {:<30} {}",
                        m.id,
                        m.status,
                        m.attempts,
                        m.max_attempts,
                        m.message_type,
                        m.recipient_email,
                        m.subject
                    );
                }
            }
        }
        Commands::Show { id } => {
            let id = QueueId::from_string(id);
            match store.lock().await.get(&id)? {
                Some(message) => println!("{}", serde_json::to_string_pretty(&message)?),
                None => bail!("Message not found: {}", id),
            }
        }
        Commands::Retry { id } => {
            let message = store.lock().await.retry(&QueueId::from_string(id))?;
            println!("{} is pending again (0/{})", message.id, message.max_attempts);
        }
        Commands::Delete { id } => {
            let id = QueueId::from_string(id);
            if !store.lock().await.delete(&id)? {
                bail!("Message not found: {}", id);
            }
            println!("Deleted {}", id);
        }
        Commands::Stats { json } => {
            let stats = store.lock().await.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("pending:    {}", stats.pending);
                println!("processing: {}", stats.processing);
                println!("sent:       {}", stats.sent);
                println!("failed:     {}", stats.failed);
                println!("total:      {}", stats.total());
            }
        }
        Commands::Purge { older_than_days } => {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
            let purged = store.lock().await.purge_sent_before(cutoff)?;
            println!("Purged {} sent message(s)", purged);
        }
        Commands::Settings(cmd) => handle_settings(cmd, &config, &store).await?,
    }

    Ok(())
}

fn handle_init(config_path: &Path, database: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let mut config = if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        PostboxConfig::load(config_path)?
    } else {
        let mut config = PostboxConfig::new();
        if let Some(database) = database {
            config.database = database.to_path_buf();
        }
        config.save(config_path)?;
        println!("Wrote {}", config_path.display());
        config
    };
    if let Some(database) = database {
        config.database = database.to_path_buf();
    }

    open_store(&config.database)?;
    println!("Queue database ready at {}", config.database.display());
    Ok(())
}

async fn handle_settings(
    cmd: SettingsCommands,
    config: &PostboxConfig,
    store: &SharedStore,
) -> anyhow::Result<()> {
    match cmd {
        SettingsCommands::Set {
            name,
            host,
            port,
            username,
            password,
            from,
            from_name,
            tls,
            timeout,
            inactive,
        } => {
            let tls: TlsMode = tls.parse()?;
            let mut settings = TransportSettings::new(host, from)
                .with_name(name)
                .with_port(port)
                .with_tls(tls)
                .with_active(!inactive);
            settings.username = username;
            settings.password = password;
            settings.from_name = from_name;
            settings.timeout_secs = timeout;

            let errors = validate_transport(&settings, "settings");
            if !errors.is_empty() {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                bail!("Invalid settings:\n  - {}", messages.join("\n  - "));
            }

            store.lock().await.save_transport_settings(&settings)?;
            println!(
                "Saved '{}'{}",
                settings.name,
                if settings.active { " (active)" } else { "" }
            );
            if config.transport.is_some() {
                println!("Note: the config file's transport block takes precedence");
            }
        }
        SettingsCommands::Show => {
            let saved = store.lock().await.list_transport_settings()?;
            if saved.is_empty() {
                println!("No saved settings; the queue is disabled");
            }
            for entry in saved {
                let s = entry.settings;
                println!(
                    "{} {}  {}:{} ({})  from {}  updated {}",
                    if s.active { "*" } else { " " },
                    s.name,
                    s.host,
                    s.port,
                    s.tls,
                    s.from_email,
                    entry.updated_at.to_rfc3339()
                );
            }
        }
        SettingsCommands::Activate { name } => {
            store.lock().await.activate_transport_settings(&name)?;
            println!("Activated '{}'", name);
        }
        SettingsCommands::Disable => {
            let count = store.lock().await.deactivate_transport_settings()?;
            println!("Deactivated {} configuration(s); the queue is disabled", count);
        }
    }
    Ok(())
}

fn open_store(path: &Path) -> anyhow::Result<SharedStore> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = QueueStore::open(path)
        .with_context(|| format!("Failed to open queue database {}", path.display()))?;
    Ok(store.into_shared())
}

fn build_worker(config: &PostboxConfig, store: SharedStore) -> QueueWorker {
    let settings: Arc<dyn SettingsProvider> = match config.transport {
        Some(ref fixed) => Arc::new(StaticSettings::new(Some(fixed.clone()))),
        None => Arc::new(StoreSettings::new(store.clone())),
    };
    QueueWorker::new(store, settings, Arc::new(SmtpMailTransport::new()))
        .with_config(config.worker.clone())
}

fn write_metrics(path: &Path) -> anyhow::Result<()> {
    let text = postbox::metrics::encode_metrics()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
