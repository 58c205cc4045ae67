//! CLI command definitions
//!
//! All CLI structs and subcommand enums are defined here.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Transactional email queue and delivery worker
#[derive(Parser, Debug)]
#[command(name = "postbox")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/postbox/config.yaml)
    #[arg(short, long, env = "POSTBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue database, overriding the config file
    #[arg(short, long, env = "POSTBOX_DATABASE")]
    pub database: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file and create the queue database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Add a message to the queue
    Enqueue {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Recipient display name
        #[arg(long)]
        name: Option<String>,

        #[arg(short, long)]
        subject: String,

        /// HTML body
        #[arg(long, conflicts_with = "html_file", required_unless_present = "html_file")]
        html: Option<String>,

        /// Read the HTML body from a file
        #[arg(long)]
        html_file: Option<PathBuf>,

        /// Plain-text alternative
        #[arg(long)]
        text: Option<String>,

        /// notification, reply or confirmation
        #[arg(short = 't', long = "type", default_value = "notification")]
        message_type: String,

        /// Attempt cap (default from config)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Opaque JSON stored alongside the message
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Run one worker invocation and exit
    Process {
        /// Write Prometheus metrics to this file afterwards
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the worker on an interval until SIGTERM/SIGINT
    Run {
        /// Seconds between invocations (default from config)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// List queued messages, newest first
    List {
        /// Filter by status (pending, processing, sent, failed)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one message
    Show {
        id: String,
    },

    /// Make a pending or failed message eligible again with a fresh attempt budget
    Retry {
        id: String,
    },

    /// Delete a message
    Delete {
        id: String,
    },

    /// Count messages per status
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Delete sent messages older than the given age
    Purge {
        #[arg(long)]
        older_than_days: u32,
    },

    /// Manage saved transport settings
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Save relay settings (active unless --inactive)
    Set {
        /// Name of this configuration
        #[arg(long, default_value = "default")]
        name: String,

        #[arg(long)]
        host: String,

        #[arg(long, default_value = "587")]
        port: u16,

        #[arg(long)]
        username: Option<String>,

        #[arg(long, env = "POSTBOX_SMTP_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Sender address
        #[arg(long)]
        from: String,

        /// Sender display name
        #[arg(long)]
        from_name: Option<String>,

        /// none, starttls or tls
        #[arg(long, default_value = "starttls")]
        tls: String,

        /// Relay timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Save without activating
        #[arg(long)]
        inactive: bool,
    },

    /// List saved settings
    Show,

    /// Make a saved configuration the active one
    Activate {
        name: String,
    },

    /// Deactivate all settings; the queue stops delivering
    Disable,
}
