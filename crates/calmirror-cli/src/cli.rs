//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// calmirror - mirror your calendar, even when the network does not cooperate
#[derive(Debug, Parser)]
#[command(name = "calmirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALMIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Store credentials and cache under this identity
    #[arg(long, env = "CALMIRROR_USER")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect a Google account
    Auth {
        /// OAuth client ID (from Google Cloud Console)
        #[arg(long, env = "GOOGLE_CLIENT_ID")]
        client_id: Option<String>,

        /// OAuth client secret (from Google Cloud Console)
        #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
        client_secret: Option<String>,

        /// Path to Google Cloud Console credentials JSON file
        #[arg(long, env = "GOOGLE_CREDENTIALS_FILE")]
        credentials_file: Option<PathBuf>,

        /// Reconnect even if a credential is already stored
        #[arg(long, short)]
        force: bool,
    },

    /// List mirrored events
    Events {
        /// Bypass the cache
        #[arg(long, short)]
        force: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List calendars
    Calendars {
        /// Bypass the cache
        #[arg(long, short)]
        force: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Create an event
    Book {
        /// Event title
        title: String,

        /// Start time (RFC 3339, or `YYYY-MM-DD HH:MM` local time)
        #[arg(long)]
        start: String,

        /// Duration in minutes
        #[arg(long, default_value = "30")]
        duration: u32,

        /// Calendar to create the event in
        #[arg(long, default_value = "primary")]
        calendar: String,

        /// Event location
        #[arg(long)]
        location: Option<String>,
    },

    /// Show connection and cache status
    Status {
        /// Also probe the provider
        #[arg(long)]
        probe: bool,
    },

    /// Forget the stored credential and cached data
    Disconnect,

    /// Keep the mirror fresh and recover from failures until interrupted
    Watch {
        /// Seconds between refreshes (defaults to the cache TTL)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
