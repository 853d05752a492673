//! Command-line client for calmirror.
//!
//! This crate provides the `calmirror` binary: it wires the Google provider
//! and an on-disk store into a [`CalendarSession`](calmirror_sync::CalendarSession).

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use config::AppConfig;
pub use error::{CliError, CliResult};
