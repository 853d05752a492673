//! CLI error types.

use std::io;

use calmirror_providers::ProviderError;
use calmirror_sync::SyncError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the `calmirror` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Provider setup error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Sync layer error.
    #[error("{}", .0.user_message())]
    Sync(#[from] SyncError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid command-line input.
    #[error("invalid input: {0}")]
    Input(String),
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }
}
