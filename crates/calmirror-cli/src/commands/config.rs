//! Configuration commands.

use std::path::Path;

use crate::config::{AppConfig, CredentialOverrides};
use crate::error::{CliError, CliResult};

/// Dumps the effective configuration as TOML.
pub fn dump(config: &AppConfig, path: &Path) -> CliResult<()> {
    let text = toml::to_string_pretty(config)
        .map_err(|e| CliError::config(format!("failed to serialize config: {}", e)))?;
    println!("# {}", path.display());
    println!("{}", text);
    Ok(())
}

/// Validates the configuration, including Google client credentials if set.
pub fn validate(config: &AppConfig) -> CliResult<()> {
    config.validate()?;

    let google = &config.google;
    if google.client_id.is_some() || google.client_secret.is_some() || google.credentials_file.is_some() {
        let credentials = google.resolve_credentials(&CredentialOverrides::default())?;
        google.provider_config(credentials)?;
        println!("Google credentials are valid.");
    }

    println!("Configuration is valid.");
    Ok(())
}

/// Shows the configuration file path.
pub fn path(path: &Path) -> CliResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
