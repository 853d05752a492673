//! CLI configuration.
//!
//! Settings live in `~/.config/calmirror/config.toml` unless `--config` or
//! `CALMIRROR_CONFIG` points elsewhere. Every section is optional:
//!
//! ```toml
//! [google]
//! client_id = "1234.apps.googleusercontent.com"
//! client_secret = "..."
//! calendar_ids = ["primary"]
//!
//! [storage]
//! user_id = "me"
//!
//! [sync]
//! cache_ttl = 300
//!
//! [health]
//! probe_interval = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use calmirror_providers::google::{GoogleConfig, OAuthClientCredentials};
use calmirror_sync::{HealthConfig, SyncConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Configuration of the `calmirror` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Google Calendar settings.
    pub google: GoogleSettings,

    /// Where credentials and cache snapshots are kept.
    pub storage: StorageSettings,

    /// Fetch and cache behaviour.
    pub sync: SyncConfig,

    /// Health monitor behaviour (used by `watch`).
    pub health: HealthConfig,
}

impl AppConfig {
    /// Loads `path`, or the default file if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Loads configuration from a specific file.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses TOML configuration.
    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content).map_err(|e| CliError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calmirror")
            .join("config.toml")
    }

    /// Checks the settings without touching the network.
    pub fn validate(&self) -> CliResult<()> {
        if self.storage.user_id.trim().is_empty() {
            return Err(CliError::config("storage.user_id must not be empty"));
        }
        if self.google.calendar_ids.is_empty() {
            return Err(CliError::config("google.calendar_ids must not be empty"));
        }
        if self.sync.max_retries > 10 {
            return Err(CliError::config("sync.max_retries must be at most 10"));
        }
        if self.health.probe_interval.is_zero() {
            return Err(CliError::config("health.probe_interval must be positive"));
        }
        Ok(())
    }
}

/// Google Calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID.
    pub client_id: Option<String>,

    /// OAuth client secret.
    pub client_secret: Option<String>,

    /// Client registration JSON downloaded from the Cloud Console.
    pub credentials_file: Option<PathBuf>,

    /// Calendars to mirror.
    pub calendar_ids: Vec<String>,

    /// Redirect URI registered for the client.
    pub redirect_uri: Option<String>,

    /// HTTP timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            credentials_file: None,
            calendar_ids: vec!["primary".to_string()],
            redirect_uri: None,
            timeout_secs: None,
        }
    }
}

/// Client credentials given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub credentials_file: Option<PathBuf>,
}

impl GoogleSettings {
    /// Resolves the OAuth client registration.
    ///
    /// Priority: CLI id and secret, CLI credentials file, config id and
    /// secret, config credentials file.
    pub fn resolve_credentials(
        &self,
        overrides: &CredentialOverrides,
    ) -> CliResult<OAuthClientCredentials> {
        let credentials = if let (Some(id), Some(secret)) =
            (&overrides.client_id, &overrides.client_secret)
        {
            OAuthClientCredentials::new(id, secret)
        } else if overrides.client_id.is_some() || overrides.client_secret.is_some() {
            return Err(CliError::input(
                "both --client-id and --client-secret are required",
            ));
        } else if let Some(ref path) = overrides.credentials_file {
            load_credentials_file(path)?
        } else if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            OAuthClientCredentials::new(id, secret)
        } else if let Some(ref path) = self.credentials_file {
            load_credentials_file(path)?
        } else {
            return Err(CliError::config(format!(
                "Google client credentials are required. Provide them via:\n  \
                 - client_id and client_secret under [google] in {}\n  \
                 - --client-id and --client-secret\n  \
                 - --credentials-file (Cloud Console JSON)",
                AppConfig::default_path().display()
            )));
        };
        credentials
            .validate()
            .map_err(|e| CliError::config(format!("invalid Google credentials: {}", e)))?;
        Ok(credentials)
    }

    /// Builds the provider configuration.
    pub fn provider_config(&self, credentials: OAuthClientCredentials) -> CliResult<GoogleConfig> {
        let mut config = GoogleConfig::new(credentials).with_calendar_ids(self.calendar_ids.clone());
        if let Some(ref uri) = self.redirect_uri {
            config = config.with_redirect_uri(uri);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config.validate().map_err(CliError::Config)?;
        Ok(config)
    }
}

fn load_credentials_file(path: &Path) -> CliResult<OAuthClientCredentials> {
    OAuthClientCredentials::from_file(path).map_err(|e| {
        CliError::config(format!(
            "failed to load credentials from {}: {}",
            path.display(),
            e
        ))
    })
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for credentials and snapshots.
    pub dir: Option<PathBuf>,

    /// Identity the credential is stored under.
    pub user_id: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            dir: None,
            user_id: "default".to_string(),
        }
    }
}

impl StorageSettings {
    /// Returns the storage directory.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("calmirror")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_ID: &str = "1234.apps.googleusercontent.com";

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.google.calendar_ids, vec!["primary".to_string()]);
        assert_eq!(config.storage.user_id, "default");
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.health, HealthConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        let config = AppConfig::parse(
            r#"
[google]
client_id = "1234.apps.googleusercontent.com"
client_secret = "s3cret"
calendar_ids = ["primary", "team@example.com"]
timeout_secs = 10

[storage]
dir = "/tmp/calmirror"
user_id = "me"

[sync]
cache_ttl = 60
max_retries = 5

[health]
probe_interval = 120
failure_threshold = 2
"#,
        )
        .unwrap();

        assert_eq!(config.google.calendar_ids.len(), 2);
        assert_eq!(config.storage.dir(), PathBuf::from("/tmp/calmirror"));
        assert_eq!(config.storage.user_id, "me");
        assert_eq!(config.sync.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.rate_limit_window, Duration::from_secs(5));
        assert_eq!(config.health.probe_interval, Duration::from_secs(120));
        assert_eq!(config.health.failure_threshold, 2);

        let credentials = config
            .google
            .resolve_credentials(&CredentialOverrides::default())
            .unwrap();
        let provider = config.google.provider_config(credentials).unwrap();
        assert_eq!(provider.timeout, Duration::from_secs(10));
        assert_eq!(provider.calendar_ids[1], "team@example.com");
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert!(matches!(
            AppConfig::parse("[sync\ncache_ttl = 1"),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn missing_explicit_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn validate_rejects_blank_user() {
        let mut config = AppConfig::default();
        config.storage.user_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_credentials_win() {
        let settings = GoogleSettings {
            client_id: Some("other.apps.googleusercontent.com".to_string()),
            client_secret: Some("config".to_string()),
            ..Default::default()
        };
        let overrides = CredentialOverrides {
            client_id: Some(CLIENT_ID.to_string()),
            client_secret: Some("cli".to_string()),
            credentials_file: None,
        };
        let credentials = settings.resolve_credentials(&overrides).unwrap();
        assert_eq!(credentials.client_id, CLIENT_ID);
        assert_eq!(credentials.client_secret, "cli");
    }

    #[test]
    fn partial_cli_credentials_fail() {
        let overrides = CredentialOverrides {
            client_id: Some(CLIENT_ID.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            GoogleSettings::default().resolve_credentials(&overrides),
            Err(CliError::Input(_))
        ));
    }

    #[test]
    fn credentials_file_is_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("client.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"installed": {{"client_id": "{}", "client_secret": "from-file"}}}}"#,
                CLIENT_ID
            ),
        )
        .unwrap();

        let settings = GoogleSettings {
            credentials_file: Some(path),
            ..Default::default()
        };
        let credentials = settings
            .resolve_credentials(&CredentialOverrides::default())
            .unwrap();
        assert_eq!(credentials.client_secret, "from-file");
    }

    #[test]
    fn missing_credentials_error() {
        let err = GoogleSettings::default()
            .resolve_credentials(&CredentialOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("client credentials are required"));
    }

    #[test]
    fn bad_client_id_rejected() {
        let settings = GoogleSettings {
            client_id: Some("not-a-google-id".to_string()),
            client_secret: Some("x".to_string()),
            ..Default::default()
        };
        assert!(
            settings
                .resolve_credentials(&CredentialOverrides::default())
                .is_err()
        );
    }

    #[test]
    fn dump_roundtrips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = AppConfig::parse(&text).unwrap();
        assert_eq!(back.sync, config.sync);
        assert_eq!(back.storage.user_id, config.storage.user_id);
    }
}
