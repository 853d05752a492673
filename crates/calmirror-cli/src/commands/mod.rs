//! Command implementations.

pub mod auth;
pub mod book;
pub mod config;
pub mod events;
pub mod status;
pub mod watch;

use std::io::Write;
use std::sync::Arc;

use calmirror_providers::google::GoogleProvider;
use calmirror_providers::{BoxFuture, OAuthFlow, ProviderError, ProviderResult};
use calmirror_sync::{CalendarSession, FetchCoordinator, FileStore, KeyValueStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use url::Url;

use crate::config::{AppConfig, CredentialOverrides};
use crate::error::CliResult;

/// Builds a session backed by Google and the on-disk store.
pub fn open_session(
    config: &AppConfig,
    user_id: &str,
    overrides: &CredentialOverrides,
) -> CliResult<CalendarSession> {
    let credentials = config.google.resolve_credentials(overrides)?;
    let provider = Arc::new(GoogleProvider::new(
        config.google.provider_config(credentials)?,
    )?);

    let dir = config.storage.dir();
    debug!(dir = %dir.display(), user_id, "opening store");
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir));

    let coordinator =
        FetchCoordinator::with_store(user_id, provider.clone(), store, config.sync.clone());
    Ok(CalendarSession::new(coordinator).with_oauth_flow(Arc::new(TerminalFlow::new(provider))))
}

/// Consent flow driven from the terminal: print the URL, read back the code.
pub struct TerminalFlow {
    provider: Arc<GoogleProvider>,
}

impl TerminalFlow {
    pub fn new(provider: Arc<GoogleProvider>) -> Self {
        Self { provider }
    }
}

impl OAuthFlow for TerminalFlow {
    fn authorize(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(async move {
            let request = self.provider.begin_authorization();
            eprintln!("Open this URL in your browser and authorize access:");
            eprintln!();
            eprintln!("  {}", request.url);
            eprintln!();
            eprint!("Paste the code or the full redirect URL: ");
            let _ = std::io::stderr().flush();

            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .map_err(|e| ProviderError::local(format!("failed to read code: {}", e)))?;
            extract_code(&line, &request.state)
        })
    }
}

/// Accepts either a bare authorization code or the redirect URL carrying it.
///
/// A redirect URL must echo `state`; one from another consent session is
/// rejected.
pub fn extract_code(input: &str, state: &str) -> ProviderResult<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ProviderError::rejected("no authorization code entered"));
    }
    let Ok(url) = Url::parse(input) else {
        return Ok(input.to_string());
    };

    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };
    if let Some(error) = param("error") {
        return Err(ProviderError::reauth_required(format!(
            "authorization was not granted: {}",
            error
        )));
    }
    if param("state").as_deref() != Some(state) {
        return Err(ProviderError::rejected(
            "redirect URL belongs to a different sign-in attempt",
        ));
    }
    param("code").ok_or_else(|| ProviderError::rejected("redirect URL carries no code"))
}
