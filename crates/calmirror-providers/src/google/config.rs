//! Google Calendar provider configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// OAuth client registration for Google API access.
#[derive(Debug, Clone)]
pub struct OAuthClientCredentials {
    /// The OAuth 2.0 client ID from Google Cloud Console.
    pub client_id: String,
    /// The OAuth 2.0 client secret from Google Cloud Console.
    pub client_secret: String,
}

/// Google's credentials JSON: either nested under `installed`/`web`, or flat.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<NestedCredentials>,
    web: Option<NestedCredentials>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthClientCredentials {
    /// Creates new client credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads credentials from a Google Cloud Console JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("failed to read credentials file: {}", e))?;
        Self::from_json(&content)
    }

    /// Parses credentials from a Google credentials JSON string.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let file: CredentialsFile = serde_json::from_str(json)
            .map_err(|e| format!("failed to parse credentials JSON: {}", e))?;

        if let Some(creds) = file.installed.or(file.web) {
            return Ok(Self::new(creds.client_id, creds.client_secret));
        }
        match (file.client_id, file.client_secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret)),
            _ => Err(
                "credentials file must contain an 'installed'/'web' section or root 'client_id'/'client_secret'"
                    .to_string(),
            ),
        }
    }

    /// Validates the credential format.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.is_empty() {
            return Err("client_id is required");
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err("client_id should end with .apps.googleusercontent.com");
        }
        if self.client_secret.is_empty() {
            return Err("client_secret is required");
        }
        Ok(())
    }
}

/// Configuration for the Google Calendar provider.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth client registration.
    pub credentials: OAuthClientCredentials,

    /// Calendars whose events are mirrored. Defaults to `primary`.
    pub calendar_ids: Vec<String>,

    /// Redirect URI registered for the consent flow.
    pub redirect_uri: String,

    /// OAuth scopes requested during consent.
    pub scopes: Vec<String>,

    /// Request timeout.
    pub timeout: Duration,

    /// Calendar API base URL.
    pub api_base: String,

    /// Consent page URL.
    pub auth_url: String,

    /// Token endpoint URL.
    pub token_url: String,
}

impl GoogleConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Scope allowing event reads and writes (bookings need write access).
    pub const DEFAULT_SCOPE: &'static str = "https://www.googleapis.com/auth/calendar.events";

    /// Scope for reading the calendar list.
    pub const CALENDAR_LIST_SCOPE: &'static str =
        "https://www.googleapis.com/auth/calendar.readonly";

    /// Calendar API v3 base URL.
    pub const API_BASE: &'static str = "https://www.googleapis.com/calendar/v3";

    /// Google consent page.
    pub const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";

    /// Google token endpoint.
    pub const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Creates a configuration with Google's public endpoints.
    pub fn new(credentials: OAuthClientCredentials) -> Self {
        Self {
            credentials,
            calendar_ids: vec!["primary".to_string()],
            redirect_uri: "http://127.0.0.1:8085/callback".to_string(),
            scopes: vec![
                Self::DEFAULT_SCOPE.to_string(),
                Self::CALENDAR_LIST_SCOPE.to_string(),
            ],
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            api_base: Self::API_BASE.to_string(),
            auth_url: Self::AUTH_URL.to_string(),
            token_url: Self::TOKEN_URL.to_string(),
        }
    }

    /// Builder: set the mirrored calendars.
    pub fn with_calendar_ids(mut self, ids: Vec<String>) -> Self {
        self.calendar_ids = ids;
        self
    }

    /// Builder: set the redirect URI.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Builder: set the requested scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Builder: set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: point API and token calls at another host (tests, proxies).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.token_url = token_url.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.credentials
            .validate()
            .map_err(|e| format!("invalid credentials: {}", e))?;
        if self.scopes.is_empty() {
            return Err("at least one OAuth scope is required".to_string());
        }
        if self.calendar_ids.is_empty() {
            return Err("at least one calendar id is required".to_string());
        }
        url::Url::parse(&self.redirect_uri)
            .map_err(|e| format!("invalid redirect_uri: {}", e))?;
        Ok(())
    }
}
