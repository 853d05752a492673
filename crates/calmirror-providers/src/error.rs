//! Failures reported by calendar providers.
//!
//! A [`ProviderError`] says which side of the exchange failed and keeps
//! Google's own wording in `message`. Whether a failure is retried is decided
//! by the sync layer; the one judgement made here is [`requires_reauth`],
//! for credentials that no refresh can bring back.
//!
//! [`requires_reauth`]: ProviderError::requires_reauth

use std::fmt;
use thiserror::Error;

/// OAuth error codes meaning the grant is gone for good.
const REAUTH_MARKERS: &[&str] = &["invalid_grant", "invalid_token", "unauthorized_client"];

/// Where a provider call went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// The access token was refused (HTTP 401, failed refresh).
    Unauthorized,
    /// The token is accepted but may not touch this calendar (HTTP 403).
    Forbidden,
    /// No HTTP answer at all.
    Network,
    /// Quota or rate limit hit (HTTP 429, `rateLimitExceeded`, `quotaExceeded`).
    RateLimited,
    /// HTTP 5xx.
    Server,
    /// The answer did not decode.
    InvalidResponse,
    /// Any other 4xx, unknown calendars included.
    Rejected,
    /// Client credentials or endpoints are unusable.
    Config,
    /// Failed before reaching Google, e.g. reading a pasted code.
    Local,
}

impl ProviderErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::InvalidResponse => "invalid_response",
            Self::Rejected => "rejected",
            Self::Config => "config",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider call.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    provider: Option<String>,
    requires_reauth: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            requires_reauth: false,
            source: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Forbidden, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Network, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Server, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Rejected, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Config, message)
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Local, message)
    }

    /// A refused token that only a new consent round can replace.
    pub fn reauth_required(message: impl Into<String>) -> Self {
        Self::unauthorized(message).with_reauth()
    }

    pub fn with_reauth(mut self) -> Self {
        self.requires_reauth = true;
        self
    }

    /// Tags the error with the provider that raised it.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    /// Google's wording, passed through untouched.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// True if the stored credential is dead: flagged via
    /// [`with_reauth`](Self::with_reauth), or an OAuth marker such as
    /// `invalid_grant` appears in the message.
    pub fn requires_reauth(&self) -> bool {
        self.requires_reauth || mentions_reauth_marker(&self.message)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ProviderErrorCode::RateLimited
    }
}

/// True if `text` carries one of the OAuth codes for a revoked grant.
pub fn mentions_reauth_marker(text: &str) -> bool {
    REAUTH_MARKERS.iter().any(|marker| text.contains(marker))
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(ref provider) => write!(f, "{} {}: {}", provider, self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
