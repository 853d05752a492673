//! OAuth credential type.
//!
//! An [`OAuthCredential`] is the unit the token store persists per user. It is
//! replaced wholesale whenever the provider rotates tokens, so the type is a
//! plain value with structural equality.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minimum plausible length of an access token.
///
/// Real provider tokens are far longer; anything shorter is treated as
/// corrupt storage rather than a usable credential.
pub const MIN_ACCESS_TOKEN_LEN: usize = 16;

/// Clock skew applied when deciding whether a credential has expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth credential for one user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredential {
    /// Short-lived bearer token sent with every API call.
    pub access_token: String,

    /// Longer-lived token used to obtain a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type reported by the provider (normally `Bearer`).
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Space separated scopes granted to the token.
    #[serde(default)]
    pub scope: String,

    /// When the access token stops being accepted, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthCredential {
    /// Creates a bearer credential with no refresh token and no expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            scope: String::new(),
            expiry: None,
        }
    }

    /// Builder: set the refresh token.
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Builder: set the granted scope string.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Builder: set the expiry relative to now.
    pub fn expires_in(mut self, secs: i64) -> Self {
        self.expiry = Some(Utc::now() + Duration::seconds(secs));
        self
    }

    /// Builder: set an absolute expiry.
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Returns true if the access token looks usable.
    ///
    /// This is a shape check only; it never contacts the provider.
    pub fn has_valid_shape(&self) -> bool {
        let token = self.access_token.trim();
        !token.is_empty() && token.len() >= MIN_ACCESS_TOKEN_LEN
    }

    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    /// Returns true if a refresh token is available.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Returns the granted scopes as a list.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }
}
