//! OAuth 2.0 token endpoint calls and PKCE helpers for Google.
//!
//! The consent page itself is driven by an [`OAuthFlow`](crate::OAuthFlow)
//! implementation; this module builds its URL and turns the returned code,
//! or a stored refresh token, into an [`OAuthCredential`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use calmirror_core::OAuthCredential;
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult, mentions_reauth_marker};

use super::config::GoogleConfig;

/// The PKCE code verifier length (in bytes, before base64 encoding).
const CODE_VERIFIER_LENGTH: usize = 32;

/// Token endpoint client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: GoogleConfig,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a token endpoint client sharing `http_client`.
    pub fn new(config: GoogleConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Builds the consent URL for `pkce`.
    pub fn authorization_url(&self, pkce: &PkceFlow) -> String {
        pkce.build_auth_url(
            &self.config.auth_url,
            &self.config.credentials.client_id,
            &self.config.redirect_uri,
            &self.config.scopes,
        )
    }

    /// Exchanges an authorization code for a credential.
    ///
    /// `verifier` is the PKCE verifier of the session that produced the
    /// consent URL, when there was one.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: Option<&str>,
    ) -> ProviderResult<OAuthCredential> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ProviderError::rejected("authorization code is empty"));
        }

        let mut params = vec![
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(verifier) = verifier {
            params.push(("code_verifier", verifier));
        }

        let response = self.post_token(&params, "token exchange").await?;
        info!("obtained tokens from authorization code");
        Ok(response.into_credential(None, &self.config.scopes))
    }

    /// Trades the refresh token of `credential` for a new access token.
    ///
    /// Google usually omits the refresh token on refresh; the existing one is
    /// carried over in that case.
    pub async fn refresh(&self, credential: &OAuthCredential) -> ProviderResult<OAuthCredential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::reauth_required("no refresh token available"))?;

        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self.post_token(&params, "token refresh").await?;
        info!("refreshed access token");
        let scopes: Vec<String> = credential.scopes().into_iter().map(String::from).collect();
        Ok(response.into_credential(Some(refresh_token), &scopes))
    }

    async fn post_token(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> ProviderResult<TokenResponse> {
        debug!(url = %self.config.token_url, "{} request", what);
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                ProviderError::network(format!("{} request failed: {}", what, e)).with_source(e)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(token_error(what, status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::invalid_response(format!("invalid token response: {}", e)))
    }
}

/// Maps a token endpoint failure.
///
/// A revoked grant can never succeed again, so it is flagged for re-consent.
fn token_error(what: &str, status: reqwest::StatusCode, body: &str) -> ProviderError {
    let parsed: Option<TokenErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().map(|b| b.error.as_str()).unwrap_or_default();
    let message = format!("{} failed ({}): {}", what, status, body);

    if mentions_reauth_marker(code) {
        warn!(error = code, "grant rejected, re-consent needed");
        return ProviderError::reauth_required(message).with_provider("google");
    }
    if status.is_server_error() {
        return ProviderError::server(message).with_provider("google");
    }
    ProviderError::unauthorized(message).with_provider("google")
}

/// What the user needs to finish a consent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    /// Consent page to open in a browser.
    pub url: String,
    /// Value the redirect must carry back in its `state` parameter.
    pub state: String,
}

/// PKCE flow state and utilities (RFC 7636).
#[derive(Debug, Clone)]
pub struct PkceFlow {
    /// The code verifier (high-entropy random string).
    pub verifier: String,
    /// The code challenge (SHA-256 hash of verifier, base64url encoded).
    pub challenge: String,
    /// Random state for CSRF protection.
    pub state: String,
}

impl PkceFlow {
    /// Creates a new PKCE flow with random verifier and state.
    pub fn new() -> Self {
        let verifier = Self::generate_verifier();
        let challenge = Self::compute_challenge(&verifier);
        let state = Self::generate_state();

        Self {
            verifier,
            challenge,
            state,
        }
    }

    fn generate_verifier() -> String {
        let mut rng = rand::rng();
        let bytes: Vec<u8> = (0..CODE_VERIFIER_LENGTH).map(|_| rng.random()).collect();
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    fn compute_challenge(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    fn generate_state() -> String {
        let mut rng = rand::rng();
        let bytes: Vec<u8> = (0..16).map(|_| rng.random()).collect();
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    /// Builds the consent URL.
    pub fn build_auth_url(
        &self,
        auth_url: &str,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String {
        let scope = scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&self.challenge),
            urlencoding::encode(&self.state),
        )
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, previous_refresh: Option<&str>, scopes: &[String]) -> OAuthCredential {
        let mut credential = OAuthCredential::new(self.access_token)
            .with_scope(self.scope.unwrap_or_else(|| scopes.join(" ")));
        if let Some(token_type) = self.token_type {
            credential.token_type = token_type;
        }
        if let Some(refresh) = self.refresh_token.as_deref().or(previous_refresh) {
            credential = credential.with_refresh_token(refresh);
        }
        if let Some(secs) = self.expires_in {
            credential = credential.expires_in(secs);
        }
        credential
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::config::OAuthClientCredentials;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OAuthClient {
        let config = GoogleConfig::new(OAuthClientCredentials::new(
            "bookings.apps.googleusercontent.com",
            "secret",
        ))
        .with_endpoints(server.uri(), format!("{}/token", server.uri()));
        OAuthClient::new(config, reqwest::Client::new())
    }

    #[test]
    fn pkce_verifier_length() {
        let flow = PkceFlow::new();
        // 32 bytes base64url without padding
        assert_eq!(flow.verifier.len(), 43);
    }

    #[test]
    fn pkce_challenge_is_deterministic() {
        let a = PkceFlow::compute_challenge("test-verifier-string");
        let b = PkceFlow::compute_challenge("test-verifier-string");
        assert_eq!(a, b);
        assert_ne!(PkceFlow::new().state, PkceFlow::new().state);
    }

    #[test]
    fn auth_url_format() {
        let flow = PkceFlow::new();
        let url = flow.build_auth_url(
            GoogleConfig::AUTH_URL,
            "test-client.apps.googleusercontent.com",
            "http://127.0.0.1:8080/callback",
            &[GoogleConfig::DEFAULT_SCOPE.to_string()],
        );

        assert!(url.starts_with(GoogleConfig::AUTH_URL));
        assert!(url.contains("client_id="));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[tokio::test]
    async fn exchange_code_builds_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=verifier-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh-access-token",
                "refresh_token": "1//refresh",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = client_for(&server)
            .exchange_code("4/code", Some("verifier-1"))
            .await
            .unwrap();
        assert_eq!(cred.access_token, "ya29.fresh-access-token");
        assert_eq!(cred.refresh_token.as_deref(), Some("1//refresh"));
        assert!(cred.expiry.is_some());
        assert!(!cred.is_expired());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_locally() {
        let server = MockServer::start().await;
        let err = client_for(&server).exchange_code("  ", None).await.unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::Rejected);
    }

    #[tokio::test]
    async fn refresh_keeps_existing_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.rotated-access-token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let old = OAuthCredential::new("ya29.old-access-token-00")
            .with_refresh_token("1//keep-me")
            .expires_in(-10);
        let new = client_for(&server).refresh(&old).await.unwrap();
        assert_eq!(new.access_token, "ya29.rotated-access-token");
        assert_eq!(new.refresh_token.as_deref(), Some("1//keep-me"));
    }

    #[tokio::test]
    async fn revoked_grant_requires_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let old = OAuthCredential::new("ya29.old-access-token-00").with_refresh_token("1//gone");
        let err = client_for(&server).refresh(&old).await.unwrap_err();
        assert!(err.requires_reauth());
        assert_eq!(err.provider(), Some("google"));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_requires_reauth() {
        let server = MockServer::start().await;
        let cred = OAuthCredential::new("ya29.old-access-token-00");
        let err = client_for(&server).refresh(&cred).await.unwrap_err();
        assert!(err.requires_reauth());
    }
}
