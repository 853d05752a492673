//! Google Calendar provider implementation.
//!
//! This module implements the [`CalendarProvider`] trait for Google Calendar.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use calmirror_core::{CalendarEvent, CalendarInfo, NewEvent, OAuthCredential, TimeWindow};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::{BoxFuture, CalendarProvider, ProviderReply};

use super::client::GoogleCalendarClient;
use super::config::GoogleConfig;
use super::oauth::{ConsentRequest, OAuthClient, PkceFlow};

/// Google Calendar provider.
///
/// Stateless with respect to credentials: each call receives the current
/// credential. An expired access token is refreshed before the call and the
/// new credential comes back in [`ProviderReply::rotated`].
pub struct GoogleProvider {
    config: GoogleConfig,
    api_client: GoogleCalendarClient,
    oauth_client: OAuthClient,
    /// PKCE session of the last consent URL handed out.
    pending: Mutex<Option<PkceFlow>>,
}

impl GoogleProvider {
    /// Creates a new Google provider with the given configuration.
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        config.validate().map_err(ProviderError::config)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProviderError::config(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            api_client: GoogleCalendarClient::new(config.api_base.clone(), http_client.clone()),
            oauth_client: OAuthClient::new(config.clone(), http_client),
            config,
            pending: Mutex::new(None),
        })
    }

    /// Returns the provider configuration.
    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Starts a consent session.
    ///
    /// The PKCE verifier is kept until the next [`exchange_code`] call. A
    /// redirect belongs to this session only if it echoes the returned state.
    ///
    /// [`exchange_code`]: CalendarProvider::exchange_code
    pub fn begin_authorization(&self) -> ConsentRequest {
        let pkce = PkceFlow::new();
        let request = ConsentRequest {
            url: self.oauth_client.authorization_url(&pkce),
            state: pkce.state.clone(),
        };
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(pkce);
        info!("consent session started");
        request
    }

    /// Runs `call` with a usable access token.
    ///
    /// Refreshes first if the token is expired, and once more if the API
    /// rejects a token it had not refreshed yet.
    async fn authorized<T, F, Fut>(
        &self,
        credential: &OAuthCredential,
        call: F,
    ) -> ProviderResult<ProviderReply<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut current = credential.clone();
        let mut rotated = false;

        if current.is_expired() {
            if !current.can_refresh() {
                return Err(ProviderError::reauth_required(
                    "access token expired and no refresh token is available",
                )
                .with_provider("google"));
            }
            debug!("refreshing expired access token");
            current = self.oauth_client.refresh(&current).await?;
            rotated = true;
        }

        let data = match call(current.access_token.clone()).await {
            Ok(data) => data,
            Err(e)
                if e.code() == ProviderErrorCode::Unauthorized
                    && !rotated
                    && current.can_refresh() =>
            {
                debug!("access token rejected, refreshing once");
                current = self.oauth_client.refresh(&current).await?;
                rotated = true;
                call(current.access_token.clone()).await?
            }
            Err(e) => return Err(e),
        };

        let reply = ProviderReply::new(data);
        Ok(if rotated {
            reply.with_rotated(current)
        } else {
            reply
        })
    }
}

impl CalendarProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn list_events<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarEvent>>>> {
        Box::pin(async move {
            self.authorized(credential, |token| async move {
                let mut events = Vec::new();
                for calendar_id in &self.config.calendar_ids {
                    events.extend(
                        self.api_client
                            .list_events(&token, calendar_id, window)
                            .await?,
                    );
                }
                events.sort_by(|a, b| a.start.cmp(&b.start));
                Ok(events)
            })
            .await
        })
    }

    fn list_calendars<'a>(
        &'a self,
        credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarInfo>>>> {
        Box::pin(async move {
            self.authorized(credential, |token| async move {
                self.api_client.list_calendars(&token).await
            })
            .await
        })
    }

    fn create_event<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        draft: &'a NewEvent,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<CalendarEvent>>> {
        Box::pin(async move {
            self.authorized(credential, |token| async move {
                self.api_client.insert_event(&token, draft).await
            })
            .await
        })
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, ProviderResult<OAuthCredential>> {
        Box::pin(async move {
            let verifier = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .map(|pkce| pkce.verifier);
            self.oauth_client
                .exchange_code(code, verifier.as_deref())
                .await
        })
    }
}
