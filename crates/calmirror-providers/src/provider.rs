//! Collaborator traits for the remote calendar and the consent flow.
//!
//! The sync layer treats the provider as opaque: it issues one of the
//! logical actions below and receives either data or a [`ProviderError`].
//! Wire formats stay inside implementations such as the Google provider.

use std::future::Future;
use std::pin::Pin;

use calmirror_core::{CalendarEvent, CalendarInfo, NewEvent, OAuthCredential, TimeWindow};

use crate::error::ProviderResult;

/// A boxed future for async trait methods.
///
/// Boxed futures keep the traits object-safe so the sync layer can hold
/// `Arc<dyn CalendarProvider>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Successful provider reply.
///
/// Providers that refresh an expired access token on the fly return the new
/// credential in `rotated`; the caller persists it and tells its siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply<T> {
    /// The payload of the call.
    pub data: T,
    /// Replacement credential, if the provider rotated tokens.
    pub rotated: Option<OAuthCredential>,
}

impl<T> ProviderReply<T> {
    /// Reply without rotated tokens.
    pub fn new(data: T) -> Self {
        Self {
            data,
            rotated: None,
        }
    }

    /// Builder: attach a rotated credential.
    pub fn with_rotated(mut self, credential: OAuthCredential) -> Self {
        self.rotated = Some(credential);
        self
    }

    /// Maps the payload, keeping rotation info.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProviderReply<U> {
        ProviderReply {
            data: f(self.data),
            rotated: self.rotated,
        }
    }
}

/// The remote calendar provider.
///
/// Every authenticated action receives the credential explicitly; providers
/// never read credential storage themselves.
pub trait CalendarProvider: Send + Sync {
    /// Returns the name of this provider (e.g. `"google"`).
    fn name(&self) -> &str;

    /// Lists events overlapping `window`.
    fn list_events<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarEvent>>>>;

    /// Lists the calendars visible to the user.
    fn list_calendars<'a>(
        &'a self,
        credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarInfo>>>>;

    /// Creates an event and returns it as stored by the provider.
    fn create_event<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        draft: &'a NewEvent,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<CalendarEvent>>>;

    /// Exchanges an authorization code for a credential.
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, ProviderResult<OAuthCredential>>;

    /// Issues one lightweight authenticated call.
    ///
    /// Defaults to listing calendars and discarding the result.
    fn probe<'a>(
        &'a self,
        credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<()>>> {
        Box::pin(async move {
            self.list_calendars(credential)
                .await
                .map(|reply| reply.map(|_| ()))
        })
    }
}

/// The consent round-trip.
///
/// Implementations take the user through the provider's consent screen and
/// return the authorization code; the redirect mechanics are theirs.
pub trait OAuthFlow: Send + Sync {
    /// Runs the consent round-trip and returns an authorization code.
    fn authorize(&self) -> BoxFuture<'_, ProviderResult<String>>;
}
