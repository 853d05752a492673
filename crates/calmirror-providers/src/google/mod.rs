//! Google Calendar provider implementation.
//!
//! [`GoogleProvider`] talks to Calendar API v3 and Google's OAuth 2.0 token
//! endpoint.
//!
//! # Authentication
//!
//! 1. The user registers their own OAuth client ID/secret (required by Google)
//! 2. [`GoogleProvider::begin_authorization`] returns a PKCE consent URL and
//!    the state the redirect must echo
//! 3. The user grants access and the redirect carries an authorization code
//! 4. [`CalendarProvider::exchange_code`](crate::CalendarProvider::exchange_code)
//!    trades the code for an access and refresh token
//! 5. Later calls refresh expired access tokens and report the rotated
//!    credential to the caller
//!
//! # Example
//!
//! ```ignore
//! use calmirror_providers::google::{GoogleConfig, GoogleProvider, OAuthClientCredentials};
//!
//! let credentials = OAuthClientCredentials::from_file("~/.config/calmirror/client.json")?;
//! let provider = GoogleProvider::new(GoogleConfig::new(credentials))?;
//! println!("open {}", provider.begin_authorization().url);
//! ```

mod client;
mod config;
mod oauth;
mod provider;

pub use client::GoogleCalendarClient;
pub use config::{GoogleConfig, OAuthClientCredentials};
pub use oauth::{ConsentRequest, OAuthClient, PkceFlow};
pub use provider::GoogleProvider;
