//! Collaborators of the sync layer: the remote calendar and the consent flow.
//!
//! - [`CalendarProvider`] - list events and calendars, create events,
//!   exchange authorization codes
//! - [`OAuthFlow`] - take the user through consent and return a code
//! - [`ProviderError`] - failures as reported by the provider
//!
//! ```text
//! ┌─────────────────┐
//! │  Google API     │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐        ┌─────────────┐
//! │ GoogleProvider  │        │  OAuthFlow  │
//! └────────┬────────┘        └──────┬──────┘
//!          │ CalendarProvider       │ code
//!          └──────────┬─────────────┘
//!                     ▼
//!              ┌─────────────┐
//!              │ calmirror-  │
//!              │    sync     │
//!              └─────────────┘
//! ```

pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod provider;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult, mentions_reauth_marker};
pub use provider::{BoxFuture, CalendarProvider, OAuthFlow, ProviderReply};
