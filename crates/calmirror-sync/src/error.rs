//! Sync error types and provider failure classification.

use calmirror_providers::{ProviderError, ProviderErrorCode};
use thiserror::Error;

use crate::kv::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the sync layer.
///
/// Provider failures are normalized into these variants at the coordinator
/// boundary, so consumers never see a raw [`ProviderError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No usable credential is stored for this session.
    #[error("not connected to a calendar")]
    NoCredential,

    /// The provider kept rejecting calls for quota reasons.
    #[error("calendar quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// The credential was rejected; a new consent round-trip is needed.
    #[error("calendar authorization expired, reconnect required")]
    ReauthRequired,

    /// Network or unknown provider failure, with the provider's message.
    #[error("{message}")]
    Network { message: String },

    /// Credential or cache storage failed.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Invalid configuration or input.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl SyncError {
    /// Creates a quota error.
    pub fn quota(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if the user must (re)connect before data can flow.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::NoCredential | Self::ReauthRequired)
    }

    /// Short message suitable for a banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoCredential => "Connect your calendar to see events.".to_string(),
            Self::QuotaExceeded { .. } => {
                "Calendar is busy right now; showing saved events.".to_string()
            }
            Self::ReauthRequired => "Calendar access expired. Please reconnect.".to_string(),
            Self::Network { message } => format!("Could not reach the calendar: {}", message),
            Self::Storage { .. } => "Could not save calendar data on this device.".to_string(),
            Self::Config { message } => message.clone(),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        Self::storage(e.to_string())
    }
}

/// How a provider failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retried with exponential backoff.
    Quota,
    /// Credential is dead: removed, never retried.
    AuthExpired,
    /// Single attempt, falls back to cache.
    NetworkOrUnknown,
}

impl FailureClass {
    /// Classifies a provider failure.
    pub fn of(error: &ProviderError) -> Self {
        if error.is_rate_limited() {
            Self::Quota
        } else if error.requires_reauth()
            || error.code() == ProviderErrorCode::Unauthorized
        {
            Self::AuthExpired
        } else {
            Self::NetworkOrUnknown
        }
    }
}
