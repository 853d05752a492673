//! Credential rotation notifications.
//!
//! When a provider call returns rotated tokens, the new credential is stored
//! and announced so other sessions of the same user can adopt it instead of
//! replaying the old refresh token.

use calmirror_core::OAuthCredential;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered notifications per subscriber before lagging.
const ROTATION_CHANNEL_CAPACITY: usize = 16;

/// A credential was replaced by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialsRotated {
    /// Owner of the credential.
    pub user_id: String,
    /// The replacement credential.
    pub credential: OAuthCredential,
    /// Whether the replacement reached durable storage.
    pub persisted: bool,
    /// When the rotation was observed.
    pub at: DateTime<Utc>,
}

/// Fan-out of [`CredentialsRotated`] events.
#[derive(Debug, Clone)]
pub struct RotationNotifier {
    tx: broadcast::Sender<CredentialsRotated>,
}

impl Default for RotationNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ROTATION_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribes to future rotations.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialsRotated> {
        self.tx.subscribe()
    }

    /// Announces a rotation and returns the number of subscribers reached.
    pub fn notify(&self, user_id: &str, credential: OAuthCredential, persisted: bool) -> usize {
        let event = CredentialsRotated {
            user_id: user_id.to_string(),
            credential,
            persisted,
            at: Utc::now(),
        };
        // No subscribers is not an error.
        let reached = self.tx.send(event).unwrap_or(0);
        debug!(user_id, reached, persisted, "credential rotation announced");
        reached
    }
}
