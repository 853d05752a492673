//! Per-user credential persistence.
//!
//! Credentials live under `calmirror.oauth.<user_id>`. Older installs kept a
//! single record under `calmirror.oauth`; it is moved to the scoped key the
//! first time the user's credential is read.

use std::sync::Arc;
use std::time::Duration;

use calmirror_core::OAuthCredential;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::kv::KeyValueStore;

/// Key prefix for credential records.
pub const TOKEN_KEY_PREFIX: &str = "calmirror.oauth";

/// Key of the pre-scoping credential record.
pub const LEGACY_TOKEN_KEY: &str = TOKEN_KEY_PREFIX;

/// Returns the scoped key for `user_id`.
pub fn scoped_key(user_id: &str) -> String {
    format!("{}.{}", TOKEN_KEY_PREFIX, user_id)
}

/// Result of [`TokenStore::migrate_legacy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The legacy record moved to the scoped key.
    Migrated,
    /// A scoped record already existed; the legacy one was left alone.
    AlreadyScoped,
    /// No legacy record.
    NothingToMigrate,
    /// The legacy record was unreadable or invalid and was deleted.
    DiscardedInvalid,
}

/// Reads, validates and writes credentials on a [`KeyValueStore`].
///
/// None of the operations fail: storage problems are logged and reported
/// through the return value.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("attempts", &self.attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Creates a token store with default retry settings.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, &SyncConfig::default())
    }

    /// Creates a token store using the retry settings of `config`.
    pub fn with_config(store: Arc<dyn KeyValueStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            attempts: config.store_attempts.max(1),
            retry_delay: config.store_retry_delay,
        }
    }

    /// Persists `credential` for `user_id`.
    ///
    /// Each attempt is read back and compared; a mismatch counts as a failed
    /// attempt. Returns false for an invalid credential or once every attempt
    /// has failed, leaving any previous record in place.
    pub async fn store(&self, user_id: &str, credential: &OAuthCredential) -> bool {
        if !credential.has_valid_shape() {
            warn!(user_id, "refusing to store malformed credential");
            return false;
        }
        let serialized = match serde_json::to_string(credential) {
            Ok(s) => s,
            Err(e) => {
                warn!(user_id, error = %e, "failed to serialize credential");
                return false;
            }
        };
        let key = scoped_key(user_id);

        for attempt in 1..=self.attempts {
            match self.store.set(&key, &serialized) {
                Ok(()) if self.read_back(&key).as_ref() == Some(credential) => {
                    debug!(user_id, attempt, "credential stored");
                    return true;
                }
                Ok(()) => warn!(user_id, attempt, "credential read-back mismatch"),
                Err(e) => warn!(user_id, attempt, error = %e, "credential write failed"),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        warn!(user_id, attempts = self.attempts, "giving up storing credential");
        false
    }

    /// Returns the stored credential for `user_id`, if it is usable.
    ///
    /// Unparseable or malformed records are deleted.
    pub fn retrieve(&self, user_id: &str) -> Option<OAuthCredential> {
        self.migrate_legacy(user_id);

        let key = scoped_key(user_id);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(user_id, error = %e, "failed to read credential");
                return None;
            }
        };

        match parse_valid(&raw) {
            Some(credential) => Some(credential),
            None => {
                warn!(user_id, "discarding invalid stored credential");
                self.delete(&key);
                None
            }
        }
    }

    /// Moves the legacy record to the scoped key of `user_id`.
    ///
    /// Only happens when no scoped record exists. Running it again is a
    /// no-op.
    pub fn migrate_legacy(&self, user_id: &str) -> MigrationOutcome {
        let legacy = match self.store.get(LEGACY_TOKEN_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return MigrationOutcome::NothingToMigrate,
            Err(e) => {
                warn!(error = %e, "failed to read legacy credential");
                return MigrationOutcome::NothingToMigrate;
            }
        };

        let key = scoped_key(user_id);
        if matches!(self.store.get(&key), Ok(Some(_))) {
            return MigrationOutcome::AlreadyScoped;
        }

        if parse_valid(&legacy).is_none() {
            warn!("discarding invalid legacy credential");
            self.delete(LEGACY_TOKEN_KEY);
            return MigrationOutcome::DiscardedInvalid;
        }

        if let Err(e) = self.store.set(&key, &legacy) {
            warn!(user_id, error = %e, "failed to migrate legacy credential");
            return MigrationOutcome::NothingToMigrate;
        }
        self.delete(LEGACY_TOKEN_KEY);
        info!(user_id, "migrated legacy credential");
        MigrationOutcome::Migrated
    }

    /// Deletes every credential record of `user_id`, legacy included.
    ///
    /// Returns false if a delete failed.
    pub fn remove(&self, user_id: &str) -> bool {
        let scoped = self.delete(&scoped_key(user_id));
        let legacy = self.delete(LEGACY_TOKEN_KEY);
        debug!(user_id, "credential removed");
        scoped && legacy
    }

    /// Returns true if a credential with a valid shape is stored.
    ///
    /// Never contacts the provider.
    pub fn has_valid(&self, user_id: &str) -> bool {
        matches!(
            self.store.get(&scoped_key(user_id)),
            Ok(Some(raw)) if parse_valid(&raw).is_some()
        )
    }

    fn read_back(&self, key: &str) -> Option<OAuthCredential> {
        let raw = self.store.get(key).ok()??;
        serde_json::from_str(&raw).ok()
    }

    fn delete(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "failed to delete credential record");
                false
            }
        }
    }
}

fn parse_valid(raw: &str) -> Option<OAuthCredential> {
    serde_json::from_str::<OAuthCredential>(raw)
        .ok()
        .filter(OAuthCredential::has_valid_shape)
}
