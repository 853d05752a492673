//! Synchronization and resilience layer for mirrored calendars.
//!
//! - [`TokenStore`] - per-user credential persistence with verified writes
//!   and legacy-key migration
//! - [`EventCache`] / [`CalendarCache`] - TTL caches that keep serving stale
//!   data
//! - [`FetchCoordinator`] - in-flight guard, rate-limit window, quota
//!   backoff and failure classification
//! - [`HealthMonitor`] - periodic probes and scheduled recovery
//! - [`CalendarSession`] - the surface an application binds to
//!
//! ```text
//!   CalendarSession ──► FetchCoordinator ──► CalendarProvider
//!         ▲                │        │
//!         │                ▼        ▼
//!   HealthMonitor     TokenStore  EventCache
//!                          │        │
//!                          └──┬─────┘
//!                             ▼
//!                       KeyValueStore
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod kv;
pub mod notify;
pub mod session;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CalendarCache, EventCache, ResourceCache};
pub use config::{HealthConfig, SyncConfig};
pub use coordinator::{FetchCoordinator, Fetched, Freshness, ResourceKind, SyncStatus};
pub use error::{FailureClass, SyncError, SyncResult};
pub use health::{HealthHandle, HealthMonitor, HealthState, HealthStatus};
pub use kv::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use notify::{CredentialsRotated, RotationNotifier};
pub use session::{CalendarSession, SessionSnapshot};
pub use tokens::{MigrationOutcome, TokenStore};
