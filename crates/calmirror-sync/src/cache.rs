//! Fetched-data cache with TTL and stale reads.
//!
//! A [`ResourceCache`] holds the last successfully fetched set of one
//! resource kind. Data older than the TTL is stale but still served when
//! nothing fresher is available.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use calmirror_core::{CalendarEvent, CalendarInfo};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::kv::KeyValueStore;

/// Cache of mirrored events.
pub type EventCache = ResourceCache<CalendarEvent>;

/// Cache of the user's calendar list.
pub type CalendarCache = ResourceCache<CalendarInfo>;

/// Key under which event snapshots are persisted.
pub const EVENTS_SNAPSHOT_KEY: &str = "calmirror.cache.events";

/// Key under which calendar-list snapshots are persisted.
pub const CALENDARS_SNAPSHOT_KEY: &str = "calmirror.cache.calendars";

#[derive(Debug, Clone)]
struct CachedSet<T> {
    items: Vec<T>,
    /// Monotonic time the set entered this process.
    fetched_at: Instant,
    /// Age the set already had at that point (snapshots).
    age_offset: Duration,
    /// Wall-clock time of the fetch, for display and snapshots.
    fetched_wall: DateTime<Utc>,
}

impl<T> CachedSet<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items,
            fetched_at: Instant::now(),
            age_offset: Duration::ZERO,
            fetched_wall: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        self.fetched_at.elapsed() + self.age_offset
    }
}

/// On-disk snapshot format.
#[derive(Serialize, Deserialize)]
struct Snapshot<T> {
    items: Vec<T>,
    fetched_at: DateTime<Utc>,
}

struct Persistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

/// TTL cache for one resource kind.
pub struct ResourceCache<T> {
    ttl: Duration,
    entry: RwLock<Option<CachedSet<T>>>,
    persistence: Option<Persistence>,
}

impl<T> std::fmt::Debug for ResourceCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("ttl", &self.ttl)
            .field(
                "persisted_as",
                &self.persistence.as_ref().map(|p| p.key.as_str()),
            )
            .finish_non_exhaustive()
    }
}

impl<T> ResourceCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Creates an empty in-memory cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
            persistence: None,
        }
    }

    /// Creates a cache that snapshots to `store` under `key`.
    ///
    /// The last snapshot, if readable, is loaded with its original age.
    pub fn with_persistence(
        ttl: Duration,
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let entry = load_snapshot(store.as_ref(), &key);
        if let Some(ref set) = entry {
            debug!(key = %key, items = set.items.len(), "loaded cache snapshot");
        }
        Self {
            ttl,
            entry: RwLock::new(entry),
            persistence: Some(Persistence { store, key }),
        }
    }

    /// Returns the TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached items if they are still fresh.
    pub fn get(&self) -> Option<Vec<T>> {
        let entry = self.read();
        entry
            .as_ref()
            .filter(|set| set.age() < self.ttl)
            .map(|set| set.items.clone())
    }

    /// Returns the cached items regardless of age.
    pub fn get_stale(&self) -> Option<Vec<T>> {
        self.read().as_ref().map(|set| set.items.clone())
    }

    /// Returns true if data is cached and younger than the TTL.
    pub fn is_valid(&self) -> bool {
        self.read()
            .as_ref()
            .is_some_and(|set| set.age() < self.ttl)
    }

    /// Replaces the cached set and resets its age.
    pub fn store(&self, items: Vec<T>) {
        let set = CachedSet::new(items);
        self.persist(&set);
        let count = set.items.len();
        *self.write() = Some(set);
        trace!(count, "cache stored");
    }

    /// Adds one item without changing the age of the set.
    ///
    /// With nothing cached yet the item is dropped: the next fetch brings it
    /// in, and an empty cache must not turn fresh without a fetch.
    /// Returns true if the item was added.
    pub fn append(&self, item: T) -> bool {
        let mut entry = self.write();
        let Some(set) = entry.as_mut() else {
            trace!("nothing cached, append skipped");
            return false;
        };
        set.items.push(item);
        self.persist(set);
        true
    }

    /// Age of the cached set.
    pub fn age(&self) -> Option<Duration> {
        self.read().as_ref().map(CachedSet::age)
    }

    /// Wall-clock time of the last fetch.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.read().as_ref().map(|set| set.fetched_wall)
    }

    /// Drops the cached set and its snapshot.
    pub fn clear(&self) {
        *self.write() = None;
        if let Some(ref p) = self.persistence
            && let Err(e) = p.store.remove(&p.key)
        {
            warn!(key = %p.key, error = %e, "failed to remove cache snapshot");
        }
        debug!("cache cleared");
    }

    fn persist(&self, set: &CachedSet<T>) {
        let Some(ref p) = self.persistence else {
            return;
        };
        let snapshot = Snapshot {
            items: set.items.clone(),
            fetched_at: set.fetched_wall,
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|json| p.store.set(&p.key, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            // The in-memory copy stays authoritative.
            warn!(key = %p.key, error = %e, "failed to persist cache snapshot");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<CachedSet<T>>> {
        self.entry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<CachedSet<T>>> {
        self.entry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_snapshot<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<CachedSet<T>> {
    let raw = match store.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(key, error = %e, "failed to read cache snapshot");
            return None;
        }
    };
    let snapshot: Snapshot<T> = match serde_json::from_str(&raw) {
        Ok(s) => s,
        Err(e) => {
            warn!(key, error = %e, "ignoring unreadable cache snapshot");
            return None;
        }
    };

    let wall_age = (Utc::now() - snapshot.fetched_at)
        .to_std()
        .unwrap_or_default();
    Some(CachedSet {
        items: snapshot.items,
        fetched_at: Instant::now(),
        age_offset: wall_age,
        fetched_wall: snapshot.fetched_at,
    })
}
