//! Fetch coordination: cache first, one network call at a time, bounded retry.
//!
//! Every read of mirrored data goes through [`FetchCoordinator`]. For each
//! resource kind it
//!
//! - serves fresh cache without touching the network,
//! - serves stale cache immediately and refreshes in the background, forced
//!   or not,
//! - allows at most one network fetch at a time and spaces unforced fetches
//!   by a rate-limit window,
//! - retries quota failures with exponential backoff, drops the credential
//!   on authorization failures and falls back to cache on anything else.
//!
//! Provider errors never leave this module: they are normalized into
//! [`SyncError`].
//!
//! [`FetchCoordinator::clear`] starts a new session epoch. Replies to calls
//! issued in an earlier epoch are discarded, so a disconnect cannot be undone
//! by a fetch that was already running.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use calmirror_core::{CalendarEvent, CalendarInfo, NewEvent, OAuthCredential};
use calmirror_providers::{BoxFuture, CalendarProvider, ProviderError, ProviderReply, ProviderResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cache::{
    CALENDARS_SNAPSHOT_KEY, CalendarCache, EVENTS_SNAPSHOT_KEY, EventCache, ResourceCache,
};
use crate::config::SyncConfig;
use crate::error::{FailureClass, SyncError, SyncResult};
use crate::kv::KeyValueStore;
use crate::notify::{CredentialsRotated, RotationNotifier};
use crate::tokens::TokenStore;

/// Kinds of mirrored resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Calendar events.
    Events,
    /// The calendar list.
    Calendars,
}

impl ResourceKind {
    /// Returns a stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Calendars => "calendars",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fetched from the provider by this call.
    Network,
    /// Served from cache younger than the TTL.
    Cached,
    /// Served from cache older than the TTL, or nothing cached at all.
    Stale,
}

/// Result of a fetch.
#[derive(Debug)]
pub struct Fetched<T> {
    /// The data, possibly empty.
    pub items: Vec<T>,
    /// Where the data came from.
    pub freshness: Freshness,
    /// Non-blocking problem to show next to the data.
    pub warning: Option<SyncError>,
    /// Background refresh started by this call, if any.
    pub refresh: Option<JoinHandle<()>>,
}

impl<T> Fetched<T> {
    fn network(items: Vec<T>) -> Self {
        Self {
            items,
            freshness: Freshness::Network,
            warning: None,
            refresh: None,
        }
    }

    fn from_cache(items: Vec<T>, fresh: bool) -> Self {
        Self {
            items,
            freshness: if fresh {
                Freshness::Cached
            } else {
                Freshness::Stale
            },
            warning: None,
            refresh: None,
        }
    }

    fn with_warning(mut self, warning: SyncError) -> Self {
        self.warning = Some(warning);
        self
    }
}

/// Per-kind fetch bookkeeping. Lives for the process only.
#[derive(Debug, Default)]
struct FetchState {
    in_flight: bool,
    last_attempt_at: Option<Instant>,
    retry_count: u32,
}

/// Outcome of the admission check.
enum Gate<'a> {
    Proceed(InFlight<'a>),
    InFlight,
    RateLimited,
}

/// Clears `in_flight` when the fetch ends, however it ends.
struct InFlight<'a> {
    state: &'a Mutex<FetchState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.state).in_flight = false;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Lane<T> {
    cache: ResourceCache<T>,
    state: Mutex<FetchState>,
}

impl<T> Lane<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn new(cache: ResourceCache<T>) -> Self {
        Self {
            cache,
            state: Mutex::new(FetchState::default()),
        }
    }

    /// Checks the in-flight flag and rate-limit window and claims the lane,
    /// all under one lock.
    fn admit(&self, force: bool, window: Duration) -> Gate<'_> {
        let mut state = lock(&self.state);
        if state.in_flight {
            return Gate::InFlight;
        }
        if !force
            && let Some(last) = state.last_attempt_at
            && last.elapsed() < window
        {
            return Gate::RateLimited;
        }
        state.in_flight = true;
        state.last_attempt_at = Some(Instant::now());
        Gate::Proceed(InFlight { state: &self.state })
    }

    /// Counts a quota retry and stamps the attempt.
    fn begin_retry(&self) -> u32 {
        let mut state = lock(&self.state);
        let retry = state.retry_count;
        state.retry_count += 1;
        state.last_attempt_at = Some(Instant::now());
        retry
    }

    fn retry_count(&self) -> u32 {
        lock(&self.state).retry_count
    }

    fn reset_retries(&self) {
        lock(&self.state).retry_count = 0;
    }

    fn in_flight(&self) -> bool {
        lock(&self.state).in_flight
    }

    fn current(&self) -> Fetched<T> {
        Fetched::from_cache(
            self.cache.get_stale().unwrap_or_default(),
            self.cache.is_valid(),
        )
    }
}

#[derive(Debug, Default)]
struct Status {
    connected: bool,
    connection_error: Option<SyncError>,
    events_error: Option<SyncError>,
    calendars_error: Option<SyncError>,
    last_refresh: Option<DateTime<Utc>>,
}

impl Status {
    fn fetch_error_mut(&mut self, kind: ResourceKind) -> &mut Option<SyncError> {
        match kind {
            ResourceKind::Events => &mut self.events_error,
            ResourceKind::Calendars => &mut self.calendars_error,
        }
    }
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// A usable credential is believed to exist.
    pub connected: bool,
    /// An events fetch is running.
    pub events_in_flight: bool,
    /// A calendar-list fetch is running.
    pub calendars_in_flight: bool,
    /// Quota retries of the current events cycle.
    pub events_retry_count: u32,
    /// Quota retries of the current calendar-list cycle.
    pub calendars_retry_count: u32,
    /// Last connection problem (missing or rejected credential).
    pub connection_error: Option<SyncError>,
    /// Last fetch problem, events first.
    pub fetch_error: Option<SyncError>,
    /// Time of the last successful network fetch.
    pub last_refresh: Option<DateTime<Utc>>,
}

struct Inner {
    user_id: String,
    provider: Arc<dyn CalendarProvider>,
    tokens: TokenStore,
    config: SyncConfig,
    events: Lane<CalendarEvent>,
    calendars: Lane<CalendarInfo>,
    status: RwLock<Status>,
    rotations: RotationNotifier,
    epoch: AtomicU64,
}

impl Inner {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Returns false once `clear` has run since `epoch` was read.
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    fn update_status(&self, f: impl FnOnce(&mut Status)) {
        f(&mut self.status.write().unwrap_or_else(PoisonError::into_inner));
    }

    fn record_success(&self, kind: ResourceKind) {
        self.update_status(|s| {
            s.connected = true;
            s.connection_error = None;
            *s.fetch_error_mut(kind) = None;
            s.last_refresh = Some(Utc::now());
        });
    }

    fn record_fetch_error(&self, kind: ResourceKind, error: &SyncError) {
        let error = error.clone();
        self.update_status(|s| *s.fetch_error_mut(kind) = Some(error));
    }

    fn mark_disconnected(&self, reason: Option<SyncError>) {
        self.update_status(|s| {
            s.connected = false;
            s.connection_error = reason;
        });
    }

    /// Drops the rejected credential and flags the session for re-consent.
    fn invalidate_credential(&self, kind: &str, error: &ProviderError) -> SyncError {
        warn!(kind, error = %error, "credential rejected, disconnecting");
        self.tokens.remove(&self.user_id);
        self.mark_disconnected(Some(SyncError::ReauthRequired));
        SyncError::ReauthRequired
    }

    async fn adopt_rotated(&self, rotated: Option<OAuthCredential>) {
        let Some(credential) = rotated else {
            return;
        };
        let persisted = self.tokens.store(&self.user_id, &credential).await;
        if !persisted {
            warn!("rotated credential could not be persisted");
        }
        self.rotations.notify(&self.user_id, credential, persisted);
    }
}

/// Resource kinds as types, so one fetch routine serves both caches.
trait LaneKind: Send + Sync + 'static {
    type Item: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;
    const KIND: ResourceKind;

    fn lane(inner: &Inner) -> &Lane<Self::Item>;

    fn call<'a>(
        inner: &'a Inner,
        credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<Self::Item>>>>;
}

struct EventsLane;

impl LaneKind for EventsLane {
    type Item = CalendarEvent;
    const KIND: ResourceKind = ResourceKind::Events;

    fn lane(inner: &Inner) -> &Lane<CalendarEvent> {
        &inner.events
    }

    fn call<'a>(
        inner: &'a Inner,
        credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarEvent>>>> {
        let window = inner.config.event_window(Utc::now());
        inner.provider.list_events(credential, window)
    }
}

struct CalendarsLane;

impl LaneKind for CalendarsLane {
    type Item = CalendarInfo;
    const KIND: ResourceKind = ResourceKind::Calendars;

    fn lane(inner: &Inner) -> &Lane<CalendarInfo> {
        &inner.calendars
    }

    fn call<'a>(
        inner: &'a Inner,
        credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarInfo>>>> {
        inner.provider.list_calendars(credential)
    }
}

/// Cache-aware, rate-limited access to the provider for one user.
///
/// Cloning is cheap; clones share caches and fetch state.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("user_id", &self.inner.user_id)
            .field("provider", &self.inner.provider.name())
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator with in-memory caches.
    pub fn new(
        user_id: impl Into<String>,
        provider: Arc<dyn CalendarProvider>,
        tokens: TokenStore,
        config: SyncConfig,
    ) -> Self {
        let events = EventCache::new(config.cache_ttl);
        let calendars = CalendarCache::new(config.cache_ttl);
        Self::with_caches(user_id, provider, tokens, config, events, calendars)
    }

    /// Creates a coordinator whose credentials and cache snapshots share
    /// `store`.
    pub fn with_store(
        user_id: impl Into<String>,
        provider: Arc<dyn CalendarProvider>,
        store: Arc<dyn KeyValueStore>,
        config: SyncConfig,
    ) -> Self {
        let tokens = TokenStore::with_config(store.clone(), &config);
        let events =
            EventCache::with_persistence(config.cache_ttl, store.clone(), EVENTS_SNAPSHOT_KEY);
        let calendars =
            CalendarCache::with_persistence(config.cache_ttl, store, CALENDARS_SNAPSHOT_KEY);
        Self::with_caches(user_id, provider, tokens, config, events, calendars)
    }

    fn with_caches(
        user_id: impl Into<String>,
        provider: Arc<dyn CalendarProvider>,
        tokens: TokenStore,
        config: SyncConfig,
        events: EventCache,
        calendars: CalendarCache,
    ) -> Self {
        let user_id = user_id.into();
        let connected = tokens.retrieve(&user_id).is_some();
        Self {
            inner: Arc::new(Inner {
                user_id,
                provider,
                tokens,
                config,
                events: Lane::new(events),
                calendars: Lane::new(calendars),
                status: RwLock::new(Status {
                    connected,
                    ..Status::default()
                }),
                rotations: RotationNotifier::new(),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the user this coordinator fetches for.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the provider.
    pub fn provider(&self) -> &Arc<dyn CalendarProvider> {
        &self.inner.provider
    }

    /// Returns the token store.
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Returns the event cache.
    pub fn events_cache(&self) -> &EventCache {
        &self.inner.events.cache
    }

    /// Returns the calendar-list cache.
    pub fn calendars_cache(&self) -> &CalendarCache {
        &self.inner.calendars.cache
    }

    /// Returns true if a usable credential is believed to exist.
    pub fn is_connected(&self) -> bool {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }

    /// Fetches events. See the module docs for the decision order.
    pub async fn fetch_events(&self, force: bool) -> SyncResult<Fetched<CalendarEvent>> {
        self.fetch::<EventsLane>(force).await
    }

    /// Fetches the calendar list, with the same rules as events.
    pub async fn fetch_calendars(&self, force: bool) -> SyncResult<Fetched<CalendarInfo>> {
        self.fetch::<CalendarsLane>(force).await
    }

    async fn fetch<L: LaneKind>(&self, force: bool) -> SyncResult<Fetched<L::Item>> {
        let inner = &*self.inner;
        let lane = L::lane(inner);
        let epoch = inner.epoch();

        let Some(credential) = inner.tokens.retrieve(&inner.user_id) else {
            debug!(kind = %L::KIND, "no credential");
            inner.mark_disconnected(Some(SyncError::NoCredential));
            return match lane.cache.get_stale() {
                Some(items) => Ok(Fetched::from_cache(items, lane.cache.is_valid())
                    .with_warning(SyncError::NoCredential)),
                None => Err(SyncError::NoCredential),
            };
        };

        if !force && let Some(items) = lane.cache.get() {
            debug!(kind = %L::KIND, "serving fresh cache");
            return Ok(Fetched::from_cache(items, true));
        }
        if !lane.cache.is_valid()
            && let Some(items) = lane.cache.get_stale()
        {
            debug!(kind = %L::KIND, force, "serving stale cache, refreshing in background");
            let this = self.clone();
            let handle = tokio::spawn(async move {
                // Failures are recorded in the status by the cycle.
                let _ = this.network_cycle::<L>(credential, force, epoch).await;
            });
            let mut fetched = Fetched::from_cache(items, false);
            fetched.refresh = Some(handle);
            return Ok(fetched);
        }

        self.network_cycle::<L>(credential, force, epoch).await
    }

    async fn network_cycle<L: LaneKind>(
        &self,
        credential: OAuthCredential,
        force: bool,
        epoch: u64,
    ) -> SyncResult<Fetched<L::Item>> {
        let inner = &*self.inner;
        let lane = L::lane(inner);

        let _in_flight = match lane.admit(force, inner.config.rate_limit_window) {
            Gate::Proceed(guard) => guard,
            Gate::InFlight => {
                debug!(kind = %L::KIND, "fetch already in flight, skipping");
                return Ok(lane.current());
            }
            Gate::RateLimited => {
                debug!(kind = %L::KIND, "inside rate-limit window, skipping");
                return Ok(lane.current());
            }
        };

        let span = info_span!("fetch", kind = %L::KIND, force);
        async move {
            loop {
                let result = L::call(inner, &credential).await;
                if !inner.is_current(epoch) {
                    lane.reset_retries();
                    debug!("disconnected during fetch, discarding reply");
                    return Ok(lane.current());
                }
                let error = match result {
                    Ok(reply) => {
                        lane.reset_retries();
                        lane.cache.store(reply.data.clone());
                        inner.record_success(L::KIND);
                        info!(count = reply.data.len(), "fetched");
                        inner.adopt_rotated(reply.rotated).await;
                        return Ok(Fetched::network(reply.data));
                    }
                    Err(e) => e,
                };

                match FailureClass::of(&error) {
                    FailureClass::Quota => {
                        if lane.retry_count() < inner.config.max_retries {
                            let retry = lane.begin_retry();
                            let delay = inner.config.backoff_delay(retry);
                            warn!(
                                retry,
                                delay_ms = delay.as_millis() as u64,
                                "quota exceeded, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            if !inner.is_current(epoch) {
                                lane.reset_retries();
                                debug!("disconnected during backoff, giving up");
                                return Ok(lane.current());
                            }
                            continue;
                        }
                        lane.reset_retries();
                        warn!("quota retries exhausted");
                        return self.fall_back::<L>(SyncError::quota(error.message()));
                    }
                    FailureClass::AuthExpired => {
                        return Err(inner.invalidate_credential(L::KIND.as_str(), &error));
                    }
                    FailureClass::NetworkOrUnknown => {
                        warn!(error = %error, "fetch failed");
                        return self.fall_back::<L>(SyncError::network(error.message()));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Serves cache with `error` as a warning, or fails with it.
    fn fall_back<L: LaneKind>(&self, error: SyncError) -> SyncResult<Fetched<L::Item>> {
        let lane = L::lane(&self.inner);
        self.inner.record_fetch_error(L::KIND, &error);
        match lane.cache.get_stale() {
            Some(items) => Ok(Fetched::from_cache(items, lane.cache.is_valid()).with_warning(error)),
            None => Err(error),
        }
    }

    /// Issues one lightweight authenticated call.
    ///
    /// A rejected credential is dropped exactly as during a fetch.
    pub async fn probe(&self) -> SyncResult<()> {
        let inner = &*self.inner;
        let credential = inner
            .tokens
            .retrieve(&inner.user_id)
            .ok_or(SyncError::NoCredential)?;
        let epoch = inner.epoch();

        let result = inner.provider.probe(&credential).await;
        if !inner.is_current(epoch) {
            return Err(SyncError::NoCredential);
        }
        match result {
            Ok(reply) => {
                inner.adopt_rotated(reply.rotated).await;
                Ok(())
            }
            Err(e) => Err(match FailureClass::of(&e) {
                FailureClass::AuthExpired => inner.invalidate_credential("probe", &e),
                FailureClass::Quota => SyncError::quota(e.message()),
                FailureClass::NetworkOrUnknown => SyncError::network(e.message()),
            }),
        }
    }

    /// Creates an event and adds it to the event cache.
    ///
    /// Writes are not retried. The event only joins a cache that already
    /// holds fetched data; otherwise the next fetch brings it in.
    pub async fn create_event(&self, draft: &NewEvent) -> SyncResult<CalendarEvent> {
        draft.validate().map_err(SyncError::config)?;

        let inner = &*self.inner;
        let credential = inner
            .tokens
            .retrieve(&inner.user_id)
            .ok_or(SyncError::NoCredential)?;
        let epoch = inner.epoch();

        let result = inner.provider.create_event(&credential, draft).await;
        // After a disconnect the remote write still stands; local state is left alone.
        let current = inner.is_current(epoch);
        match result {
            Ok(reply) => {
                let mut cached = false;
                if current {
                    inner.adopt_rotated(reply.rotated).await;
                    cached = inner.events.cache.append(reply.data.clone());
                }
                info!(event_id = %reply.data.id, cached, "event created");
                Ok(reply.data)
            }
            Err(e) => Err(match FailureClass::of(&e) {
                FailureClass::AuthExpired if current => {
                    inner.invalidate_credential("create_event", &e)
                }
                FailureClass::AuthExpired => SyncError::ReauthRequired,
                FailureClass::Quota => SyncError::quota(e.message()),
                FailureClass::NetworkOrUnknown => SyncError::network(e.message()),
            }),
        }
    }

    /// Stores a freshly obtained credential and marks the session connected.
    pub async fn set_credential(&self, credential: &OAuthCredential) -> SyncResult<()> {
        let inner = &*self.inner;
        if !credential.has_valid_shape() {
            return Err(SyncError::config("received a malformed credential"));
        }
        if !inner.tokens.store(&inner.user_id, credential).await {
            return Err(SyncError::storage("could not persist the credential"));
        }
        inner.update_status(|s| {
            s.connected = true;
            s.connection_error = None;
        });
        info!(user_id = %inner.user_id, "credential stored, connected");
        Ok(())
    }

    /// Forgets the credential, both caches and fetch errors.
    ///
    /// Fetches still running when this is called are discarded on return.
    pub fn clear(&self) {
        let inner = &*self.inner;
        inner.epoch.fetch_add(1, Ordering::AcqRel);
        inner.tokens.remove(&inner.user_id);
        inner.events.cache.clear();
        inner.calendars.cache.clear();
        inner.update_status(|s| *s = Status::default());
        info!(user_id = %inner.user_id, "disconnected");
    }

    /// Subscribes to credential rotations observed by this coordinator.
    pub fn subscribe_rotations(&self) -> broadcast::Receiver<CredentialsRotated> {
        self.inner.rotations.subscribe()
    }

    /// Returns a snapshot of the coordinator state.
    pub fn status(&self) -> SyncStatus {
        let inner = &*self.inner;
        let status = inner.status.read().unwrap_or_else(PoisonError::into_inner);
        SyncStatus {
            connected: status.connected,
            events_in_flight: inner.events.in_flight(),
            calendars_in_flight: inner.calendars.in_flight(),
            events_retry_count: inner.events.retry_count(),
            calendars_retry_count: inner.calendars.retry_count(),
            connection_error: status.connection_error.clone(),
            fetch_error: status
                .events_error
                .clone()
                .or_else(|| status.calendars_error.clone()),
            last_refresh: status.last_refresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::testing::{self, ScriptedProvider, USER, credential, events, seeded_tokens};
    use crate::tokens::scoped_key;

    async fn coordinator(provider: Arc<ScriptedProvider>) -> (Arc<MemoryStore>, FetchCoordinator) {
        let (memory, tokens) = seeded_tokens().await;
        let coordinator = FetchCoordinator::new(USER, provider, tokens, SyncConfig::default());
        (memory, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_skips_network() {
        let provider = ScriptedProvider::with_events(events(3));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let first = coordinator.fetch_events(false).await.unwrap();
        assert_eq!(first.freshness, Freshness::Network);
        assert_eq!(first.items.len(), 3);

        tokio::time::advance(Duration::from_secs(60)).await;
        let second = coordinator.fetch_events(false).await.unwrap();
        assert_eq!(second.freshness, Freshness::Cached);
        assert_eq!(second.items.len(), 3);
        assert_eq!(provider.event_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_fetches_make_one_call() {
        let provider = ScriptedProvider::with_events(events(2));
        provider.set_latency(Duration::from_secs(1));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let (a, b) = tokio::join!(coordinator.fetch_events(false), coordinator.fetch_events(false));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(provider.event_calls(), 1);
        let network = [&a, &b]
            .iter()
            .filter(|f| f.freshness == Freshness::Network)
            .count();
        assert_eq!(network, 1);
        assert!(!coordinator.status().events_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_fetch_does_not_overlap_in_flight_one() {
        let provider = ScriptedProvider::with_events(events(2));
        provider.set_latency(Duration::from_secs(1));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let (a, b) = tokio::join!(coordinator.fetch_events(true), coordinator.fetch_events(true));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.event_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_returns_before_network() {
        let provider = ScriptedProvider::with_events(events(7));
        let (_, coordinator) = coordinator(provider.clone()).await;
        coordinator.events_cache().store(events(5));

        tokio::time::advance(Duration::from_secs(600)).await;
        let fetched = coordinator.fetch_events(false).await.unwrap();

        assert_eq!(fetched.freshness, Freshness::Stale);
        assert_eq!(fetched.items.len(), 5);
        assert_eq!(provider.event_calls(), 0);

        fetched.refresh.unwrap().await.unwrap();
        assert_eq!(provider.event_calls(), 1);
        assert!(coordinator.events_cache().is_valid());
        assert_eq!(coordinator.events_cache().get().unwrap().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_window_blocks_unforced_fetch() {
        let provider = ScriptedProvider::with_events(events(1));
        let (_, tokens) = seeded_tokens().await;
        let config = SyncConfig::default().with_cache_ttl(Duration::from_secs(1));
        let coordinator = FetchCoordinator::new(USER, provider.clone(), tokens, config);

        coordinator.fetch_events(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let stale = coordinator.fetch_events(false).await.unwrap();
        stale.refresh.unwrap().await.unwrap();
        assert_eq!(provider.event_calls(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        let again = coordinator.fetch_events(false).await.unwrap();
        again.refresh.unwrap().await.unwrap();
        assert_eq!(provider.event_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_fetch_ignores_rate_limit_window() {
        let provider = ScriptedProvider::with_events(events(1));
        let (_, coordinator) = coordinator(provider.clone()).await;

        coordinator.fetch_events(true).await.unwrap();
        let again = coordinator.fetch_events(true).await.unwrap();
        assert_eq!(again.freshness, Freshness::Network);
        assert_eq!(provider.event_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_twice_then_success() {
        let provider = ScriptedProvider::with_events(events(4));
        provider.fail_events(ProviderError::rate_limited("429"));
        provider.fail_events(ProviderError::rate_limited("429"));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let started = Instant::now();
        let fetched = coordinator.fetch_events(false).await.unwrap();

        assert_eq!(fetched.freshness, Freshness::Network);
        assert_eq!(fetched.items.len(), 4);
        assert!(fetched.warning.is_none());
        assert_eq!(provider.event_calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(coordinator.status().events_retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_backoff_increases_then_serves_cache() {
        let provider = ScriptedProvider::new();
        for _ in 0..4 {
            provider.fail_events(ProviderError::rate_limited("quota"));
        }
        let (_, coordinator) = coordinator(provider.clone()).await;
        coordinator.events_cache().store(events(2));

        let fetched = coordinator.fetch_events(true).await.unwrap();
        assert_eq!(fetched.items.len(), 2);
        assert!(matches!(fetched.warning, Some(SyncError::QuotaExceeded { .. })));

        let times = provider.event_call_times();
        assert_eq!(times.len(), 4);
        let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[1] > g[0]));
        assert_eq!(gaps[0], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_without_cache_is_an_error() {
        let provider = ScriptedProvider::new();
        for _ in 0..4 {
            provider.fail_events(ProviderError::rate_limited("quota"));
        }
        let (_, coordinator) = coordinator(provider.clone()).await;

        let err = coordinator.fetch_events(false).await.unwrap_err();
        assert!(matches!(err, SyncError::QuotaExceeded { .. }));
        assert!(!err.is_blocking());
        assert_eq!(provider.event_calls(), 4);
        assert!(coordinator.status().fetch_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_grant_disconnects_without_retry() {
        let provider = ScriptedProvider::new();
        provider.fail_events(ProviderError::rejected("invalid_grant"));
        let (memory, coordinator) = coordinator(provider.clone()).await;
        assert!(coordinator.is_connected());

        let err = coordinator.fetch_events(false).await.unwrap_err();
        assert_eq!(err, SyncError::ReauthRequired);
        assert!(err.is_blocking());
        assert_eq!(provider.event_calls(), 1);
        assert!(!coordinator.is_connected());
        assert!(!memory.contains(&scoped_key(USER)));
        assert_eq!(
            coordinator.status().connection_error,
            Some(SyncError::ReauthRequired)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_blocks_without_network() {
        let provider = ScriptedProvider::with_events(events(1));
        let tokens = crate::tokens::TokenStore::new(Arc::new(MemoryStore::new()));
        let coordinator =
            FetchCoordinator::new(USER, provider.clone(), tokens, SyncConfig::default());
        assert!(!coordinator.is_connected());

        assert_eq!(
            coordinator.fetch_events(true).await.unwrap_err(),
            SyncError::NoCredential
        );

        coordinator.events_cache().store(events(3));
        let fetched = coordinator.fetch_events(false).await.unwrap();
        assert_eq!(fetched.items.len(), 3);
        assert_eq!(fetched.warning, Some(SyncError::NoCredential));
        assert_eq!(provider.event_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_falls_back_or_surfaces_verbatim() {
        let provider = ScriptedProvider::new();
        provider.fail_events(ProviderError::network("connection refused"));
        provider.fail_events(ProviderError::network("connection refused"));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let err = coordinator.fetch_events(true).await.unwrap_err();
        assert_eq!(err, SyncError::network("connection refused"));

        coordinator.events_cache().store(events(2));
        let fetched = coordinator.fetch_events(true).await.unwrap();
        assert_eq!(fetched.items.len(), 2);
        assert_eq!(fetched.warning, Some(SyncError::network("connection refused")));
        assert_eq!(provider.event_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rotated_credential_is_stored_and_announced() {
        let rotated = OAuthCredential::new("ya29.rotated-by-provider").expires_in(3600);
        let provider = ScriptedProvider::new();
        provider.push_events(Ok(ProviderReply::new(events(1)).with_rotated(rotated.clone())));
        let (_, coordinator) = coordinator(provider.clone()).await;
        let mut rotations = coordinator.subscribe_rotations();

        coordinator.fetch_events(false).await.unwrap();

        let announced = rotations.recv().await.unwrap();
        assert_eq!(announced.credential, rotated);
        assert!(announced.persisted);
        assert_eq!(coordinator.tokens().retrieve(USER), Some(rotated));
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_independent() {
        let provider = ScriptedProvider::with_events(events(1));
        provider.set_latency(Duration::from_secs(1));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let (ev, cals) =
            tokio::join!(coordinator.fetch_events(false), coordinator.fetch_calendars(false));
        assert_eq!(ev.unwrap().freshness, Freshness::Network);
        assert_eq!(cals.unwrap().freshness, Freshness::Network);
        assert_eq!(provider.event_calls(), 1);
        assert_eq!(provider.calendar_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn calendar_list_falls_back_to_cache() {
        let provider = ScriptedProvider::new();
        provider.push_calendars(Err(ProviderError::server("503")));
        let (_, coordinator) = coordinator(provider.clone()).await;
        coordinator
            .calendars_cache()
            .store(vec![CalendarInfo::new("primary", "Me")]);

        let fetched = coordinator.fetch_calendars(true).await.unwrap();
        assert_eq!(fetched.items.len(), 1);
        assert!(matches!(fetched.warning, Some(SyncError::Network { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn create_event_writes_through() {
        let provider = ScriptedProvider::with_events(events(2));
        let (_, coordinator) = coordinator(provider.clone()).await;
        coordinator.fetch_events(false).await.unwrap();

        let draft = NewEvent::new(
            "Dentist",
            testing::event("x").start,
            testing::event("x").end,
        );
        let created = coordinator.create_event(&draft).await.unwrap();
        assert_eq!(created.title, "Dentist");

        let cached = coordinator.fetch_events(false).await.unwrap();
        assert_eq!(cached.freshness, Freshness::Cached);
        assert_eq!(cached.items.len(), 3);
        assert_eq!(provider.event_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_event_rejects_invalid_draft() {
        let provider = ScriptedProvider::new();
        let (_, coordinator) = coordinator(provider).await;
        let at = testing::event("x").start;
        let err = coordinator
            .create_event(&NewEvent::new("Bad", at, at))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn booking_into_empty_cache_does_not_fake_a_fetch() {
        let provider = ScriptedProvider::with_events(events(2));
        let (_, coordinator) = coordinator(provider.clone()).await;

        let at = testing::event("x");
        coordinator
            .create_event(&NewEvent::new("Dentist", at.start, at.end))
            .await
            .unwrap();
        assert!(coordinator.events_cache().get_stale().is_none());

        let fetched = coordinator.fetch_events(false).await.unwrap();
        assert_eq!(fetched.freshness, Freshness::Network);
        assert_eq!(provider.event_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_booking_is_not_retried() {
        let provider = ScriptedProvider::new();
        provider.push_create(Err(ProviderError::rate_limited("quota")));
        provider.push_create(Err(ProviderError::network("connection reset")));
        provider.push_create(Err(ProviderError::unauthorized("401")));
        let (memory, coordinator) = coordinator(provider.clone()).await;
        coordinator.events_cache().store(events(1));

        let at = testing::event("x");
        let draft = NewEvent::new("Dentist", at.start, at.end);

        let started = Instant::now();
        assert!(matches!(
            coordinator.create_event(&draft).await,
            Err(SyncError::QuotaExceeded { .. })
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            coordinator.create_event(&draft).await,
            Err(SyncError::network("connection reset"))
        );
        assert_eq!(
            coordinator.create_event(&draft).await,
            Err(SyncError::ReauthRequired)
        );
        assert!(!coordinator.is_connected());
        assert!(!memory.contains(&scoped_key(USER)));
        assert_eq!(coordinator.events_cache().get_stale().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_fetch_over_stale_cache_returns_at_once() {
        let provider = ScriptedProvider::new();
        for _ in 0..4 {
            provider.fail_events(ProviderError::rate_limited("quota"));
        }
        let (_, coordinator) = coordinator(provider.clone()).await;
        coordinator.events_cache().store(events(5));
        tokio::time::advance(Duration::from_secs(600)).await;

        let started = Instant::now();
        let fetched = coordinator.fetch_events(true).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(fetched.freshness, Freshness::Stale);
        assert_eq!(fetched.items.len(), 5);

        fetched.refresh.unwrap().await.unwrap();
        assert_eq!(provider.event_calls(), 4);
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert!(matches!(
            coordinator.status().fetch_error,
            Some(SyncError::QuotaExceeded { .. })
        ));
        assert_eq!(coordinator.events_cache().get_stale().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_fetch_discards_reply() {
        let rotated = OAuthCredential::new("ya29.rotated-by-provider").expires_in(3600);
        let provider = ScriptedProvider::new();
        provider.set_latency(Duration::from_secs(1));
        provider.push_events(Ok(ProviderReply::new(events(3)).with_rotated(rotated)));
        let (memory, coordinator) = coordinator(provider.clone()).await;
        let mut rotations = coordinator.subscribe_rotations();

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.fetch_events(true).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(coordinator.status().events_in_flight);
        coordinator.clear();

        let fetched = running.await.unwrap().unwrap();
        assert!(fetched.items.is_empty());
        assert_eq!(provider.event_calls(), 1);
        assert!(!coordinator.is_connected());
        assert!(coordinator.tokens().retrieve(USER).is_none());
        assert!(!memory.contains(&scoped_key(USER)));
        assert!(coordinator.events_cache().get_stale().is_none());
        assert_eq!(coordinator.status().last_refresh, None);
        assert!(rotations.try_recv().is_err());
        assert!(!coordinator.status().events_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_backoff_stops_retrying() {
        let provider = ScriptedProvider::new();
        for _ in 0..4 {
            provider.fail_events(ProviderError::rate_limited("quota"));
        }
        let (_, coordinator) = coordinator(provider.clone()).await;

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.fetch_events(true).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        coordinator.clear();

        let fetched = running.await.unwrap().unwrap();
        assert!(fetched.items.is_empty());
        assert_eq!(provider.event_calls(), 1);
        assert_eq!(coordinator.status().events_retry_count, 0);
        assert_eq!(coordinator.status().fetch_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rotated_credential_from_health_call_is_stored() {
        let rotated = OAuthCredential::new("ya29.rotated-on-probe").expires_in(3600);
        let provider = ScriptedProvider::new();
        provider.push_probe(Ok(ProviderReply::new(()).with_rotated(rotated.clone())));
        let (_, coordinator) = coordinator(provider.clone()).await;

        coordinator.probe().await.unwrap();
        assert_eq!(coordinator.tokens().retrieve(USER), Some(rotated));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_maps_failures() {
        let provider = ScriptedProvider::new();
        provider.fail_probe(ProviderError::rate_limited("busy"));
        provider.fail_probe(ProviderError::unauthorized("401"));
        let (_, coordinator) = coordinator(provider.clone()).await;

        assert!(matches!(
            coordinator.probe().await,
            Err(SyncError::QuotaExceeded { .. })
        ));
        assert_eq!(coordinator.probe().await, Err(SyncError::ReauthRequired));
        assert_eq!(coordinator.probe().await, Err(SyncError::NoCredential));
        assert_eq!(provider.probe_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn set_credential_and_clear() {
        let provider = ScriptedProvider::with_events(events(1));
        let coordinator = FetchCoordinator::new(
            USER,
            provider,
            crate::tokens::TokenStore::new(Arc::new(MemoryStore::new())),
            SyncConfig::default(),
        );

        assert!(coordinator.set_credential(&OAuthCredential::new("short")).await.is_err());
        coordinator.set_credential(&credential()).await.unwrap();
        assert!(coordinator.is_connected());

        coordinator.fetch_events(false).await.unwrap();
        assert!(coordinator.status().last_refresh.is_some());

        coordinator.clear();
        assert!(!coordinator.is_connected());
        assert!(coordinator.events_cache().get_stale().is_none());
        assert!(coordinator.tokens().retrieve(USER).is_none());
        assert_eq!(coordinator.status().last_refresh, None);
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_coordinator_restores_cache() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(TokenStore::new(store.clone()).store(USER, &credential()).await);

        let provider = ScriptedProvider::with_events(events(2));
        let first =
            FetchCoordinator::with_store(USER, provider.clone(), store.clone(), SyncConfig::default());
        first.fetch_events(false).await.unwrap();

        let second = FetchCoordinator::with_store(USER, provider.clone(), store, SyncConfig::default());
        let fetched = second.fetch_events(false).await.unwrap();
        assert_eq!(fetched.freshness, Freshness::Cached);
        assert_eq!(fetched.items.len(), 2);
        assert_eq!(provider.event_calls(), 1);
    }
}
