//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calmirror_core::{CalendarEvent, CalendarInfo, NewEvent, OAuthCredential, TimeWindow};
use calmirror_providers::{
    BoxFuture, CalendarProvider, OAuthFlow, ProviderError, ProviderReply, ProviderResult,
};
use chrono::{TimeZone, Utc};
use tokio::time::Instant;

use crate::kv::MemoryStore;
use crate::tokens::TokenStore;

pub const USER: &str = "alice";

pub fn credential() -> OAuthCredential {
    OAuthCredential::new("ya29.a0AfH6SMBtest-access")
        .with_refresh_token("1//0gRefresh")
        .expires_in(3600)
}

pub fn event(id: &str) -> CalendarEvent {
    let start = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
    CalendarEvent::new(id, format!("Event {}", id), start, start + chrono::Duration::minutes(30))
}

pub fn events(n: usize) -> Vec<CalendarEvent> {
    (0..n).map(|i| event(&format!("e{}", i))).collect()
}

/// Memory-backed token store holding a valid credential for [`USER`].
pub async fn seeded_tokens() -> (Arc<MemoryStore>, TokenStore) {
    let memory = Arc::new(MemoryStore::new());
    let tokens = TokenStore::new(memory.clone());
    assert!(tokens.store(USER, &credential()).await);
    (memory, tokens)
}

type Script<T> = Mutex<VecDeque<ProviderResult<ProviderReply<T>>>>;

/// Provider answering from per-call scripts, falling back to defaults.
#[derive(Default)]
pub struct ScriptedProvider {
    events: Script<Vec<CalendarEvent>>,
    calendars: Script<Vec<CalendarInfo>>,
    probes: Script<()>,
    creates: Mutex<VecDeque<ProviderResult<ProviderReply<CalendarEvent>>>>,
    exchanges: Mutex<VecDeque<ProviderResult<OAuthCredential>>>,
    default_events: Mutex<Vec<CalendarEvent>>,
    latency: Mutex<Duration>,
    event_calls: Mutex<Vec<Instant>>,
    calendar_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_events(events: Vec<CalendarEvent>) -> Arc<Self> {
        let provider = Self::default();
        *provider.default_events.lock().unwrap() = events;
        Arc::new(provider)
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn push_events(&self, result: ProviderResult<ProviderReply<Vec<CalendarEvent>>>) {
        self.events.lock().unwrap().push_back(result);
    }

    pub fn fail_events(&self, error: ProviderError) {
        self.push_events(Err(error));
    }

    pub fn push_calendars(&self, result: ProviderResult<ProviderReply<Vec<CalendarInfo>>>) {
        self.calendars.lock().unwrap().push_back(result);
    }

    pub fn fail_probe(&self, error: ProviderError) {
        self.probes.lock().unwrap().push_back(Err(error));
    }

    pub fn push_probe(&self, result: ProviderResult<ProviderReply<()>>) {
        self.probes.lock().unwrap().push_back(result);
    }

    pub fn push_create(&self, result: ProviderResult<ProviderReply<CalendarEvent>>) {
        self.creates.lock().unwrap().push_back(result);
    }

    pub fn push_exchange(&self, result: ProviderResult<OAuthCredential>) {
        self.exchanges.lock().unwrap().push_back(result);
    }

    pub fn event_calls(&self) -> usize {
        self.event_calls.lock().unwrap().len()
    }

    pub fn event_call_times(&self) -> Vec<Instant> {
        self.event_calls.lock().unwrap().clone()
    }

    pub fn calendar_calls(&self) -> usize {
        self.calendar_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl CalendarProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn list_events<'a>(
        &'a self,
        _credential: &'a OAuthCredential,
        _window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarEvent>>>> {
        Box::pin(async move {
            self.event_calls.lock().unwrap().push(Instant::now());
            self.wait().await;
            let scripted = self.events.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(ProviderReply::new(self.default_events.lock().unwrap().clone()))
            })
        })
    }

    fn list_calendars<'a>(
        &'a self,
        _credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<Vec<CalendarInfo>>>> {
        Box::pin(async move {
            self.calendar_calls.fetch_add(1, Ordering::SeqCst);
            self.wait().await;
            let scripted = self.calendars.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(ProviderReply::new(vec![
                    CalendarInfo::new("primary", "Me").with_primary(true),
                ]))
            })
        })
    }

    fn create_event<'a>(
        &'a self,
        _credential: &'a OAuthCredential,
        draft: &'a NewEvent,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<CalendarEvent>>> {
        Box::pin(async move {
            let scripted = self.creates.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(ProviderReply::new(CalendarEvent::new(
                    "created",
                    draft.title.clone(),
                    draft.start,
                    draft.end,
                )))
            })
        })
    }

    fn exchange_code<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, ProviderResult<OAuthCredential>> {
        Box::pin(async move {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.exchanges.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(credential()))
        })
    }

    fn probe<'a>(
        &'a self,
        _credential: &'a OAuthCredential,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply<()>>> {
        Box::pin(async move {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.probes.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(ProviderReply::new(())))
        })
    }
}

/// Consent flow returning scripted codes.
#[derive(Default)]
pub struct ScriptedFlow {
    codes: Mutex<VecDeque<ProviderResult<String>>>,
    calls: AtomicUsize,
}

impl ScriptedFlow {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: ProviderResult<String>) {
        self.codes.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OAuthFlow for ScriptedFlow {
    fn authorize(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.codes.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok("4/scripted-code".to_string()))
        })
    }
}
