//! Consumer-facing session over a [`FetchCoordinator`].
//!
//! [`CalendarSession`] is what an application binds its views to: a
//! snapshot of everything displayable, plus the handful of actions a user
//! can take. It holds no state of its own beyond the optional consent flow.

use std::fmt;
use std::sync::Arc;

use calmirror_core::{CalendarEvent, CalendarInfo, NewEvent};
use calmirror_providers::{OAuthFlow, ProviderError};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::coordinator::{FetchCoordinator, Fetched};
use crate::error::{FailureClass, SyncError, SyncResult};
use crate::health::{HealthHandle, HealthMonitor};
use crate::notify::CredentialsRotated;

/// Everything a view needs to render the calendar state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// A usable credential is believed to exist.
    pub is_connected: bool,
    /// An events fetch is running.
    pub is_loading_events: bool,
    /// Cached events, fresh or stale.
    pub events: Vec<CalendarEvent>,
    /// Cached calendar list, fresh or stale.
    pub calendars: Vec<CalendarInfo>,
    /// Blocking problem: the user has to (re)connect.
    pub connection_error: Option<SyncError>,
    /// Non-blocking problem with the last fetch.
    pub fetch_error: Option<SyncError>,
    /// Time of the last successful network fetch.
    pub last_refresh: Option<DateTime<Utc>>,
}

/// A user's calendar session.
#[derive(Clone)]
pub struct CalendarSession {
    coordinator: FetchCoordinator,
    flow: Option<Arc<dyn OAuthFlow>>,
}

impl fmt::Debug for CalendarSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarSession")
            .field("coordinator", &self.coordinator)
            .field("has_oauth_flow", &self.flow.is_some())
            .finish()
    }
}

impl CalendarSession {
    /// Creates a session without a consent flow.
    pub fn new(coordinator: FetchCoordinator) -> Self {
        Self {
            coordinator,
            flow: None,
        }
    }

    /// Builder: set the consent flow used by [`connect`](Self::connect).
    pub fn with_oauth_flow(mut self, flow: Arc<dyn OAuthFlow>) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Returns the underlying coordinator.
    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Returns the current displayable state. Never touches the network.
    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.coordinator.status();
        SessionSnapshot {
            is_connected: status.connected,
            is_loading_events: status.events_in_flight,
            events: self
                .coordinator
                .events_cache()
                .get_stale()
                .unwrap_or_default(),
            calendars: self
                .coordinator
                .calendars_cache()
                .get_stale()
                .unwrap_or_default(),
            connection_error: status.connection_error,
            fetch_error: status.fetch_error,
            last_refresh: status.last_refresh,
        }
    }

    /// Refreshes events and the calendar list.
    ///
    /// Returns the events outcome; a calendar-list failure is only recorded
    /// in the status.
    pub async fn refresh(&self, force: bool) -> SyncResult<Fetched<CalendarEvent>> {
        let (events, calendars) = tokio::join!(
            self.coordinator.fetch_events(force),
            self.coordinator.fetch_calendars(force)
        );
        if let Err(e) = calendars {
            warn!(error = %e, "calendar list refresh failed");
        }
        events
    }

    /// Runs the consent flow and stores the resulting credential.
    pub async fn connect(&self) -> SyncResult<()> {
        let flow = self
            .flow
            .as_ref()
            .ok_or_else(|| SyncError::config("no authorization flow configured"))?;
        let code = flow.authorize().await.map_err(|e| normalize(&e))?;
        self.handle_oauth_callback(&code).await
    }

    /// Exchanges an authorization code and stores the credential.
    pub async fn handle_oauth_callback(&self, code: &str) -> SyncResult<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SyncError::config("authorization code is empty"));
        }
        let credential = self
            .coordinator
            .provider()
            .exchange_code(code)
            .await
            .map_err(|e| {
                warn!(error = %e, "code exchange failed");
                normalize(&e)
            })?;
        self.coordinator.set_credential(&credential).await?;
        info!(user_id = %self.coordinator.user_id(), "calendar connected");
        Ok(())
    }

    /// Forgets the credential and all cached data.
    pub fn disconnect(&self) {
        self.coordinator.clear();
    }

    /// Creates a booking; it shows up in [`snapshot`](Self::snapshot) at once.
    pub async fn create_booking(&self, draft: &NewEvent) -> SyncResult<CalendarEvent> {
        self.coordinator.create_event(draft).await
    }

    /// Subscribes to credential rotations.
    pub fn subscribe_rotations(&self) -> broadcast::Receiver<CredentialsRotated> {
        self.coordinator.subscribe_rotations()
    }

    /// Spawns a health monitor for this session.
    pub fn start_health_monitor(&self, config: HealthConfig) -> HealthHandle {
        HealthMonitor::new(self.clone(), config).spawn()
    }
}

fn normalize(error: &ProviderError) -> SyncError {
    match FailureClass::of(error) {
        FailureClass::Quota => SyncError::quota(error.message()),
        FailureClass::AuthExpired => SyncError::ReauthRequired,
        FailureClass::NetworkOrUnknown => SyncError::network(error.message()),
    }
}
