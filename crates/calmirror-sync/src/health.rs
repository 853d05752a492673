//! Background connectivity monitor with automatic recovery.
//!
//! The monitor probes the provider on a fixed interval. After
//! `failure_threshold` consecutive failures it schedules one recovery
//! attempt after `recovery_delay`:
//!
//! 1. a forced refresh through the coordinator, then a re-probe;
//! 2. if that fails, a full reauthorization through the session's
//!    [`OAuthFlow`](calmirror_providers::OAuthFlow), then a re-probe.
//!
//! A successful probe cancels a pending recovery. Failed recoveries leave
//! the failure counter untouched.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::CalendarSession;

/// Overall connectivity as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// No probe has completed yet.
    #[default]
    Unknown,
    /// The last probe or recovery succeeded.
    Healthy,
    /// The last probe or recovery failed.
    Degraded,
    /// A recovery attempt is scheduled.
    RecoveryPending,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::RecoveryPending => "recovery pending",
        })
    }
}

/// Monitor state.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    /// Current status.
    pub status: HealthStatus,
    /// Time of the last completed probe.
    pub last_check_at: Option<DateTime<Utc>>,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
    /// Message of the last failure.
    pub last_error: Option<String>,
    /// Whether a recovery timer is armed.
    pub recovery_scheduled: bool,
}

impl HealthState {
    fn record_success(&mut self) {
        self.status = HealthStatus::Healthy;
        self.last_check_at = Some(Utc::now());
        self.consecutive_failures = 0;
        self.last_error = None;
        self.recovery_scheduled = false;
    }

    fn record_failure(&mut self, error: &SyncError) {
        self.consecutive_failures += 1;
        self.last_check_at = Some(Utc::now());
        self.last_error = Some(error.to_string());
        self.status = if self.recovery_scheduled {
            HealthStatus::RecoveryPending
        } else {
            HealthStatus::Degraded
        };
    }

    fn record_failed_recovery(&mut self, error: &SyncError) {
        self.status = HealthStatus::Degraded;
        self.last_check_at = Some(Utc::now());
        self.last_error = Some(error.to_string());
        self.recovery_scheduled = false;
    }
}

/// Shared monitor state.
pub type SharedHealthState = Arc<RwLock<HealthState>>;

enum HealthCommand {
    TriggerRecovery(oneshot::Sender<bool>),
    Stop,
}

/// The health monitor task. Start it with [`spawn`](Self::spawn).
pub struct HealthMonitor {
    config: HealthConfig,
    session: CalendarSession,
    state: SharedHealthState,
    command_tx: mpsc::Sender<HealthCommand>,
    command_rx: mpsc::Receiver<HealthCommand>,
}

impl HealthMonitor {
    /// Creates a monitor for `session`.
    pub fn new(session: CalendarSession, config: HealthConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        Self {
            config,
            session,
            state: Arc::new(RwLock::new(HealthState::default())),
            command_tx,
            command_rx,
        }
    }

    /// Spawns the monitor loop and returns its handle.
    pub fn spawn(self) -> HealthHandle {
        let command_tx = self.command_tx.clone();
        let state = self.state.clone();
        let task = tokio::spawn(self.run());
        HealthHandle {
            command_tx,
            state,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.config.probe_interval.as_secs(),
            threshold = self.config.failure_threshold,
            "health monitor started"
        );

        let mut probes = tokio::time::interval(self.config.probe_interval);
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let recovery = tokio::time::sleep(self.config.recovery_delay);
        tokio::pin!(recovery);
        let mut recovery_armed = false;

        loop {
            tokio::select! {
                _ = probes.tick() => {
                    match self.check().await {
                        Ok(()) => {
                            if recovery_armed {
                                debug!("probe succeeded, cancelling recovery");
                                recovery_armed = false;
                            }
                            self.state.write().await.record_success();
                        }
                        Err(e) => {
                            let mut state = self.state.write().await;
                            state.record_failure(&e);
                            warn!(
                                error = %e,
                                failures = state.consecutive_failures,
                                "health probe failed"
                            );
                            if state.consecutive_failures >= self.config.failure_threshold
                                && !recovery_armed
                            {
                                recovery
                                    .as_mut()
                                    .reset(Instant::now() + self.config.recovery_delay);
                                recovery_armed = true;
                                state.recovery_scheduled = true;
                                state.status = HealthStatus::RecoveryPending;
                                info!(
                                    delay_secs = self.config.recovery_delay.as_secs(),
                                    "recovery scheduled"
                                );
                            }
                        }
                    }
                }
                () = &mut recovery, if recovery_armed => {
                    recovery_armed = false;
                    self.recover().await;
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(HealthCommand::TriggerRecovery(reply)) => {
                            debug!("recovery requested");
                            let recovered = self.recover().await;
                            recovery_armed = false;
                            let _ = reply.send(recovered);
                        }
                        Some(HealthCommand::Stop) | None => {
                            info!("health monitor stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One probe: connected flag, stored credential, then a provider call.
    async fn check(&self) -> SyncResult<()> {
        let coordinator = self.session.coordinator();
        if !coordinator.is_connected() || !coordinator.tokens().has_valid(coordinator.user_id()) {
            return Err(SyncError::NoCredential);
        }
        coordinator.probe().await
    }

    async fn recover(&self) -> bool {
        info!("attempting recovery");

        match self.session.refresh(true).await {
            Ok(fetched) => {
                if let Some(refresh) = fetched.refresh {
                    let _ = refresh.await;
                }
            }
            Err(e) => debug!(error = %e, "refresh during recovery failed"),
        }
        let error = match self.check().await {
            Ok(()) => return self.recovered("refresh").await,
            Err(e) => e,
        };
        debug!(error = %error, "still unhealthy after refresh, reauthorizing");

        let error = match self.session.connect().await {
            Ok(()) => match self.check().await {
                Ok(()) => return self.recovered("reauthorization").await,
                Err(e) => e,
            },
            Err(e) => e,
        };

        warn!(error = %error, "recovery failed");
        self.state.write().await.record_failed_recovery(&error);
        false
    }

    async fn recovered(&self, via: &'static str) -> bool {
        info!(via, "recovered");
        self.state.write().await.record_success();
        true
    }
}

/// Handle to a running [`HealthMonitor`].
///
/// Dropping the handle aborts the monitor.
#[derive(Debug)]
pub struct HealthHandle {
    command_tx: mpsc::Sender<HealthCommand>,
    state: SharedHealthState,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for HealthCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TriggerRecovery(_) => f.write_str("TriggerRecovery"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

impl HealthHandle {
    /// Returns true if the last probe or recovery succeeded.
    pub async fn is_healthy(&self) -> bool {
        self.state.read().await.status == HealthStatus::Healthy
    }

    /// Returns the time of the last completed probe.
    pub async fn last_health_check(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_check_at
    }

    /// Returns the number of failed probes since the last success.
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    /// Returns a copy of the monitor state.
    pub async fn state(&self) -> HealthState {
        self.state.read().await.clone()
    }

    /// Runs the recovery strategy now and reports whether it succeeded.
    ///
    /// Returns false if the monitor is not running.
    pub async fn trigger_recovery(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(HealthCommand::TriggerRecovery(reply_tx))
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Stops the monitor and waits for it to exit.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if self.command_tx.send(HealthCommand::Stop).await.is_err() {
            task.abort();
        }
        let _ = task.await;
    }

    /// Returns true while the monitor task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HealthHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
