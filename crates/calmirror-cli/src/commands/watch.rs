//! Long-running mirror with health monitoring.

use std::time::Duration;

use calmirror_sync::{CalendarSession, Freshness, HealthConfig};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::CliResult;

/// Refreshes every `interval` and runs the health monitor until Ctrl-C.
pub async fn watch(
    session: &CalendarSession,
    health: HealthConfig,
    interval: Duration,
) -> CliResult<()> {
    let mut monitor = session.start_health_monitor(health);
    let mut rotations = session.subscribe_rotations();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = interval.as_secs(), "watching calendar");
    eprintln!("Watching calendar, press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match session.refresh(false).await {
                    Ok(fetched) => {
                        let freshness = fetched.freshness;
                        if let Some(refresh) = fetched.refresh {
                            let _ = refresh.await;
                        }
                        let snapshot = session.snapshot();
                        let healthy = monitor.is_healthy().await;
                        info!(
                            events = snapshot.events.len(),
                            network = freshness == Freshness::Network,
                            healthy,
                            "mirror checked"
                        );
                        if let Some(e) = snapshot.fetch_error {
                            warn!(error = %e, "serving saved events");
                        }
                    }
                    Err(e) if e.is_blocking() => {
                        warn!(error = %e, "calendar disconnected, waiting for recovery");
                    }
                    Err(e) => warn!(error = %e, "refresh failed"),
                }
            }
            notice = rotations.recv() => {
                match notice {
                    Ok(notice) => info!(persisted = notice.persisted, "access token rotated"),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "missed rotation notices"),
                    Err(RecvError::Closed) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    monitor.stop().await;
    let state = monitor.state().await;
    eprintln!(
        "Stopped. Health: {}, {} consecutive failures.",
        state.status, state.consecutive_failures
    );
    Ok(())
}
