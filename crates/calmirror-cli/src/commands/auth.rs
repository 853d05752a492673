//! Authentication command.

use calmirror_sync::CalendarSession;
use tracing::{info, warn};

use crate::error::CliResult;

/// Runs the consent flow unless a credential is already stored.
///
/// On success the event and calendar caches are warmed.
pub async fn google(session: &CalendarSession, force: bool) -> CliResult<()> {
    if session.snapshot().is_connected && !force {
        println!("Already connected to Google Calendar.");
        println!("Use --force to reconnect.");
        return Ok(());
    }

    if force {
        session.disconnect();
    }

    println!("Starting Google Calendar authorization...");
    session.connect().await?;
    info!("Google authorization successful");
    println!("Connected.");

    match session.refresh(true).await {
        Ok(fetched) => {
            if let Some(refresh) = fetched.refresh {
                let _ = refresh.await;
            }
            println!("{} events mirrored.", session.snapshot().events.len());
        }
        Err(e) => {
            warn!(error = %e, "initial refresh failed");
            println!("Connected, but the first refresh failed: {}", e.user_message());
        }
    }
    Ok(())
}
