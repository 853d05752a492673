//! Status and disconnect commands.

use std::time::Duration;

use calmirror_sync::CalendarSession;
use chrono::Local;

use crate::error::CliResult;

/// Prints connection, cache and error state; optionally probes.
pub async fn status(session: &CalendarSession, probe: bool) -> CliResult<()> {
    let snapshot = session.snapshot();
    let coordinator = session.coordinator();

    println!("user:        {}", coordinator.user_id());
    println!(
        "connected:   {}",
        if snapshot.is_connected { "yes" } else { "no" }
    );
    match snapshot.last_refresh {
        Some(at) => println!(
            "refreshed:   {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("refreshed:   never"),
    }
    println!(
        "events:      {} cached{}",
        snapshot.events.len(),
        age_suffix(coordinator.events_cache().age(), coordinator.events_cache().is_valid())
    );
    println!(
        "calendars:   {} cached{}",
        snapshot.calendars.len(),
        age_suffix(
            coordinator.calendars_cache().age(),
            coordinator.calendars_cache().is_valid()
        )
    );
    if let Some(ref e) = snapshot.connection_error {
        println!("connection:  {}", e.user_message());
    }
    if let Some(ref e) = snapshot.fetch_error {
        println!("last error:  {}", e.user_message());
    }

    if probe {
        match coordinator.probe().await {
            Ok(()) => println!("probe:       ok"),
            Err(e) => println!("probe:       failed ({})", e.user_message()),
        }
    }
    Ok(())
}

/// Forgets the credential and cached data.
pub fn disconnect(session: &CalendarSession) -> CliResult<()> {
    session.disconnect();
    println!("Disconnected. Stored credential and cached data removed.");
    Ok(())
}

fn age_suffix(age: Option<Duration>, fresh: bool) -> String {
    match age {
        Some(age) => format!(
            ", {} old{}",
            humanize(age),
            if fresh { "" } else { " (stale)" }
        ),
        None => String::new(),
    }
}

fn humanize(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{}s", secs),
        60..3600 => format!("{}m", secs / 60),
        3600..86400 => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d", secs / 86400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_ages() {
        assert_eq!(humanize(Duration::from_secs(5)), "5s");
        assert_eq!(humanize(Duration::from_secs(125)), "2m");
        assert_eq!(humanize(Duration::from_secs(3 * 3600 + 5 * 60)), "3h05m");
        assert_eq!(humanize(Duration::from_secs(3 * 86400)), "3d");
    }

    #[test]
    fn age_suffix_marks_stale() {
        assert_eq!(age_suffix(None, false), "");
        assert_eq!(age_suffix(Some(Duration::from_secs(30)), true), ", 30s old");
        assert_eq!(
            age_suffix(Some(Duration::from_secs(600)), false),
            ", 10m old (stale)"
        );
    }
}
