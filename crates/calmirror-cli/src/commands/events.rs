//! Event and calendar listing.

use calmirror_core::{CalendarEvent, CalendarInfo};
use calmirror_sync::{CalendarSession, Fetched, Freshness};
use chrono::Local;
use serde::Serialize;

use crate::error::{CliError, CliResult};

/// Lists mirrored events.
pub async fn events(session: &CalendarSession, force: bool, json: bool) -> CliResult<()> {
    let fetched = session.coordinator().fetch_events(force).await?;
    let lines = fetched.items.iter().map(event_line).collect::<Vec<_>>();
    show(fetched, json, lines, "No events.").await
}

/// Lists the calendar list.
pub async fn calendars(session: &CalendarSession, force: bool, json: bool) -> CliResult<()> {
    let fetched = session.coordinator().fetch_calendars(force).await?;
    let lines = fetched.items.iter().map(calendar_line).collect::<Vec<_>>();
    show(fetched, json, lines, "No calendars.").await
}

async fn show<T: Serialize>(
    fetched: Fetched<T>,
    json: bool,
    lines: Vec<String>,
    empty: &str,
) -> CliResult<()> {
    if json {
        let out = serde_json::to_string_pretty(&fetched.items)
            .map_err(|e| CliError::input(format!("failed to encode JSON: {}", e)))?;
        println!("{}", out);
    } else if lines.is_empty() {
        println!("{}", empty);
    } else {
        for line in &lines {
            println!("{}", line);
        }
    }

    if let Some(ref warning) = fetched.warning {
        eprintln!("warning: {}", warning.user_message());
    }
    if fetched.freshness == Freshness::Stale && fetched.warning.is_none() {
        eprintln!("(showing saved data, refreshing)");
    }
    // Let the background refresh land so the next run starts fresh.
    if let Some(refresh) = fetched.refresh {
        let _ = refresh.await;
    }
    Ok(())
}

/// One-line rendering of an event in local time.
pub fn event_line(event: &CalendarEvent) -> String {
    let start = event.start.with_timezone(&Local);
    let when = if event.all_day {
        format!("{}  all day    ", start.format("%a %d %b"))
    } else {
        let end = event.end.with_timezone(&Local);
        format!("{}  {}-{}", start.format("%a %d %b"), start.format("%H:%M"), end.format("%H:%M"))
    };
    match event.location {
        Some(ref location) => format!("{}  {}  ({})", when, event.title, location),
        None => format!("{}  {}", when, event.title),
    }
}

/// One-line rendering of a calendar.
pub fn calendar_line(calendar: &CalendarInfo) -> String {
    let mut line = format!("{}  {}", calendar.id, calendar.name);
    if calendar.is_primary {
        line.push_str("  [primary]");
    }
    if let Some(ref tz) = calendar.time_zone {
        line.push_str(&format!("  {}", tz));
    }
    line
}
