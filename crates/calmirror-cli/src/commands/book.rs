//! Booking command.

use calmirror_core::NewEvent;
use calmirror_sync::CalendarSession;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::commands::events::event_line;
use crate::error::{CliError, CliResult};

/// Options for a new booking.
#[derive(Debug, Clone)]
pub struct BookingArgs {
    pub title: String,
    pub start: String,
    pub duration_minutes: u32,
    pub calendar: String,
    pub location: Option<String>,
}

impl BookingArgs {
    /// Builds the provider draft.
    pub fn to_draft(&self) -> CliResult<NewEvent> {
        if self.duration_minutes == 0 {
            return Err(CliError::input("duration must be at least one minute"));
        }
        let start = parse_start(&self.start)?;
        let end = start + chrono::Duration::minutes(i64::from(self.duration_minutes));
        let mut draft = NewEvent::new(self.title.trim(), start, end).in_calendar(&self.calendar);
        if let Some(ref location) = self.location {
            draft = draft.with_location(location);
        }
        draft.validate().map_err(CliError::input)?;
        Ok(draft)
    }
}

/// Creates the booking and prints it.
pub async fn book(session: &CalendarSession, args: &BookingArgs) -> CliResult<()> {
    let draft = args.to_draft()?;
    let created = session.create_booking(&draft).await?;
    println!("Booked: {}", event_line(&created));
    println!("id: {}", created.id);
    Ok(())
}

/// Parses RFC 3339, or `YYYY-MM-DD HH:MM` / `YYYY-MM-DDTHH:MM` as local time.
pub fn parse_start(input: &str) -> CliResult<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| CliError::input(format!("cannot parse start time '{}'", input)))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CliError::input(format!("'{}' does not exist in local time", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(start: &str) -> BookingArgs {
        BookingArgs {
            title: " Dentist ".to_string(),
            start: start.to_string(),
            duration_minutes: 45,
            calendar: "primary".to_string(),
            location: Some("Main St".to_string()),
        }
    }

    #[test]
    fn rfc3339_start() {
        let start = parse_start("2026-06-01T09:00:00+02:00").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 6, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn local_start() {
        let start = parse_start("2026-06-01 09:00").unwrap();
        let expected = Local
            .with_ymd_and_hms(2026, 6, 1, 9, 0, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(start, expected);
    }

    #[test]
    fn garbage_start_is_rejected() {
        assert!(matches!(parse_start("tomorrow"), Err(CliError::Input(_))));
    }

    #[test]
    fn draft_from_args() {
        let draft = args("2026-06-01T09:00:00Z").to_draft().unwrap();
        assert_eq!(draft.title, "Dentist");
        assert_eq!(draft.end - draft.start, chrono::Duration::minutes(45));
        assert_eq!(draft.location.as_deref(), Some("Main St"));
        assert_eq!(draft.calendar_id, "primary");
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut args = args("2026-06-01T09:00:00Z");
        args.duration_minutes = 0;
        assert!(args.to_draft().is_err());
    }
}
