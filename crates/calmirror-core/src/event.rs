//! Calendar resource types mirrored from the provider.
//!
//! - [`CalendarEvent`]: a read-only mirror of a remote event
//! - [`CalendarInfo`]: an entry of the user's calendar list
//! - [`NewEvent`]: a booking draft the application writes to the provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::TimeWindow;

/// A calendar event as mirrored from the provider.
///
/// The provider's id is the only identity; there is no local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider event id.
    pub id: String,
    /// Event title.
    pub title: String,
    /// Start instant (midnight UTC for all-day events).
    pub start: DateTime<Utc>,
    /// End instant (exclusive).
    pub end: DateTime<Utc>,
    /// Whether this is an all-day event.
    pub all_day: bool,
    /// Free-form location, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CalendarEvent {
    /// Creates a timed event.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start,
            end,
            all_day: false,
            location: None,
        }
    }

    /// Builder: mark as all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    /// Builder: set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Returns true if the event overlaps the given window.
    pub fn overlaps(&self, window: &TimeWindow) -> bool {
        self.start < window.end && self.end > window.start
    }
}

/// An entry of the user's calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    /// Calendar id (e.g. `primary` or an email address).
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Whether this is the user's primary calendar.
    #[serde(default)]
    pub is_primary: bool,
    /// IANA time zone of the calendar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl CalendarInfo {
    /// Creates a calendar entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_primary: false,
            time_zone: None,
        }
    }

    /// Builder: mark as primary.
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    /// Builder: set the time zone.
    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }
}

/// A booking to be created on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Target calendar id.
    pub calendar_id: String,
    /// Event title.
    pub title: String,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// End instant.
    pub end: DateTime<Utc>,
    /// All-day booking.
    #[serde(default)]
    pub all_day: bool,
    /// Optional location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl NewEvent {
    /// Creates a timed booking on the primary calendar.
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            calendar_id: "primary".to_string(),
            title: title.into(),
            start,
            end,
            all_day: false,
            location: None,
        }
    }

    /// Builder: target a specific calendar.
    pub fn in_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    /// Builder: set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder: mark as all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    /// Checks the draft before it is sent.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.trim().is_empty() {
            return Err("title is required");
        }
        if self.end <= self.start {
            return Err("end must be after start");
        }
        if self.calendar_id.is_empty() {
            return Err("calendar id is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn event_overlaps_window() {
        let event = CalendarEvent::new("e1", "Standup", at(9), at(10));
        assert!(event.overlaps(&TimeWindow::new(at(8), at(11))));
        assert!(event.overlaps(&TimeWindow::new(at(9) + Duration::minutes(30), at(12))));
        assert!(!event.overlaps(&TimeWindow::new(at(10), at(12))));
    }

    #[test]
    fn new_event_validation() {
        assert!(NewEvent::new("Table for two", at(19), at(21)).validate().is_ok());
        assert_eq!(
            NewEvent::new("  ", at(19), at(21)).validate(),
            Err("title is required")
        );
        assert_eq!(
            NewEvent::new("Dinner", at(21), at(19)).validate(),
            Err("end must be after start")
        );
        assert_eq!(
            NewEvent::new("Dinner", at(19), at(21)).in_calendar("").validate(),
            Err("calendar id is required")
        );
    }

    #[test]
    fn event_serde_skips_missing_location() {
        let event = CalendarEvent::new("e1", "Standup", at(9), at(10));
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("location"));

        let with_loc = event.with_location("Cellar");
        let back: CalendarEvent =
            serde_json::from_str(&serde_json::to_string(&with_loc).unwrap()).unwrap();
        assert_eq!(back.location.as_deref(), Some("Cellar"));
    }

    #[test]
    fn calendar_info_builder() {
        let info = CalendarInfo::new("primary", "Bookings")
            .with_primary(true)
            .with_time_zone("Europe/Paris");
        assert!(info.is_primary);
        assert_eq!(info.time_zone.as_deref(), Some("Europe/Paris"));
    }
}
