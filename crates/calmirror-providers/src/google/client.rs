//! Google Calendar API client.
//!
//! Low-level HTTP calls against Calendar API v3. The access token is passed
//! per call; refreshing it is the provider's job.

use calmirror_core::{CalendarEvent, CalendarInfo, NewEvent, TimeWindow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Error reasons Google uses for quota and rate limits on 403 responses.
const QUOTA_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
];

/// Google Calendar API client.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    api_base: String,
}

impl GoogleCalendarClient {
    /// Creates a client for the API rooted at `api_base`.
    pub fn new(api_base: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Lists events of one calendar overlapping `window`, following pages.
    ///
    /// Recurring events are expanded server-side; cancelled ones are skipped.
    pub async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<Vec<CalendarEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        );
        let time_min = window.start.to_rfc3339();
        let time_max = window.end.to_rfc3339();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ];
            if let Some(ref token) = page_token {
                query.push(("pageToken", token.as_str()));
            }

            let response = self
                .http_client
                .get(&url)
                .bearer_auth(access_token)
                .query(&query)
                .send()
                .await
                .map_err(request_error)?;
            let body = read_success(response).await?;

            let page: EventListResponse = serde_json::from_str(&body).map_err(|e| {
                ProviderError::invalid_response(format!("failed to parse response: {}", e))
            })?;

            events.extend(page.items.into_iter().filter_map(convert_event));

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(calendar_id, count = events.len(), "listed events");
        Ok(events)
    }

    /// Lists the calendars on the user's calendar list.
    pub async fn list_calendars(&self, access_token: &str) -> ProviderResult<Vec<CalendarInfo>> {
        let url = format!("{}/users/me/calendarList", self.api_base);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(request_error)?;
        let body = read_success(response).await?;

        let list: CalendarListResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {}", e))
        })?;

        Ok(list
            .items
            .into_iter()
            .map(|entry| {
                let mut info = CalendarInfo::new(entry.id, entry.summary.unwrap_or_default())
                    .with_primary(entry.primary.unwrap_or(false));
                info.time_zone = entry.time_zone;
                info
            })
            .collect())
    }

    /// Inserts an event and returns it as stored.
    pub async fn insert_event(
        &self,
        access_token: &str,
        draft: &NewEvent,
    ) -> ProviderResult<CalendarEvent> {
        draft.validate().map_err(ProviderError::rejected)?;

        let url = format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(&draft.calendar_id)
        );
        let payload = InsertEventRequest::from_draft(draft);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;
        let body = read_success(response).await?;

        let created: ApiEvent = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {}", e))
        })?;
        convert_event(created)
            .ok_or_else(|| ProviderError::invalid_response("created event is missing fields"))
    }
}

fn request_error(e: reqwest::Error) -> ProviderError {
    let message = if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        format!("request failed: {}", e)
    };
    ProviderError::network(message)
        .with_provider("google")
        .with_source(e)
}

async fn read_success(response: reqwest::Response) -> ProviderResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(map_api_error(status, &body))
    }
}

/// Maps a Calendar API error status into the provider error taxonomy.
pub(crate) fn map_api_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    use reqwest::StatusCode;

    let message = format!("API error ({}): {}", status, body);
    let err = match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("rate limited by Google Calendar API");
            ProviderError::rate_limited(message)
        }
        StatusCode::FORBIDDEN if QUOTA_REASONS.iter().any(|r| body.contains(r)) => {
            warn!("quota exceeded on Google Calendar API");
            ProviderError::rate_limited(message)
        }
        StatusCode::UNAUTHORIZED => ProviderError::unauthorized(message),
        StatusCode::FORBIDDEN => ProviderError::forbidden(message),
        s if s.is_client_error() => ProviderError::rejected(message),
        s if s.is_server_error() => ProviderError::server(message),
        _ => ProviderError::invalid_response(message),
    };
    err.with_provider("google")
}

fn convert_event(event: ApiEvent) -> Option<CalendarEvent> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let id = event.id?;
    let (start, all_day) = parse_time(&event.start).or_else(|| {
        warn!("event {} has no usable start time", id);
        None
    })?;
    let (end, _) = parse_time(&event.end).or_else(|| {
        warn!("event {} has no usable end time", id);
        None
    })?;

    let mut converted = CalendarEvent::new(id, event.summary.unwrap_or_default(), start, end)
        .with_all_day(all_day);
    converted.location = event.location;
    Some(converted)
}

/// Returns the instant and whether it came from an all-day date.
fn parse_time(time: &ApiEventTime) -> Option<(DateTime<Utc>, bool)> {
    if let Some(ref dt) = time.date_time {
        let parsed = DateTime::parse_from_rfc3339(dt)
            .map_err(|e| warn!("failed to parse time {}: {}", dt, e))
            .ok()?;
        return Some((parsed.with_timezone(&Utc), false));
    }
    let date = time.date.as_deref()?;
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| warn!("failed to parse date {}: {}", date, e))
        .ok()?;
    Some((parsed.and_hms_opt(0, 0, 0)?.and_utc(), true))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    location: Option<String>,
    start: ApiEventTime,
    end: ApiEventTime,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
}

impl ApiEventTime {
    fn from_instant(instant: DateTime<Utc>, all_day: bool) -> Self {
        if all_day {
            Self {
                date_time: None,
                date: Some(instant.date_naive().format("%Y-%m-%d").to_string()),
            }
        } else {
            Self {
                date_time: Some(instant.to_rfc3339()),
                date: None,
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertEventRequest {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    start: ApiEventTime,
    end: ApiEventTime,
}

impl InsertEventRequest {
    fn from_draft(draft: &NewEvent) -> Self {
        Self {
            summary: draft.title.clone(),
            location: draft.location.clone(),
            start: ApiEventTime::from_instant(draft.start, draft.all_day),
            end: ApiEventTime::from_instant(draft.end, draft.all_day),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    summary: Option<String>,
    primary: Option<bool>,
    time_zone: Option<String>,
}
