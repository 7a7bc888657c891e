use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::http::{error_text, send_with_backoff};

const GOOGLE_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

/// A single (already expanded) occurrence read from the external calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub recurring_event_id: Option<String>,
}

#[async_trait]
pub trait CalendarSource: Send + Sync + 'static {
    /// Every occurrence overlapping `[time_min, time_max]`, recurring events expanded.
    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> AppResult<Vec<CalendarEvent>>;
}

/// Read-only client for a public Google Calendar, authenticated with an API key.
#[derive(Debug, Clone)]
pub struct GoogleCalendarService {
    client: Client,
    api_key: String,
    calendar_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    end: Option<EventTime>,
    #[serde(default)]
    recurring_event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

impl EventTime {
    /// All-day events only carry a date; they start at midnight UTC.
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            self.date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
    }
}

impl GoogleEvent {
    fn into_calendar_event(self) -> Option<CalendarEvent> {
        if self.status.as_deref() == Some("cancelled") {
            return None;
        }

        let start = self.start.as_ref()?.to_utc()?;
        let end = self.end.as_ref()?.to_utc()?;
        if end <= start {
            tracing::warn!(
                "Dropping calendar event {}: ends at {} before it starts at {}",
                self.id,
                end,
                start
            );
            return None;
        }

        Some(CalendarEvent {
            id: self.id,
            summary: self.summary.unwrap_or_default(),
            location: self.location.filter(|l| !l.trim().is_empty()),
            start,
            end,
            recurring_event_id: self.recurring_event_id,
        })
    }
}

impl GoogleCalendarService {
    /// `None` when the calendar credentials are not configured.
    pub fn from_config(config: &Config) -> AppResult<Option<Self>> {
        let Some((api_key, calendar_id)) = config.calendar.credentials() else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Some(Self {
            client,
            api_key: api_key.to_string(),
            calendar_id: calendar_id.to_string(),
        }))
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendarService {
    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> AppResult<Vec<CalendarEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            GOOGLE_CALENDAR_API_URL,
            urlencoding::encode(&self.calendar_id)
        );
        let time_min = time_min.to_rfc3339();
        let time_max = time_max.to_rfc3339();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = send_with_backoff("Google Calendar", || {
                let mut request = self.client.get(&url).query(&[
                    ("key", self.api_key.as_str()),
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("timeZone", "UTC"),
                    ("maxResults", "250"),
                ]);
                if let Some(token) = page_token.as_deref() {
                    request = request.query(&[("pageToken", token)]);
                }
                request
            })
            .await?;

            if !response.status().is_success() {
                return Err(AppError::CalendarApi(format!(
                    "Failed to list calendar events: {}",
                    error_text(response).await
                )));
            }

            let page: EventsResponse = response.json().await.map_err(|e| {
                AppError::CalendarApi(format!("Failed to parse calendar events: {}", e))
            })?;

            events.extend(page.items.into_iter().filter_map(GoogleEvent::into_calendar_event));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(events)
    }
}
