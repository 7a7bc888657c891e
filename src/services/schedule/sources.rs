use chrono::{DateTime, Duration, Utc};

use crate::db::models::Streamer;
use crate::services::calendar::{CalendarEvent, CalendarSource};
use crate::services::schedule::{RawScheduleEvent, StreamerRef};
use crate::services::twitch::{ScheduleSegment, StreamingPlatform};

/// Schedule segments of every streamer starting within `fetch_until` from `now`.
///
/// Streamers are fetched concurrently; results keep roster order. A streamer
/// whose schedule cannot be read is skipped with a warning.
pub async fn fetch_platform_events(
    platform: &dyn StreamingPlatform,
    streamers: &[Streamer],
    now: DateTime<Utc>,
    fetch_until: Duration,
) -> Vec<RawScheduleEvent> {
    let mut pending = Vec::new();
    for streamer in streamers {
        let Some(broadcaster_id) = streamer.twitch_id else {
            tracing::debug!("Streamer {} has no Twitch id yet; skipping schedule", streamer.twitch_login);
            continue;
        };
        pending.push(async move {
            let result = fetch_streamer_segments(platform, broadcaster_id, now, fetch_until).await;
            (streamer, result)
        });
    }

    let mut events = Vec::new();
    for (streamer, result) in futures::future::join_all(pending).await {
        match result {
            Ok(segments) => {
                let owner = StreamerRef::from(streamer);
                events.extend(
                    segments
                        .into_iter()
                        .filter_map(|segment| segment_to_event(&owner, segment)),
                );
            }
            Err(e) => tracing::warn!(
                "Failed to load Twitch schedule for {}: {:?}",
                streamer.twitch_login,
                e
            ),
        }
    }

    events
}

/// Walk the schedule pages until the horizon is passed or the pages run out.
async fn fetch_streamer_segments(
    platform: &dyn StreamingPlatform,
    broadcaster_id: i64,
    now: DateTime<Utc>,
    fetch_until: Duration,
) -> crate::error::AppResult<Vec<ScheduleSegment>> {
    let mut segments = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let Some(page) = platform
            .get_schedule_page(broadcaster_id, cursor.as_deref())
            .await?
        else {
            // No schedule at all for this broadcaster
            return Ok(segments);
        };

        for segment in page.segments {
            if segment.start_time - now >= fetch_until {
                return Ok(segments);
            }
            segments.push(segment);
        }

        match page.cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(segments),
        }
    }
}

fn segment_to_event(owner: &StreamerRef, segment: ScheduleSegment) -> Option<RawScheduleEvent> {
    if segment.canceled_until.is_some() {
        return None;
    }
    let end = segment.end_time?;
    if end <= segment.start_time {
        tracing::warn!(
            "Dropping Twitch segment {} of {}: ends at {} before it starts at {}",
            segment.id,
            owner.login,
            end,
            segment.start_time
        );
        return None;
    }

    Some(RawScheduleEvent {
        streamer: owner.clone(),
        title: segment.title,
        start: segment.start_time,
        end,
        category: segment.category.map(|c| c.name),
        weekly: segment.is_recurring,
        twitch_segment_id: Some(segment.id),
        calendar_event_id: None,
        candidate_streamers: None,
    })
}

/// Calendar occurrences between `now` and the horizon. An unreachable calendar
/// yields no events so the run continues with the platform alone.
pub async fn fetch_calendar_events(
    calendar: Option<&dyn CalendarSource>,
    now: DateTime<Utc>,
    fetch_until: Duration,
) -> Vec<CalendarEvent> {
    let Some(calendar) = calendar else {
        tracing::info!("No streams loaded from the calendar: API key or calendar ID not configured");
        return Vec::new();
    };

    match calendar.list_events(now, now + fetch_until).await {
        Ok(events) => events
            .into_iter()
            .filter(|event| {
                let valid = event.start < event.end;
                if !valid {
                    tracing::warn!(
                        "Dropping calendar event {}: ends at {} before it starts at {}",
                        event.id,
                        event.end,
                        event.start
                    );
                }
                valid
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to load calendar events; continuing without them: {:?}", e);
            Vec::new()
        }
    }
}
