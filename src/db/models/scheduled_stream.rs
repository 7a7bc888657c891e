use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One planned stream occurrence. At least one of the two source ids is set.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ScheduledStream {
    pub id: String,
    pub streamer_id: String,
    pub title: String,
    pub category: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub weekly: bool,
    /// The stream ended before the planned end.
    pub done: bool,
    pub twitch_segment_id: Option<String>,
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by the reconciler, for both inserts and in-place updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStreamFields {
    pub streamer_id: String,
    pub title: String,
    pub category: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub weekly: bool,
    pub twitch_segment_id: Option<String>,
    pub calendar_event_id: Option<String>,
}

impl ScheduledStreamFields {
    pub fn from_stored(stream: &ScheduledStream) -> Self {
        ScheduledStreamFields {
            streamer_id: stream.streamer_id.clone(),
            title: stream.title.clone(),
            category: stream.category.clone(),
            start_at: stream.start_at,
            end_at: stream.end_at,
            weekly: stream.weekly,
            twitch_segment_id: stream.twitch_segment_id.clone(),
            calendar_event_id: stream.calendar_event_id.clone(),
        }
    }
}
