use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Streamer {
    pub id: String,
    /// Platform numeric id. Set once by the roster sync and never changed afterwards.
    pub twitch_id: Option<i64>,
    pub twitch_login: String,
    pub name: String,
    pub description: String,
    pub profile_image_url: Option<String>,
    pub offline_image_url: Option<String>,

    // Live session; `live_started_at` may be missing if the online transition was missed
    pub live: bool,
    pub live_title: Option<String>,
    pub live_game_name: Option<String>,
    pub live_started_at: Option<DateTime<Utc>>,
    pub live_spectators: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamer {
    pub twitch_id: Option<i64>,
    pub twitch_login: String,
    pub name: String,
    pub description: String,
    pub profile_image_url: Option<String>,
    pub offline_image_url: Option<String>,
}

/// Identity fields refreshed from the platform user listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStreamerIdentity {
    pub twitch_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub profile_image_url: Option<String>,
    pub offline_image_url: Option<String>,
}

/// Metadata of a running stream as reported by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveData {
    pub title: Option<String>,
    pub game_name: Option<String>,
    pub spectators: Option<i64>,
}
