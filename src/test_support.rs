//! Shared fixtures for unit tests: an in-memory database and in-process fakes of
//! the upstream clients.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::models::{CreateStreamer, Streamer};
use crate::db::repository::StreamerRepository;
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarEvent, CalendarSource};
use crate::services::twitch::{
    CreatedSubscription, SchedulePage, Stream, StreamingPlatform, TwitchUser,
};
use crate::AppState;

/// Single-connection in-memory database with the schema applied. The connection
/// is never recycled, otherwise the database would vanish with it.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");

    pool
}

/// Insert a streamer whose display name is its login.
pub async fn create_streamer(pool: &SqlitePool, login: &str, twitch_id: Option<i64>) -> Streamer {
    StreamerRepository::create(
        pool,
        CreateStreamer {
            twitch_id,
            twitch_login: login.to_string(),
            name: login.to_string(),
            description: String::new(),
            profile_image_url: None,
            offline_image_url: None,
        },
    )
    .await
    .expect("streamer created")
}

/// A streamer that only exists in memory.
pub fn streamer_fixture(login: &str, name: &str) -> Streamer {
    let now = Utc::now();
    Streamer {
        id: uuid::Uuid::new_v4().to_string(),
        twitch_id: None,
        twitch_login: login.to_string(),
        name: name.to_string(),
        description: String::new(),
        profile_image_url: None,
        offline_image_url: None,
        live: false,
        live_title: None,
        live_game_name: None,
        live_started_at: None,
        live_spectators: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn live_stream(twitch_id: i64, title: &str, started_at: Option<DateTime<Utc>>) -> Stream {
    Stream {
        user_id: twitch_id.to_string(),
        user_login: format!("user{}", twitch_id),
        user_name: format!("User{}", twitch_id),
        game_name: "Science & Technology".to_string(),
        title: title.to_string(),
        viewer_count: 42,
        started_at,
        thumbnail_url: String::new(),
    }
}

pub fn twitch_user(id: i64, login: &str, display_name: &str) -> TwitchUser {
    TwitchUser {
        id: id.to_string(),
        login: login.to_string(),
        display_name: display_name.to_string(),
        description: Some(format!("{} streams science", display_name)),
        profile_image_url: Some(format!("https://static-cdn.jtvnw.net/{}.png", login)),
        offline_image_url: None,
    }
}

pub fn test_state(pool: SqlitePool, platform: FakePlatform, calendar: Option<FakeCalendar>) -> Arc<AppState> {
    Arc::new(AppState {
        db: pool,
        config: Config::default(),
        twitch: Arc::new(platform),
        calendar: calendar.map(|c| Arc::new(c) as Arc<dyn CalendarSource>),
    })
}

/// A subscription request received by [`FakePlatform`].
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub subscription_type: String,
    pub callback_url: String,
    pub secret: String,
    pub condition: serde_json::Value,
}

#[derive(Default)]
struct FakePlatformState {
    users: Vec<TwitchUser>,
    live: Vec<Stream>,
    schedules: HashMap<i64, Vec<SchedulePage>>,
    failing_schedules: HashSet<i64>,
    schedule_requests: usize,
    created: Vec<SubscriptionRequest>,
    failing_subscription_types: HashSet<String>,
    fail_deletions: bool,
}

/// Scriptable stand-in for Twitch. Clones share their state.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakePlatformState>>,
}

impl FakePlatform {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakePlatformState> {
        self.state.lock().expect("fake platform lock")
    }

    pub fn set_users(&self, users: Vec<TwitchUser>) {
        self.lock().users = users;
    }

    pub fn set_live(&self, streams: Vec<Stream>) {
        self.lock().live = streams;
    }

    /// Replace a broadcaster's schedule with a single page.
    pub fn set_schedule(&self, broadcaster_id: i64, page: SchedulePage) {
        self.lock().schedules.insert(broadcaster_id, vec![page]);
    }

    /// Append a page; a page is served for the cursor of the page before it.
    pub fn push_schedule_page(&self, broadcaster_id: i64, page: SchedulePage) {
        self.lock().schedules.entry(broadcaster_id).or_default().push(page);
    }

    pub fn fail_schedule_for(&self, broadcaster_id: i64) {
        self.lock().failing_schedules.insert(broadcaster_id);
    }

    pub fn schedule_requests(&self) -> usize {
        self.lock().schedule_requests
    }

    pub fn created_subscriptions(&self) -> Vec<SubscriptionRequest> {
        self.lock().created.clone()
    }

    pub fn fail_subscription_type(&self, subscription_type: &str) {
        self.lock()
            .failing_subscription_types
            .insert(subscription_type.to_string());
    }

    pub fn fail_deletions(&self, fail: bool) {
        self.lock().fail_deletions = fail;
    }
}

#[async_trait]
impl StreamingPlatform for FakePlatform {
    async fn list_users_by_logins(&self, logins: &[String]) -> AppResult<Vec<TwitchUser>> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| logins.iter().any(|l| l.eq_ignore_ascii_case(&u.login)))
            .cloned()
            .collect())
    }

    async fn list_users_by_ids(&self, ids: &[i64]) -> AppResult<Vec<TwitchUser>> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| u.numeric_id().map_or(false, |id| ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn list_streams(&self, user_ids: &[i64]) -> AppResult<Vec<Stream>> {
        Ok(self
            .lock()
            .live
            .iter()
            .filter(|s| s.numeric_user_id().map_or(false, |id| user_ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn get_schedule_page(
        &self,
        broadcaster_id: i64,
        after: Option<&str>,
    ) -> AppResult<Option<SchedulePage>> {
        let mut state = self.lock();
        state.schedule_requests += 1;

        if state.failing_schedules.contains(&broadcaster_id) {
            return Err(AppError::TwitchApi("schedule unavailable".to_string()));
        }

        let Some(pages) = state.schedules.get(&broadcaster_id) else {
            return Ok(None);
        };

        let index = match after {
            None => Some(0),
            Some(cursor) => pages
                .iter()
                .position(|p| p.cursor.as_deref() == Some(cursor))
                .map(|i| i + 1),
        };

        Ok(Some(
            index
                .and_then(|i| pages.get(i).cloned())
                .unwrap_or_default(),
        ))
    }

    async fn create_subscription(
        &self,
        subscription_type: &str,
        callback_url: &str,
        secret: &str,
        condition: serde_json::Value,
    ) -> AppResult<CreatedSubscription> {
        let mut state = self.lock();
        if state.failing_subscription_types.contains(subscription_type) {
            return Err(AppError::TwitchApi(format!(
                "Failed to create {} subscription",
                subscription_type
            )));
        }

        state.created.push(SubscriptionRequest {
            subscription_type: subscription_type.to_string(),
            callback_url: callback_url.to_string(),
            secret: secret.to_string(),
            condition,
        });

        Ok(CreatedSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_type: subscription_type.to_string(),
            status: "webhook_callback_verification_pending".to_string(),
        })
    }

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<()> {
        if self.lock().fail_deletions {
            return Err(AppError::TwitchApi(format!(
                "Failed to delete subscription {}",
                subscription_id
            )));
        }
        Ok(())
    }
}

/// Calendar returning a fixed list of occurrences, or always failing.
pub struct FakeCalendar {
    events: Vec<CalendarEvent>,
    failing: bool,
}

impl FakeCalendar {
    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        FakeCalendar {
            events,
            failing: false,
        }
    }

    pub fn failing() -> Self {
        FakeCalendar {
            events: Vec::new(),
            failing: true,
        }
    }
}

#[async_trait]
impl CalendarSource for FakeCalendar {
    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> AppResult<Vec<CalendarEvent>> {
        if self.failing {
            return Err(AppError::CalendarApi("calendar unavailable".to_string()));
        }

        Ok(self
            .events
            .iter()
            .filter(|e| e.end >= time_min && e.start <= time_max)
            .cloned()
            .collect())
    }
}
