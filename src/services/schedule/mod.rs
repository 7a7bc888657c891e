//! Schedule reconciliation: platform and calendar events are fetched, calendar
//! events are attributed to streamers, both sets are merged, and the result is
//! diffed against the stored future occurrences.

pub mod aliases;
pub mod matcher;
pub mod merge;
pub mod reconcile;
pub mod sources;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::models::{ScheduledStreamFields, Streamer};
use crate::db::repository::StreamerRepository;
use crate::error::AppResult;
use crate::AppState;

use self::aliases::AliasGenerator;
use self::matcher::StreamerMatcher;
pub use self::reconcile::ReconcileSummary;

/// The parts of a streamer the schedule pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerRef {
    pub id: String,
    pub login: String,
    pub name: String,
}

impl From<&Streamer> for StreamerRef {
    fn from(streamer: &Streamer) -> Self {
        StreamerRef {
            id: streamer.id.clone(),
            login: streamer.twitch_login.clone(),
            name: streamer.name.clone(),
        }
    }
}

/// A streamer that may own a calendar event, with the confidence of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub streamer: StreamerRef,
    pub weight: u32,
}

/// A schedule occurrence as fetched from one of the sources, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScheduleEvent {
    pub streamer: StreamerRef,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub category: Option<String>,
    pub weekly: bool,
    pub twitch_segment_id: Option<String>,
    pub calendar_event_id: Option<String>,
    /// Ranked candidates; only set on calendar events between matching and merging.
    pub candidate_streamers: Option<Vec<Candidate>>,
}

impl RawScheduleEvent {
    /// Closed-interval overlap: touching bounds count.
    pub fn overlaps(&self, other: &RawScheduleEvent) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn to_fields(&self) -> ScheduledStreamFields {
        ScheduledStreamFields {
            streamer_id: self.streamer.id.clone(),
            title: self.title.clone(),
            category: self.category.clone(),
            start_at: self.start,
            end_at: self.end,
            weekly: self.weekly,
            twitch_segment_id: self.twitch_segment_id.clone(),
            calendar_event_id: self.calendar_event_id.clone(),
        }
    }
}

/// Runs the whole fetch, match, merge and reconcile pipeline.
pub struct ScheduleSyncManager;

impl ScheduleSyncManager {
    /// One reconciliation run. With `reset`, every future occurrence is dropped
    /// before the fetched ones are stored.
    pub async fn sync(state: &Arc<AppState>, reset: bool) -> AppResult<ReconcileSummary> {
        let now = Utc::now();
        let fetch_until = state.config.schedule.fetch_until();
        info!(
            "Starting schedule synchronization (reset: {}, horizon: {} days)",
            reset, state.config.schedule.fetch_until_days
        );

        let streamers = StreamerRepository::list_all(&state.db).await?;

        let (platform_events, calendar_events) = tokio::join!(
            sources::fetch_platform_events(state.twitch.as_ref(), &streamers, now, fetch_until),
            sources::fetch_calendar_events(state.calendar.as_deref(), now, fetch_until),
        );
        info!(
            "{} scheduled streams loaded from Twitch, {} from the calendar",
            platform_events.len(),
            calendar_events.len()
        );

        let generator = AliasGenerator::new(&state.config.schedule.alias_denylist);
        let matcher = StreamerMatcher::new(&streamers, &generator);
        let attributed = matcher.resolve_all(&calendar_events);

        let merged = merge::merge_events(platform_events, attributed);
        info!("{} scheduled streams after merge", merged.len());

        let summary = reconcile::reconcile(&state.db, &merged, reset, now).await?;
        info!(
            "Schedule synchronized: {} inserted, {} updated, {} unchanged, {} deleted",
            summary.inserted, summary.updated, summary.unchanged, summary.deleted
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::ScheduledStreamRepository;
    use crate::services::calendar::CalendarEvent;
    use crate::services::twitch::{SchedulePage, ScheduleSegment};
    use crate::test_support::{create_streamer, memory_pool, test_state, FakeCalendar, FakePlatform};
    use chrono::Duration;

    fn segment(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> ScheduleSegment {
        ScheduleSegment {
            id: id.to_string(),
            start_time: start,
            end_time: Some(end),
            title: "Twitch title".to_string(),
            canceled_until: None,
            category: None,
            is_recurring: true,
        }
    }

    fn calendar_event(id: &str, summary: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            summary: summary.to_string(),
            location: None,
            start,
            end,
            recurring_event_id: None,
        }
    }

    #[tokio::test]
    async fn full_pipeline_merges_and_is_rerunnable() {
        let pool = memory_pool().await;
        let alice = create_streamer(&pool, "alice", Some(11)).await;
        create_streamer(&pool, "bob", Some(22)).await;

        let base = Utc::now() + Duration::days(1);
        let platform = FakePlatform::default();
        platform.set_schedule(
            11,
            SchedulePage {
                segments: vec![segment("seg-a", base + Duration::minutes(30), base + Duration::hours(2))],
                cursor: None,
            },
        );
        let calendar = FakeCalendar::with_events(vec![
            // Overlaps alice's segment
            calendar_event("cal-a", "alice / Calendar title", base, base + Duration::hours(1)),
            // Standalone
            calendar_event("cal-b", "bob", base + Duration::days(2), base + Duration::days(2) + Duration::hours(1)),
            // Nobody
            calendar_event("cal-x", "Staff meeting", base, base + Duration::hours(1)),
        ]);
        let state = test_state(pool.clone(), platform, Some(calendar));

        let first = ScheduleSyncManager::sync(&state, false).await.unwrap();
        assert_eq!(first.inserted, 2);

        let second = ScheduleSyncManager::sync(&state, false).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.deleted, 0);

        let mut conn = pool.acquire().await.unwrap();
        let rows = ScheduledStreamRepository::list_future(&mut conn, Utc::now())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let merged = rows.iter().find(|r| r.streamer_id == alice.id).unwrap();
        assert_eq!(merged.twitch_segment_id.as_deref(), Some("seg-a"));
        assert_eq!(merged.calendar_event_id.as_deref(), Some("cal-a"));
        assert_eq!(merged.title, "Twitch title");

        let standalone = rows.iter().find(|r| r.streamer_id != alice.id).unwrap();
        assert!(standalone.twitch_segment_id.is_none());
        assert_eq!(standalone.calendar_event_id.as_deref(), Some("cal-b"));
        assert_eq!(standalone.title, "bob");
    }

    #[tokio::test]
    async fn withdrawn_occurrences_are_deleted_on_next_run() {
        let pool = memory_pool().await;
        create_streamer(&pool, "alice", Some(11)).await;

        let base = Utc::now() + Duration::days(1);
        let platform = FakePlatform::default();
        platform.set_schedule(
            11,
            SchedulePage {
                segments: vec![segment("seg-a", base, base + Duration::hours(2))],
                cursor: None,
            },
        );
        let state = test_state(pool.clone(), platform.clone(), None);
        ScheduleSyncManager::sync(&state, false).await.unwrap();

        platform.set_schedule(11, SchedulePage::default());
        let summary = ScheduleSyncManager::sync(&state, false).await.unwrap();
        assert_eq!(summary.deleted, 1);
    }

    #[tokio::test]
    async fn rescheduled_segment_replaces_its_occurrence() {
        let pool = memory_pool().await;
        create_streamer(&pool, "alice", Some(11)).await;

        let base = Utc::now() + Duration::days(1);
        let platform = FakePlatform::default();
        platform.set_schedule(
            11,
            SchedulePage {
                segments: vec![segment("seg-a", base, base + Duration::hours(2))],
                cursor: None,
            },
        );
        let state = test_state(pool.clone(), platform.clone(), None);
        ScheduleSyncManager::sync(&state, false).await.unwrap();

        let moved = base + Duration::hours(1);
        platform.set_schedule(
            11,
            SchedulePage {
                segments: vec![segment("seg-a", moved, moved + Duration::hours(2))],
                cursor: None,
            },
        );
        let summary = ScheduleSyncManager::sync(&state, false).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted, 0);

        let mut conn = pool.acquire().await.unwrap();
        let rows = ScheduledStreamRepository::list_future(&mut conn, Utc::now())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_at, moved);
    }

    #[tokio::test]
    async fn calendar_event_without_duration_is_not_stored() {
        let pool = memory_pool().await;
        create_streamer(&pool, "alice", Some(11)).await;

        let at = Utc::now() + Duration::days(1);
        let calendar = FakeCalendar::with_events(vec![calendar_event("cal-a", "alice", at, at)]);
        let state = test_state(pool.clone(), FakePlatform::default(), Some(calendar));

        let summary = ScheduleSyncManager::sync(&state, false).await.unwrap();
        assert_eq!(summary.inserted, 0);

        let mut conn = pool.acquire().await.unwrap();
        assert!(ScheduledStreamRepository::list_future(&mut conn, Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn overlap_is_inclusive() {
        let start = Utc::now();
        let streamer = StreamerRef {
            id: "s".to_string(),
            login: "s".to_string(),
            name: "S".to_string(),
        };
        let event = |from: i64, to: i64| RawScheduleEvent {
            streamer: streamer.clone(),
            title: String::new(),
            start: start + Duration::minutes(from),
            end: start + Duration::minutes(to),
            category: None,
            weekly: false,
            twitch_segment_id: None,
            calendar_event_id: None,
            candidate_streamers: None,
        };

        assert!(event(0, 60).overlaps(&event(60, 120)));
        assert!(event(0, 60).overlaps(&event(30, 45)));
        assert!(!event(0, 60).overlaps(&event(61, 120)));
    }
}
