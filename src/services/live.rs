use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::models::{LiveData, Streamer};
use crate::db::repository::{ScheduledStreamRepository, StreamerRepository};
use crate::error::{AppError, AppResult};
use crate::services::twitch::Stream;
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveSyncSummary {
    pub checked: usize,
    pub went_live: usize,
    pub went_offline: usize,
    pub refreshed: usize,
}

/// Keeps the streamers' live flags and session data in line with Twitch.
pub struct LiveSyncManager;

impl LiveSyncManager {
    /// Poll Twitch for live streams.
    ///
    /// With `full`, every streamer is checked and online/offline transitions are
    /// applied. Otherwise only streamers already live get their metadata refreshed.
    pub async fn sync_live(state: &Arc<AppState>, full: bool) -> AppResult<LiveSyncSummary> {
        let streamers = if full {
            StreamerRepository::list_all(&state.db).await?
        } else {
            StreamerRepository::list_live(&state.db).await?
        };
        let streamers: Vec<Streamer> = streamers
            .into_iter()
            .filter(|s| s.twitch_id.is_some())
            .collect();

        info!(
            "Starting live synchronization for {} streamer(s) (full: {})",
            streamers.len(),
            full
        );

        let ids: Vec<i64> = streamers.iter().filter_map(|s| s.twitch_id).collect();
        let streams: HashMap<i64, Stream> = state
            .twitch
            .list_streams(&ids)
            .await?
            .into_iter()
            .filter_map(|s| s.numeric_user_id().map(|id| (id, s)))
            .collect();

        let mut summary = LiveSyncSummary {
            checked: streamers.len(),
            ..Default::default()
        };

        for streamer in &streamers {
            let stream = streamer.twitch_id.and_then(|id| streams.get(&id));
            match stream {
                Some(stream) => {
                    if !streamer.live && full {
                        let started_at = stream.started_at.unwrap_or_else(Utc::now);
                        Self::go_online(&state.db, streamer, started_at).await?;
                        summary.went_live += 1;
                    }
                    StreamerRepository::update_live_data(&state.db, &streamer.id, &live_data_from(stream))
                        .await?;
                    summary.refreshed += 1;
                }
                None if full && streamer.live => {
                    Self::go_offline(&state.db, streamer).await?;
                    summary.went_offline += 1;
                }
                None => {}
            }
        }

        info!(
            "Live synchronization done: {} checked, {} went live, {} went offline, {} refreshed",
            summary.checked, summary.went_live, summary.went_offline, summary.refreshed
        );

        Ok(summary)
    }

    pub async fn go_online(
        db: &SqlitePool,
        streamer: &Streamer,
        started_at: DateTime<Utc>,
    ) -> AppResult<()> {
        StreamerRepository::start_stream(db, &streamer.id, started_at).await?;
        info!("{} is now live (since {})", streamer.twitch_login, started_at);
        Ok(())
    }

    /// Mark the streamer offline and flag the schedule occurrences covering the
    /// session as done, atomically. Returns how many occurrences were flagged.
    pub async fn go_offline(db: &SqlitePool, streamer: &Streamer) -> AppResult<u64> {
        let now = Utc::now();
        let mut tx = db.begin().await.map_err(AppError::Database)?;

        let done = ScheduledStreamRepository::mark_done_for_session(
            &mut tx,
            &streamer.id,
            streamer.live_started_at,
            now,
        )
        .await?;
        StreamerRepository::end_stream(&mut tx, &streamer.id).await?;

        tx.commit().await.map_err(AppError::Database)?;

        info!(
            "{} is now offline; {} scheduled stream(s) marked done",
            streamer.twitch_login, done
        );
        Ok(done)
    }

    /// Fetch the current stream of one streamer and store its metadata.
    /// Logged and ignored on failure.
    pub async fn refresh_live_data(state: &Arc<AppState>, streamer: &Streamer) {
        let Some(twitch_id) = streamer.twitch_id else {
            return;
        };

        let result = async {
            let streams = state.twitch.list_streams(&[twitch_id]).await?;
            if let Some(stream) = streams.first() {
                StreamerRepository::update_live_data(&state.db, &streamer.id, &live_data_from(stream))
                    .await?;
            }
            Ok::<_, AppError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(
                "Failed to refresh live data for {}: {:?}",
                streamer.twitch_login, e
            );
        }
    }
}

fn live_data_from(stream: &Stream) -> LiveData {
    LiveData {
        title: Some(stream.title.clone()).filter(|t| !t.is_empty()),
        game_name: Some(stream.game_name.clone()).filter(|g| !g.is_empty()),
        spectators: Some(stream.viewer_count),
    }
}
