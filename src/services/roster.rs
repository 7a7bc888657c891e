use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::db::models::{CreateStreamer, Streamer, UpdateStreamerIdentity};
use crate::db::repository::StreamerRepository;
use crate::error::{AppError, AppResult};
use crate::services::twitch::TwitchUser;
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RosterSyncSummary {
    pub updated: usize,
    pub not_found: usize,
    pub id_conflicts: usize,
}

/// Keeps the streamers' identity fields in line with their Twitch accounts.
pub struct RosterManager;

impl RosterManager {
    pub async fn sync_roster(state: &Arc<AppState>) -> AppResult<RosterSyncSummary> {
        let streamers = StreamerRepository::list_all(&state.db).await?;
        info!("Starting roster synchronization for {} streamer(s)", streamers.len());

        let logins: Vec<String> = streamers.iter().map(|s| s.twitch_login.clone()).collect();
        let users: HashMap<String, TwitchUser> = state
            .twitch
            .list_users_by_logins(&logins)
            .await?
            .into_iter()
            .map(|u| (u.login.to_lowercase(), u))
            .collect();

        let mut summary = RosterSyncSummary::default();

        for streamer in &streamers {
            let Some(user) = users.get(&streamer.twitch_login) else {
                warn!("Streamer {} not found on Twitch", streamer.twitch_login);
                summary.not_found += 1;
                continue;
            };

            let identity = identity_for(streamer, user);
            if identity.twitch_id != user.numeric_id() {
                warn!(
                    "Twitch id of {} changed from {:?} to {}; keeping the stored one",
                    streamer.twitch_login, streamer.twitch_id, user.id
                );
                summary.id_conflicts += 1;
            }

            StreamerRepository::update_identity(&state.db, &streamer.id, &identity).await?;
            summary.updated += 1;
        }

        info!(
            "Roster synchronization done: {} updated, {} not found, {} id conflicts",
            summary.updated, summary.not_found, summary.id_conflicts
        );

        Ok(summary)
    }

    /// Register a new streamer, resolving its identity on Twitch.
    pub async fn add_streamer(state: &Arc<AppState>, login: &str) -> AppResult<Streamer> {
        let login = login.trim().to_lowercase();
        if login.is_empty() {
            return Err(AppError::BadRequest("Login must not be empty".to_string()));
        }

        if StreamerRepository::find_by_login(&state.db, &login).await?.is_some() {
            return Err(AppError::BadRequest(format!(
                "Streamer {} is already registered",
                login
            )));
        }

        let user = state
            .twitch
            .list_users_by_logins(std::slice::from_ref(&login))
            .await?
            .into_iter()
            .find(|u| u.login.eq_ignore_ascii_case(&login))
            .ok_or_else(|| AppError::NotFound(format!("Twitch user {} not found", login)))?;

        let streamer = StreamerRepository::create(
            &state.db,
            CreateStreamer {
                twitch_id: user.numeric_id(),
                twitch_login: login,
                name: user.display_name,
                description: user.description.unwrap_or_default(),
                profile_image_url: user.profile_image_url,
                offline_image_url: user.offline_image_url,
            },
        )
        .await?;

        info!("Registered streamer {} ({:?})", streamer.twitch_login, streamer.twitch_id);
        Ok(streamer)
    }
}

/// Fresh identity fields; the stored Twitch id wins over the fetched one.
fn identity_for(streamer: &Streamer, user: &TwitchUser) -> UpdateStreamerIdentity {
    UpdateStreamerIdentity {
        twitch_id: streamer.twitch_id.or_else(|| user.numeric_id()),
        name: user.display_name.clone(),
        description: user.description.clone().unwrap_or_default(),
        profile_image_url: user.profile_image_url.clone(),
        offline_image_url: user.offline_image_url.clone(),
    }
}
