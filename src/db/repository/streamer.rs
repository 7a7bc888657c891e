use crate::db::models::{CreateStreamer, LiveData, Streamer, UpdateStreamerIdentity};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

const STREAMER_COLUMNS: &str = r#"
    id,
    twitch_id,
    twitch_login,
    name,
    description,
    profile_image_url,
    offline_image_url,
    live,
    live_title,
    live_game_name,
    live_started_at,
    live_spectators,
    created_at,
    updated_at
"#;

pub struct StreamerRepository;

impl StreamerRepository {
    /// List every tracked streamer in roster order (oldest registration first)
    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers ORDER BY created_at, twitch_login",
            STREAMER_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_live(pool: &SqlitePool) -> AppResult<Vec<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers WHERE live = 1 ORDER BY created_at, twitch_login",
            STREAMER_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers WHERE id = ?",
            STREAMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Logins are matched case-insensitively, Twitch logins being lowercase.
    pub async fn find_by_login(pool: &SqlitePool, login: &str) -> AppResult<Option<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers WHERE twitch_login = ?",
            STREAMER_COLUMNS
        ))
        .bind(login.to_lowercase())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn create(pool: &SqlitePool, streamer: CreateStreamer) -> AppResult<Streamer> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO streamers (
                id,
                twitch_id,
                twitch_login,
                name,
                description,
                profile_image_url,
                offline_image_url,
                live,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(streamer.twitch_id)
        .bind(streamer.twitch_login.to_lowercase())
        .bind(&streamer.name)
        .bind(&streamer.description)
        .bind(&streamer.profile_image_url)
        .bind(&streamer.offline_image_url)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("Streamer not found after creation".to_string()))
    }

    pub async fn update_identity(
        pool: &SqlitePool,
        id: &str,
        identity: &UpdateStreamerIdentity,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE streamers
            SET twitch_id = ?,
                name = ?,
                description = ?,
                profile_image_url = ?,
                offline_image_url = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(identity.twitch_id)
        .bind(&identity.name)
        .bind(&identity.description)
        .bind(&identity.profile_image_url)
        .bind(&identity.offline_image_url)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Flag the streamer live, recording when the session started
    pub async fn start_stream(
        pool: &SqlitePool,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE streamers
            SET live = 1,
                live_started_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(started_at)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn update_live_data(pool: &SqlitePool, id: &str, data: &LiveData) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE streamers
            SET live_title = ?,
                live_game_name = ?,
                live_spectators = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&data.title)
        .bind(&data.game_name)
        .bind(data.spectators)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Title and category from a `channel.update` notification; the viewer count is left as is.
    pub async fn update_channel_info(
        pool: &SqlitePool,
        id: &str,
        title: &str,
        game_name: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE streamers
            SET live_title = ?,
                live_game_name = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(game_name)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Clear the live flag and session data. Runs on a connection so it can share
    /// a transaction with the schedule update of the offline transition.
    pub async fn end_stream(conn: &mut SqliteConnection, id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE streamers
            SET live = 0,
                live_started_at = NULL,
                live_spectators = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
