use crate::db::models::{CreateEventSubSubscription, EventSubSubscription};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = r#"
    id,
    twitch_subscription_id,
    streamer_id,
    subscription_type,
    secret,
    status,
    last_seen,
    created_at,
    updated_at
"#;

pub struct EventSubSubscriptionRepository;

impl EventSubSubscriptionRepository {
    /// Create a new EventSub subscription
    pub async fn create(
        pool: &SqlitePool,
        streamer_id: &str,
        subscription: CreateEventSubSubscription,
    ) -> AppResult<EventSubSubscription> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let twitch_subscription_id = normalize_uuid(&subscription.twitch_subscription_id);

        sqlx::query(
            r#"
            INSERT INTO eventsub_subscriptions (
                id,
                twitch_subscription_id,
                streamer_id,
                subscription_type,
                secret,
                status,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&twitch_subscription_id)
        .bind(streamer_id)
        .bind(&subscription.subscription_type)
        .bind(&subscription.secret)
        .bind(subscription.status.as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_twitch_subscription_id(pool, &twitch_subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound("EventSub subscription not found".to_string()))
    }

    /// List all subscriptions for a streamer
    pub async fn find_by_streamer_id(
        pool: &SqlitePool,
        streamer_id: &str,
    ) -> AppResult<Vec<EventSubSubscription>> {
        sqlx::query_as::<_, EventSubSubscription>(&format!(
            "SELECT {} FROM eventsub_subscriptions WHERE streamer_id = ? ORDER BY subscription_type",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(streamer_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn exists_for(
        pool: &SqlitePool,
        streamer_id: &str,
        subscription_type: &str,
    ) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM eventsub_subscriptions WHERE streamer_id = ? AND subscription_type = ?",
        )
        .bind(streamer_id)
        .bind(subscription_type)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count > 0)
    }

    /// Find a subscription by Twitch subscription id, in any UUID spelling
    pub async fn find_by_twitch_subscription_id(
        pool: &SqlitePool,
        twitch_subscription_id: &str,
    ) -> AppResult<Option<EventSubSubscription>> {
        sqlx::query_as::<_, EventSubSubscription>(&format!(
            "SELECT {} FROM eventsub_subscriptions WHERE twitch_subscription_id = ?",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(normalize_uuid(twitch_subscription_id))
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Persist the mutable lifecycle fields (status and last-seen time)
    pub async fn save_state(pool: &SqlitePool, subscription: &EventSubSubscription) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE eventsub_subscriptions
            SET status = ?,
                last_seen = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&subscription.status)
        .bind(subscription.last_seen)
        .bind(Utc::now())
        .bind(&subscription.id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete a subscription
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM eventsub_subscriptions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }
}

/// Twitch sends hyphenated lowercase UUIDs; anything parseable is stored that way.
fn normalize_uuid(raw: &str) -> String {
    Uuid::parse_str(raw.trim())
        .map(|u| u.hyphenated().to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}
