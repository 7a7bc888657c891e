use crate::db::models::{ScheduledStream, ScheduledStreamFields};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Schedule storage. Every function takes a connection so the reconciler can run
/// the whole diff inside one transaction.
pub struct ScheduledStreamRepository;

impl ScheduledStreamRepository {
    /// Occurrences that have not ended yet, earliest first
    pub async fn list_future(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ScheduledStream>> {
        sqlx::query_as::<_, ScheduledStream>(
            r#"
            SELECT
                id,
                streamer_id,
                title,
                category,
                start_at,
                end_at,
                weekly,
                done,
                twitch_segment_id,
                calendar_event_id,
                created_at,
                updated_at
            FROM scheduled_streams
            WHERE end_at >= ?
            ORDER BY start_at, id
            "#,
        )
        .bind(now)
        .fetch_all(conn)
        .await
        .map_err(AppError::Database)
    }

    pub async fn delete_future(conn: &mut SqliteConnection, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM scheduled_streams WHERE end_at >= ?")
            .bind(now)
            .execute(conn)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        fields: &ScheduledStreamFields,
    ) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO scheduled_streams (
                id,
                streamer_id,
                title,
                category,
                start_at,
                end_at,
                weekly,
                done,
                twitch_segment_id,
                calendar_event_id,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&fields.streamer_id)
        .bind(&fields.title)
        .bind(&fields.category)
        .bind(fields.start_at)
        .bind(fields.end_at)
        .bind(fields.weekly)
        .bind(&fields.twitch_segment_id)
        .bind(&fields.calendar_event_id)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(id)
    }

    /// Overwrite the synced fields of an existing occurrence. `done` is left untouched.
    pub async fn update(
        conn: &mut SqliteConnection,
        id: &str,
        fields: &ScheduledStreamFields,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_streams
            SET streamer_id = ?,
                title = ?,
                category = ?,
                start_at = ?,
                end_at = ?,
                weekly = ?,
                twitch_segment_id = ?,
                calendar_event_id = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&fields.streamer_id)
        .bind(&fields.title)
        .bind(&fields.category)
        .bind(fields.start_at)
        .bind(fields.end_at)
        .bind(fields.weekly)
        .bind(&fields.twitch_segment_id)
        .bind(&fields.calendar_event_id)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn delete_by_ids(conn: &mut SqliteConnection, ids: &[String]) -> AppResult<u64> {
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM scheduled_streams WHERE id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(AppError::Database)?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }

    /// Flag as done every occurrence of the streamer overlapping the session that
    /// just ended, from `session_start` (or `now` when unknown) to `now`.
    pub async fn mark_done_for_session(
        conn: &mut SqliteConnection,
        streamer_id: &str,
        session_start: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_streams
            SET done = 1,
                updated_at = ?
            WHERE streamer_id = ?
              AND done = 0
              AND start_at <= ?
              AND end_at >= ?
            "#,
        )
        .bind(now)
        .bind(streamer_id)
        .bind(now)
        .bind(session_start.unwrap_or(now))
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_streamer, memory_pool};
    use chrono::Duration;

    fn fields(streamer_id: &str, start: DateTime<Utc>, hours: i64) -> ScheduledStreamFields {
        ScheduledStreamFields {
            streamer_id: streamer_id.to_string(),
            title: "Planned stream".to_string(),
            category: None,
            start_at: start,
            end_at: start + Duration::hours(hours),
            weekly: false,
            twitch_segment_id: Some(Uuid::new_v4().to_string()),
            calendar_event_id: None,
        }
    }

    #[tokio::test]
    async fn list_future_skips_finished_occurrences() {
        let pool = memory_pool().await;
        let streamer = create_streamer(&pool, "alice", Some(1)).await;
        let now = Utc::now();
        let mut conn = pool.acquire().await.unwrap();

        ScheduledStreamRepository::insert(&mut conn, &fields(&streamer.id, now - Duration::hours(5), 2))
            .await
            .unwrap();
        let upcoming_id = ScheduledStreamRepository::insert(
            &mut conn,
            &fields(&streamer.id, now + Duration::hours(1), 2),
        )
        .await
        .unwrap();

        let future = ScheduledStreamRepository::list_future(&mut conn, now)
            .await
            .unwrap();
        assert_eq!(future.len(), 1);
        assert_eq!(future[0].id, upcoming_id);

        let deleted = ScheduledStreamRepository::delete_future(&mut conn, now)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn rows_without_any_source_id_are_rejected() {
        let pool = memory_pool().await;
        let streamer = create_streamer(&pool, "alice", Some(1)).await;
        let mut conn = pool.acquire().await.unwrap();

        let mut orphan = fields(&streamer.id, Utc::now(), 1);
        orphan.twitch_segment_id = None;

        let result = ScheduledStreamRepository::insert(&mut conn, &orphan).await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn rows_that_do_not_end_after_they_start_are_rejected() {
        let pool = memory_pool().await;
        let streamer = create_streamer(&pool, "alice", Some(1)).await;
        let mut conn = pool.acquire().await.unwrap();

        let instant = fields(&streamer.id, Utc::now(), 0);
        let result = ScheduledStreamRepository::insert(&mut conn, &instant).await;
        assert!(matches!(result, Err(AppError::Database(_))));

        let backwards = fields(&streamer.id, Utc::now(), -1);
        let result = ScheduledStreamRepository::insert(&mut conn, &backwards).await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn mark_done_only_touches_overlapping_occurrences() {
        let pool = memory_pool().await;
        let streamer = create_streamer(&pool, "alice", Some(1)).await;
        let now = Utc::now();
        let mut conn = pool.acquire().await.unwrap();

        let covering = ScheduledStreamRepository::insert(
            &mut conn,
            &fields(&streamer.id, now - Duration::minutes(90), 3),
        )
        .await
        .unwrap();
        let tomorrow = ScheduledStreamRepository::insert(
            &mut conn,
            &fields(&streamer.id, now + Duration::days(1), 2),
        )
        .await
        .unwrap();

        let marked = ScheduledStreamRepository::mark_done_for_session(
            &mut conn,
            &streamer.id,
            Some(now - Duration::hours(1)),
            now,
        )
        .await
        .unwrap();
        assert_eq!(marked, 1);

        let future = ScheduledStreamRepository::list_future(&mut conn, now)
            .await
            .unwrap();
        let done: Vec<_> = future.iter().filter(|s| s.done).map(|s| s.id.clone()).collect();
        assert_eq!(done, vec![covering]);
        assert!(future.iter().any(|s| s.id == tomorrow && !s.done));
    }
}
