use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::models::{
    CreateEventSubSubscription, EventSubSubscription, Streamer, SubscriptionState,
    SUBSCRIPTION_TYPES,
};
use crate::db::repository::{EventSubSubscriptionRepository, StreamerRepository};
use crate::error::{AppError, AppResult};
use crate::AppState;

const SECRET_LENGTH: usize = 32;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeReport {
    pub created: usize,
    pub already_subscribed: usize,
    /// `(login, subscription type, error)`
    pub failed: Vec<(String, String, String)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnsubscribeReport {
    pub deleted: usize,
    /// `(login, subscription type, error)`
    pub failed: Vec<(String, String, String)>,
}

pub struct SubscriptionManager;

impl SubscriptionManager {
    pub fn callback_url(config: &Config) -> String {
        format!("{}/webhooks/twitch", config.server.webhook_url)
    }

    pub fn generate_secret() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Request one EventSub subscription and record it as pending until Twitch
    /// calls back with the verification challenge.
    pub async fn subscribe_to(
        state: &Arc<AppState>,
        streamer: &Streamer,
        subscription_type: &str,
    ) -> AppResult<EventSubSubscription> {
        let twitch_id = streamer.twitch_id.ok_or_else(|| {
            AppError::BadRequest(format!(
                "Streamer {} has no Twitch id; run the roster sync first",
                streamer.twitch_login
            ))
        })?;

        let secret = Self::generate_secret();
        let created = state
            .twitch
            .create_subscription(
                subscription_type,
                &Self::callback_url(&state.config),
                &secret,
                serde_json::json!({ "broadcaster_user_id": twitch_id.to_string() }),
            )
            .await?;

        let subscription = EventSubSubscriptionRepository::create(
            &state.db,
            &streamer.id,
            CreateEventSubSubscription {
                twitch_subscription_id: created.id,
                subscription_type: subscription_type.to_string(),
                secret,
                status: SubscriptionState::Pending,
            },
        )
        .await?;

        info!(
            "Requested EventSub {} for {} (subscription {})",
            subscription_type, streamer.twitch_login, subscription.twitch_subscription_id
        );

        Ok(subscription)
    }

    /// Subscribe every streamer to every event type it is not subscribed to yet.
    pub async fn subscribe_all(state: &Arc<AppState>) -> AppResult<SubscribeReport> {
        let streamers = StreamerRepository::list_all(&state.db).await?;
        let mut report = SubscribeReport::default();

        for streamer in streamers.iter().filter(|s| s.twitch_id.is_some()) {
            for subscription_type in SUBSCRIPTION_TYPES {
                if EventSubSubscriptionRepository::exists_for(&state.db, &streamer.id, subscription_type)
                    .await?
                {
                    report.already_subscribed += 1;
                    continue;
                }

                match Self::subscribe_to(state, streamer, subscription_type).await {
                    Ok(_) => report.created += 1,
                    Err(e) => {
                        warn!(
                            "Failed to subscribe {} to {}: {}",
                            streamer.twitch_login, subscription_type, e
                        );
                        report.failed.push((
                            streamer.twitch_login.clone(),
                            subscription_type.to_string(),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        info!(
            "EventSub subscribe done: {} created, {} already subscribed, {} failed",
            report.created,
            report.already_subscribed,
            report.failed.len()
        );

        Ok(report)
    }

    /// Delete the subscriptions of the given streamers (all streamers when
    /// `logins` is empty), upstream first. A row is only removed once Twitch
    /// accepted the deletion.
    pub async fn unsubscribe(state: &Arc<AppState>, logins: &[String]) -> AppResult<UnsubscribeReport> {
        let streamers = if logins.is_empty() {
            StreamerRepository::list_all(&state.db).await?
        } else {
            let mut selected = Vec::with_capacity(logins.len());
            for login in logins {
                match StreamerRepository::find_by_login(&state.db, login).await? {
                    Some(s) => selected.push(s),
                    None => warn!("Unknown streamer {}; nothing to unsubscribe", login),
                }
            }
            selected
        };

        let mut report = UnsubscribeReport::default();

        for streamer in &streamers {
            let subscriptions =
                EventSubSubscriptionRepository::find_by_streamer_id(&state.db, &streamer.id).await?;

            for subscription in subscriptions {
                let result = async {
                    state
                        .twitch
                        .delete_subscription(&subscription.twitch_subscription_id)
                        .await?;
                    EventSubSubscriptionRepository::delete(&state.db, &subscription.id).await
                }
                .await;

                match result {
                    Ok(()) => {
                        info!(
                            "Unsubscribed {} from {}",
                            streamer.twitch_login, subscription.subscription_type
                        );
                        report.deleted += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Failed to unsubscribe {} from {}: {}",
                            streamer.twitch_login, subscription.subscription_type, e
                        );
                        report.failed.push((
                            streamer.twitch_login.clone(),
                            subscription.subscription_type.clone(),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_streamer, memory_pool, test_state, FakePlatform};

    #[test]
    fn secrets_are_random_alphanumeric() {
        let a = SubscriptionManager::generate_secret();
        let b = SubscriptionManager::generate_secret();
        assert_eq!(a.len(), SECRET_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn subscribe_all_creates_missing_pending_rows_once() {
        let pool = memory_pool().await;
        let alice = create_streamer(&pool, "alice", Some(1)).await;
        create_streamer(&pool, "noid", None).await;

        let platform = FakePlatform::default();
        let state = test_state(pool.clone(), platform.clone(), None);

        let report = SubscriptionManager::subscribe_all(&state).await.unwrap();
        assert_eq!(report.created, 3);
        assert!(report.failed.is_empty());

        let rows = EventSubSubscriptionRepository::find_by_streamer_id(&pool, &alice.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.state() == SubscriptionState::Pending));

        let requests = platform.created_subscriptions();
        assert!(requests
            .iter()
            .all(|r| r.callback_url == "http://localhost:8080/webhooks/twitch"));
        assert!(requests
            .iter()
            .all(|r| r.condition["broadcaster_user_id"] == "1"));

        let again = SubscriptionManager::subscribe_all(&state).await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.already_subscribed, 3);
    }

    #[tokio::test]
    async fn failures_are_reported_per_type() {
        let pool = memory_pool().await;
        create_streamer(&pool, "alice", Some(1)).await;

        let platform = FakePlatform::default();
        platform.fail_subscription_type("channel.update");
        let state = test_state(pool.clone(), platform, None);

        let report = SubscriptionManager::subscribe_all(&state).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1, "channel.update");
    }

    #[tokio::test]
    async fn unsubscribe_removes_rows_only_after_upstream_deletion() {
        let pool = memory_pool().await;
        let alice = create_streamer(&pool, "alice", Some(1)).await;
        let bob = create_streamer(&pool, "bob", Some(2)).await;

        let platform = FakePlatform::default();
        let state = test_state(pool.clone(), platform.clone(), None);
        SubscriptionManager::subscribe_all(&state).await.unwrap();

        platform.fail_deletions(true);
        let failed = SubscriptionManager::unsubscribe(&state, &["alice".to_string()])
            .await
            .unwrap();
        assert_eq!(failed.deleted, 0);
        assert_eq!(failed.failed.len(), 3);

        platform.fail_deletions(false);
        let report = SubscriptionManager::unsubscribe(&state, &["alice".to_string()])
            .await
            .unwrap();
        assert_eq!(report.deleted, 3);

        assert!(EventSubSubscriptionRepository::find_by_streamer_id(&pool, &alice.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            EventSubSubscriptionRepository::find_by_streamer_id(&pool, &bob.id)
                .await
                .unwrap()
                .len(),
            3
        );
    }
}
