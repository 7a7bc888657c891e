use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::models::{EventSubSubscription, Streamer, SubscriptionState};
use crate::db::repository::{EventSubSubscriptionRepository, StreamerRepository};
use crate::error::{AppError, AppResult};
use crate::services::live::LiveSyncManager;
use crate::services::subscriptions::SubscriptionManager;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const TWITCH_MESSAGE_ID_HEADER: &str = "twitch-eventsub-message-id";
pub const TWITCH_MESSAGE_TIMESTAMP_HEADER: &str = "twitch-eventsub-message-timestamp";
pub const TWITCH_MESSAGE_SIGNATURE_HEADER: &str = "twitch-eventsub-message-signature";

const SUB_TYPE_STREAM_ONLINE: &str = "stream.online";
const SUB_TYPE_STREAM_OFFLINE: &str = "stream.offline";
const SUB_TYPE_CHANNEL_UPDATE: &str = "channel.update";

#[derive(Debug, Deserialize)]
pub struct EventSubPayloadSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct EventSubPayload {
    pub subscription: EventSubPayloadSubscription,
    pub challenge: Option<String>,
    pub event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct StreamOnlineEvent {
    pub broadcaster_user_id: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StreamOfflineEvent {
    pub broadcaster_user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelUpdateEvent {
    pub broadcaster_user_id: String,
    pub title: String,
    #[serde(default)]
    pub category_name: Option<String>,
}

/// Lifecycle status carried by every EventSub call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    VerificationPending,
    Enabled,
    AuthorizationRevoked,
    Other(String),
}

impl From<&str> for SubscriptionStatus {
    fn from(status: &str) -> Self {
        match status {
            "webhook_callback_verification_pending" => SubscriptionStatus::VerificationPending,
            "enabled" => SubscriptionStatus::Enabled,
            "authorization_revoked" => SubscriptionStatus::AuthorizationRevoked,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

/// A notification for an enabled subscription.
#[derive(Debug)]
pub enum NotificationEvent {
    ChannelUpdate(ChannelUpdateEvent),
    StreamOnline(StreamOnlineEvent),
    StreamOffline(StreamOfflineEvent),
    Unhandled(String),
}

impl NotificationEvent {
    pub fn parse(subscription_type: &str, event: Option<&serde_json::Value>) -> AppResult<Self> {
        fn decode<T: serde::de::DeserializeOwned>(event: Option<&serde_json::Value>) -> AppResult<T> {
            let event = event.ok_or_else(|| AppError::BadRequest("Missing event data".to_string()))?;
            serde_json::from_value(event.clone())
                .map_err(|e| AppError::BadRequest(format!("Invalid event data: {}", e)))
        }

        Ok(match subscription_type {
            SUB_TYPE_CHANNEL_UPDATE => NotificationEvent::ChannelUpdate(decode(event)?),
            SUB_TYPE_STREAM_ONLINE => NotificationEvent::StreamOnline(decode(event)?),
            SUB_TYPE_STREAM_OFFLINE => NotificationEvent::StreamOffline(decode(event)?),
            other => NotificationEvent::Unhandled(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Verification handshake: the challenge goes back as the response body
    Challenge(String),
    NoContent,
}

#[derive(Debug)]
pub struct MessageHeaders {
    pub message_id: String,
    pub timestamp: String,
    pub signature: String,
}

pub struct WebhookService;

impl WebhookService {
    /// Extract the signing headers. A call without them cannot be authenticated.
    pub fn extract_headers(headers: &HeaderMap) -> AppResult<MessageHeaders> {
        Ok(MessageHeaders {
            message_id: Self::get_header(headers, TWITCH_MESSAGE_ID_HEADER)?,
            timestamp: Self::get_header(headers, TWITCH_MESSAGE_TIMESTAMP_HEADER)?,
            signature: Self::get_header(headers, TWITCH_MESSAGE_SIGNATURE_HEADER)?,
        })
    }

    fn get_header(headers: &HeaderMap, name: &str) -> AppResult<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Forbidden(format!("Missing header: {}", name)))
    }

    /// HMAC-SHA256 over `message id || timestamp || raw body`, keyed with the
    /// subscription secret, compared in constant time.
    pub fn verify_signature(
        secret: &str,
        message_id: &str,
        timestamp: &str,
        body: &[u8],
        signature: &str,
    ) -> AppResult<()> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;

        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);

        let expected_sig = signature
            .strip_prefix("sha256=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or_else(|| AppError::Forbidden("Invalid signature".to_string()))?;

        mac.verify_slice(&expected_sig)
            .map_err(|_| AppError::Forbidden("Invalid signature".to_string()))
    }

    /// Reject replays: the message timestamp must be within `max_age_seconds` of now.
    /// A non-positive limit disables the check.
    pub fn check_message_age(timestamp: &str, max_age_seconds: i64, now: DateTime<Utc>) -> AppResult<()> {
        if max_age_seconds <= 0 {
            return Ok(());
        }

        let sent_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| AppError::BadRequest("Invalid message timestamp".to_string()))?;
        if now.signed_duration_since(sent_at).num_seconds().abs() > max_age_seconds {
            return Err(AppError::BadRequest("Message too old".to_string()));
        }

        Ok(())
    }

    /// Authenticate and apply one inbound EventSub call.
    ///
    /// Nothing is written before the subscription is known and the signature
    /// checks out. From then on `last_seen` is persisted whatever the handler
    /// returns, except when the subscription itself was revoked and removed.
    pub async fn ingest(state: &Arc<AppState>, headers: &HeaderMap, body: &[u8]) -> AppResult<WebhookOutcome> {
        let payload: EventSubPayload = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

        let mut subscription = EventSubSubscriptionRepository::find_by_twitch_subscription_id(
            &state.db,
            &payload.subscription.id,
        )
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Unknown eventsub subscription with UUID {}",
                payload.subscription.id
            ))
        })?;

        let message = Self::extract_headers(headers)?;
        Self::verify_signature(
            &subscription.secret,
            &message.message_id,
            &message.timestamp,
            body,
            &message.signature,
        )?;
        Self::check_message_age(
            &message.timestamp,
            state.config.webhook.max_message_age_seconds,
            Utc::now(),
        )?;

        tracing::info!(
            "Received EventSub call: message_id={}, status={}, type={}, subscription_id={}",
            message.message_id,
            payload.subscription.status,
            payload.subscription.subscription_type,
            subscription.twitch_subscription_id
        );

        subscription.last_seen = Some(Utc::now());

        let status = SubscriptionStatus::from(payload.subscription.status.as_str());
        let result = match status {
            SubscriptionStatus::VerificationPending => Self::handle_verification(&mut subscription, &payload),
            SubscriptionStatus::Enabled => Self::handle_notification(state, &subscription, &payload).await,
            SubscriptionStatus::AuthorizationRevoked => {
                return Self::handle_revocation(state, &subscription).await;
            }
            SubscriptionStatus::Other(status) => {
                tracing::warn!(
                    "Unknown status {} from Twitch notification for subscription {}",
                    status,
                    subscription.twitch_subscription_id
                );
                Err(AppError::BadRequest(format!(
                    "Unknown status {} from Twitch notification for subscription {}",
                    status, subscription.twitch_subscription_id
                )))
            }
        };

        EventSubSubscriptionRepository::save_state(&state.db, &subscription).await?;
        result
    }

    fn handle_verification(
        subscription: &mut EventSubSubscription,
        payload: &EventSubPayload,
    ) -> AppResult<WebhookOutcome> {
        let challenge = payload
            .challenge
            .clone()
            .ok_or_else(|| AppError::BadRequest("Missing challenge".to_string()))?;

        subscription.status = SubscriptionState::Subscribed.to_string();
        tracing::info!(
            "EventSub {} verified (subscription {})",
            subscription.subscription_type,
            subscription.twitch_subscription_id
        );

        Ok(WebhookOutcome::Challenge(challenge))
    }

    async fn handle_notification(
        state: &Arc<AppState>,
        subscription: &EventSubSubscription,
        payload: &EventSubPayload,
    ) -> AppResult<WebhookOutcome> {
        let event = NotificationEvent::parse(
            &payload.subscription.subscription_type,
            payload.event.as_ref(),
        )?;
        let streamer = Self::streamer_for(state, subscription).await?;

        match event {
            NotificationEvent::ChannelUpdate(event) => {
                tracing::debug!(
                    "Channel update for {} ({}): {}",
                    streamer.twitch_login,
                    event.broadcaster_user_id,
                    event.title
                );
                StreamerRepository::update_channel_info(
                    &state.db,
                    &streamer.id,
                    &event.title,
                    event.category_name.as_deref().filter(|c| !c.is_empty()),
                )
                .await?;
            }
            NotificationEvent::StreamOnline(event) => {
                tracing::debug!("Stream online for {} ({})", streamer.twitch_login, event.broadcaster_user_id);
                let started_at = event.started_at.unwrap_or_else(Utc::now);
                LiveSyncManager::go_online(&state.db, &streamer, started_at).await?;
                LiveSyncManager::refresh_live_data(state, &streamer).await;
            }
            NotificationEvent::StreamOffline(event) => {
                tracing::debug!("Stream offline for {} ({})", streamer.twitch_login, event.broadcaster_user_id);
                LiveSyncManager::go_offline(&state.db, &streamer).await?;
            }
            NotificationEvent::Unhandled(subscription_type) => {
                tracing::warn!(
                    "Unhandled EventSub notification type {} for subscription {}",
                    subscription_type,
                    subscription.twitch_subscription_id
                );
            }
        }

        Ok(WebhookOutcome::NoContent)
    }

    /// Drop the revoked subscription and immediately ask for a new one.
    async fn handle_revocation(
        state: &Arc<AppState>,
        subscription: &EventSubSubscription,
    ) -> AppResult<WebhookOutcome> {
        tracing::warn!(
            "EventSub {} revoked (subscription {}); subscribing again",
            subscription.subscription_type,
            subscription.twitch_subscription_id
        );

        EventSubSubscriptionRepository::delete(&state.db, &subscription.id).await?;

        let streamer = Self::streamer_for(state, subscription).await?;
        if let Err(e) =
            SubscriptionManager::subscribe_to(state, &streamer, &subscription.subscription_type).await
        {
            tracing::error!(
                "Failed to subscribe {} to {} again after revocation: {}",
                streamer.twitch_login,
                subscription.subscription_type,
                e
            );
        }

        Ok(WebhookOutcome::NoContent)
    }

    async fn streamer_for(state: &Arc<AppState>, subscription: &EventSubSubscription) -> AppResult<Streamer> {
        StreamerRepository::find_by_id(&state.db, &subscription.streamer_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Streamer {} of subscription {} not found",
                    subscription.streamer_id, subscription.twitch_subscription_id
                ))
            })
    }
}

/// `sha256=<hex>` signature of a message, as Twitch computes it.
#[cfg(test)]
pub fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("any key length works");
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"subscription":{}}"#;
        let signature = sign("secret", "msg-1", "2024-05-01T10:00:00Z", body);

        assert!(WebhookService::verify_signature("secret", "msg-1", "2024-05-01T10:00:00Z", body, &signature).is_ok());
    }

    #[test]
    fn tampered_or_malformed_signatures_are_forbidden() {
        let body = br#"{"subscription":{}}"#;
        let signature = sign("secret", "msg-1", "2024-05-01T10:00:00Z", body);

        let tampered = WebhookService::verify_signature(
            "secret",
            "msg-1",
            "2024-05-01T10:00:00Z",
            br#"{"subscription":{"x":1}}"#,
            &signature,
        );
        assert!(matches!(tampered, Err(AppError::Forbidden(_))));

        let wrong_key =
            WebhookService::verify_signature("other", "msg-1", "2024-05-01T10:00:00Z", body, &signature);
        assert!(matches!(wrong_key, Err(AppError::Forbidden(_))));

        let no_prefix = WebhookService::verify_signature(
            "secret",
            "msg-1",
            "2024-05-01T10:00:00Z",
            body,
            signature.trim_start_matches("sha256="),
        );
        assert!(matches!(no_prefix, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn stale_messages_are_rejected_unless_disabled() {
        let now = Utc::now();
        let old = (now - Duration::minutes(11)).to_rfc3339();
        let fresh = (now - Duration::minutes(1)).to_rfc3339();

        assert!(WebhookService::check_message_age(&fresh, 600, now).is_ok());
        assert!(matches!(
            WebhookService::check_message_age(&old, 600, now),
            Err(AppError::BadRequest(_))
        ));
        assert!(WebhookService::check_message_age(&old, 0, now).is_ok());
    }

    #[test]
    fn statuses_and_event_types_are_classified() {
        assert_eq!(
            SubscriptionStatus::from("webhook_callback_verification_pending"),
            SubscriptionStatus::VerificationPending
        );
        assert_eq!(
            SubscriptionStatus::from("user_removed"),
            SubscriptionStatus::Other("user_removed".to_string())
        );

        let update = NotificationEvent::parse(
            "channel.update",
            Some(&serde_json::json!({
                "broadcaster_user_id": "1",
                "title": "New title",
                "category_name": "Science & Technology"
            })),
        )
        .unwrap();
        assert!(matches!(update, NotificationEvent::ChannelUpdate(ref e) if e.title == "New title"));

        let unknown = NotificationEvent::parse("channel.follow", None).unwrap();
        assert!(matches!(unknown, NotificationEvent::Unhandled(_)));

        let missing = NotificationEvent::parse("stream.online", None);
        assert!(matches!(missing, Err(AppError::BadRequest(_))));
    }
}
