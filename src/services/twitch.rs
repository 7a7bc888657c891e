use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{Config, ConfigError};
use crate::error::{AppError, AppResult};
use crate::services::http::{error_text, send_with_backoff};

const TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2";
const TWITCH_API_URL: &str = "https://api.twitch.tv/helix";

/// Helix caps list filters (`id=`, `login=`, `user_id=`) at 100 values per request.
pub const HELIX_PAGE_LIMIT: usize = 100;

/// What this service needs from the streaming platform.
#[async_trait]
pub trait StreamingPlatform: Send + Sync + 'static {
    async fn list_users_by_logins(&self, logins: &[String]) -> AppResult<Vec<TwitchUser>>;

    async fn list_users_by_ids(&self, ids: &[i64]) -> AppResult<Vec<TwitchUser>>;

    /// Streams currently live among `user_ids`. Offline users are simply absent.
    async fn list_streams(&self, user_ids: &[i64]) -> AppResult<Vec<Stream>>;

    /// One page of a broadcaster's schedule, `None` when the broadcaster has no schedule.
    async fn get_schedule_page(
        &self,
        broadcaster_id: i64,
        after: Option<&str>,
    ) -> AppResult<Option<SchedulePage>>;

    async fn create_subscription(
        &self,
        subscription_type: &str,
        callback_url: &str,
        secret: &str,
        condition: serde_json::Value,
    ) -> AppResult<CreatedSubscription>;

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct TwitchService {
    client: Client,
    client_id: String,
    client_secret: String,
    app_access_token: Arc<RwLock<Option<AppAccessToken>>>,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AppAccessTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

// ============================================================================
// User Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TwitchUsersResponse {
    pub data: Vec<TwitchUser>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub offline_image_url: Option<String>,
}

impl TwitchUser {
    pub fn numeric_id(&self) -> Option<i64> {
        self.id.parse().ok()
    }
}

// ============================================================================
// Stream Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamsResponse {
    pub data: Vec<Stream>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stream {
    pub user_id: String,
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: i64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl Stream {
    pub fn numeric_user_id(&self) -> Option<i64> {
        self.user_id.parse().ok()
    }
}

// ============================================================================
// EventSub Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreateEventSubRequest {
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub transport: EventSubTransport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubTransport {
    pub method: String,
    pub callback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventSubResponse {
    pub data: Vec<CreatedSubscription>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatedSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    #[serde(default)]
    pub status: String,
}

/// Helix version to request for a subscription type.
pub fn subscription_version(subscription_type: &str) -> &'static str {
    match subscription_type {
        "channel.update" => "2",
        _ => "1",
    }
}

// ============================================================================
// Schedule Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ScheduleResponse {
    pub data: ScheduleData,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleData {
    /// `null` while the broadcaster is on vacation
    #[serde(default)]
    pub segments: Option<Vec<ScheduleSegment>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleSegment {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub canceled_until: Option<String>,
    #[serde(default)]
    pub category: Option<ScheduleCategory>,
    #[serde(default)]
    pub is_recurring: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulePage {
    pub segments: Vec<ScheduleSegment>,
    pub cursor: Option<String>,
}

impl From<ScheduleResponse> for SchedulePage {
    fn from(response: ScheduleResponse) -> Self {
        SchedulePage {
            segments: response.data.segments.unwrap_or_default(),
            cursor: response
                .pagination
                .and_then(|p| p.cursor)
                .filter(|c| !c.is_empty()),
        }
    }
}

/// The cached token, unless it expires within the next minute.
fn usable_token(cached: &Option<AppAccessToken>, now: DateTime<Utc>) -> Option<String> {
    const REFRESH_MARGIN_SECS: i64 = 60;

    cached
        .as_ref()
        .filter(|t| t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now)
        .map(|t| t.token.clone())
}

impl TwitchService {
    /// Build the client. The app access token is fetched on first use.
    pub fn new(config: &Config) -> AppResult<Self> {
        if config.twitch.client_id.trim().is_empty() {
            return Err(ConfigError::MissingEnv("TWITCH_CLIENT_ID".to_string()).into());
        }
        if config.twitch.client_secret.trim().is_empty() {
            return Err(ConfigError::MissingEnv("TWITCH_CLIENT_SECRET".to_string()).into());
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            client_id: config.twitch.client_id.clone(),
            client_secret: config.twitch.client_secret.clone(),
            app_access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Request a new app access token. Callers store it under the write lock.
    async fn request_app_access_token(&self) -> AppResult<AppAccessToken> {
        let response = send_with_backoff("Twitch", || {
            self.client
                .post(format!("{}/token", TWITCH_AUTH_URL))
                .form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("grant_type", "client_credentials"),
                ])
        })
        .await?;

        if !response.status().is_success() {
            return Err(AppError::TwitchApi(format!(
                "Failed to get app access token: {}",
                error_text(response).await
            )));
        }

        let token_response: AppAccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::TwitchApi(format!("Failed to parse token response: {}", e)))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        tracing::info!("Refreshed Twitch app access token; expires at {}", expires_at);

        Ok(AppAccessToken {
            token: token_response.access_token,
            expires_at,
        })
    }

    /// Replace a token Twitch rejected. Skipped when another request already
    /// swapped it for a usable one.
    async fn refresh_app_access_token(&self, rejected: &str) -> AppResult<()> {
        let mut guard = self.app_access_token.write().await;
        if let Some(current) = usable_token(&guard, Utc::now()) {
            if current != rejected {
                return Ok(());
            }
        }

        *guard = Some(self.request_app_access_token().await?);
        Ok(())
    }

    /// Get a valid app access token, fetching it when missing or about to expire.
    ///
    /// Fetching happens under the write lock, so concurrent callers wait for a
    /// single token request instead of each sending their own.
    pub async fn get_valid_app_access_token(&self) -> AppResult<String> {
        if let Some(token) = usable_token(&*self.app_access_token.read().await, Utc::now()) {
            return Ok(token);
        }

        let mut guard = self.app_access_token.write().await;
        if let Some(token) = usable_token(&guard, Utc::now()) {
            return Ok(token);
        }

        let fresh = self.request_app_access_token().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    /// Run a Helix request with the app token. On 401 the token is refreshed and
    /// the request retried once.
    async fn send_app_request<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut refreshed_token = false;
        loop {
            let token = self.get_valid_app_access_token().await?;
            let response = send_with_backoff("Twitch", || {
                make_request(&token)
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Client-Id", &self.client_id)
            })
            .await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && !refreshed_token {
                tracing::warn!("Unauthorized Twitch app request. Refreshing token and retrying.");
                self.refresh_app_access_token(&token).await?;
                refreshed_token = true;
                continue;
            }

            return Ok(response);
        }
    }

    async fn get_users(&self, query: &str) -> AppResult<Vec<TwitchUser>> {
        let response = self
            .send_app_request(|_| self.client.get(format!("{}/users?{}", TWITCH_API_URL, query)))
            .await?;

        if !response.status().is_success() {
            return Err(AppError::TwitchApi(format!(
                "Failed to get users: {}",
                error_text(response).await
            )));
        }

        let users: TwitchUsersResponse = response
            .json()
            .await
            .map_err(|e| AppError::TwitchApi(format!("Failed to parse users response: {}", e)))?;

        Ok(users.data)
    }
}

/// `key=a&key=b&...` for one Helix list filter
fn repeated_param<T: ToString>(key: &str, values: &[T]) -> String {
    values
        .iter()
        .map(|v| format!("{}={}", key, urlencoding::encode(&v.to_string())))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl StreamingPlatform for TwitchService {
    async fn list_users_by_logins(&self, logins: &[String]) -> AppResult<Vec<TwitchUser>> {
        let mut users = Vec::new();
        for chunk in logins.chunks(HELIX_PAGE_LIMIT) {
            users.extend(self.get_users(&repeated_param("login", chunk)).await?);
        }
        Ok(users)
    }

    async fn list_users_by_ids(&self, ids: &[i64]) -> AppResult<Vec<TwitchUser>> {
        let mut users = Vec::new();
        for chunk in ids.chunks(HELIX_PAGE_LIMIT) {
            users.extend(self.get_users(&repeated_param("id", chunk)).await?);
        }
        Ok(users)
    }

    async fn list_streams(&self, user_ids: &[i64]) -> AppResult<Vec<Stream>> {
        let mut streams = Vec::new();
        for chunk in user_ids.chunks(HELIX_PAGE_LIMIT) {
            let query = format!("{}&first={}", repeated_param("user_id", chunk), HELIX_PAGE_LIMIT);
            let response = self
                .send_app_request(|_| {
                    self.client
                        .get(format!("{}/streams?{}", TWITCH_API_URL, query))
                })
                .await?;

            if !response.status().is_success() {
                return Err(AppError::TwitchApi(format!(
                    "Failed to get streams: {}",
                    error_text(response).await
                )));
            }

            let page: StreamsResponse = response.json().await.map_err(|e| {
                AppError::TwitchApi(format!("Failed to parse streams response: {}", e))
            })?;
            streams.extend(page.data);
        }
        Ok(streams)
    }

    async fn get_schedule_page(
        &self,
        broadcaster_id: i64,
        after: Option<&str>,
    ) -> AppResult<Option<SchedulePage>> {
        let mut url = format!(
            "{}/schedule?broadcaster_id={}&first=25",
            TWITCH_API_URL, broadcaster_id
        );
        if let Some(cursor) = after {
            url.push_str(&format!("&after={}", urlencoding::encode(cursor)));
        }

        let response = self.send_app_request(|_| self.client.get(&url)).await?;

        // 404 is returned when there's no schedule
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(AppError::TwitchApi(format!(
                "Failed to get schedule: {}",
                error_text(response).await
            )));
        }

        let schedule: ScheduleResponse = response.json().await.map_err(|e| {
            AppError::TwitchApi(format!("Failed to parse schedule response: {}", e))
        })?;

        Ok(Some(schedule.into()))
    }

    async fn create_subscription(
        &self,
        subscription_type: &str,
        callback_url: &str,
        secret: &str,
        condition: serde_json::Value,
    ) -> AppResult<CreatedSubscription> {
        let request = CreateEventSubRequest {
            subscription_type: subscription_type.to_string(),
            version: subscription_version(subscription_type).to_string(),
            condition,
            transport: EventSubTransport {
                method: "webhook".to_string(),
                callback: callback_url.to_string(),
                secret: Some(secret.to_string()),
            },
        };

        let response = self
            .send_app_request(|_| {
                self.client
                    .post(format!("{}/eventsub/subscriptions", TWITCH_API_URL))
                    .json(&request)
            })
            .await?;

        if !response.status().is_success() {
            return Err(AppError::TwitchApi(format!(
                "Failed to create EventSub subscription: {}",
                error_text(response).await
            )));
        }

        let subscription: EventSubResponse = response.json().await.map_err(|e| {
            AppError::TwitchApi(format!("Failed to parse EventSub response: {}", e))
        })?;

        subscription
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::TwitchApi("No subscription created".to_string()))
    }

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<()> {
        let response = self
            .send_app_request(|_| {
                self.client.delete(format!(
                    "{}/eventsub/subscriptions?id={}",
                    TWITCH_API_URL,
                    urlencoding::encode(subscription_id)
                ))
            })
            .await?;

        if !response.status().is_success() {
            return Err(AppError::TwitchApi(format!(
                "Failed to delete EventSub subscription: {}",
                error_text(response).await
            )));
        }

        Ok(())
    }
}
