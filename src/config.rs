use std::env;

use serde::Deserialize;

/// Words never used on their own to associate a calendar event with a streamer.
pub const DEFAULT_ALIAS_DENYLIST: &[&str] = &["Space", "Le", "Petit", "Professeur", "Hell", "Tout", "Se"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub twitch: TwitchConfig,
    pub calendar: CalendarConfig,
    pub schedule: ScheduleConfig,
    pub webhook: WebhookConfig,
    pub rate_limit: RateLimitConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL Twitch calls back; the EventSub callback is `<webhook_url>/webhooks/twitch`.
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    pub api_key: Option<String>,
    pub calendar_id: Option<String>,
}

impl CalendarConfig {
    /// The calendar source is only used when both credentials are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_key.as_deref(), self.calendar_id.as_deref()) {
            (Some(key), Some(id)) if !key.is_empty() && !id.is_empty() => Some((key, id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Look-ahead horizon (days) for both schedule sources.
    pub fetch_until_days: i64,
    /// Single words never used alone as a streamer alias.
    pub alias_denylist: Vec<String>,
}

impl ScheduleConfig {
    pub fn fetch_until(&self) -> chrono::Duration {
        chrono::Duration::days(self.fetch_until_days)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Maximum accepted age of a message timestamp, in seconds. 0 disables the check.
    pub max_message_age_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for webhook endpoints (e.g. /webhooks/twitch)
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Seconds between two schedule reconciliations while serving. 0 disables the worker.
    pub schedule_sync_interval_seconds: u64,
    /// Seconds between two live syncs while serving. 0 disables the worker.
    pub live_sync_interval_seconds: u64,
    /// Whether the periodic live sync also checks offline streamers.
    pub live_sync_full: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                webhook_url: env::var("WEBHOOK_URL")
                    .unwrap_or_else(|_| "http://localhost:8080".to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            twitch: TwitchConfig {
                client_id: env::var("TWITCH_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_ID".to_string()))?,
                client_secret: env::var("TWITCH_CLIENT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_SECRET".to_string()))?,
            },
            calendar: CalendarConfig {
                api_key: env::var("GOOGLE_API_KEY").ok(),
                calendar_id: env::var("GOOGLE_CALENDAR_ID").ok(),
            },
            schedule: ScheduleConfig {
                fetch_until_days: env::var("SCHEDULE_FETCH_UNTIL_DAYS")
                    .unwrap_or_else(|_| "14".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SCHEDULE_FETCH_UNTIL_DAYS".to_string()))?,
                alias_denylist: match env::var("SCHEDULE_ALIAS_DENYLIST") {
                    Ok(v) => parse_list(&v),
                    Err(_) => default_alias_denylist(),
                },
            },
            webhook: WebhookConfig {
                max_message_age_seconds: env::var("WEBHOOK_MAX_MESSAGE_AGE_SECONDS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .unwrap_or(600),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            workers: WorkersConfig {
                schedule_sync_interval_seconds: env::var("SCHEDULE_SYNC_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
                live_sync_interval_seconds: env::var("LIVE_SYNC_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
                live_sync_full: match env::var("LIVE_SYNC_FULL") {
                    Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
                    Err(_) => false,
                },
            },
        })
    }
}

fn default_alias_denylist() -> Vec<String> {
    DEFAULT_ALIAS_DENYLIST.iter().map(|w| w.to_string()).collect()
}

/// Split a comma-separated env value, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                webhook_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            twitch: TwitchConfig {
                client_id: String::new(),
                client_secret: String::new(),
            },
            calendar: CalendarConfig {
                api_key: None,
                calendar_id: None,
            },
            schedule: ScheduleConfig {
                fetch_until_days: 14,
                alias_denylist: default_alias_denylist(),
            },
            webhook: WebhookConfig {
                max_message_age_seconds: 600,
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
            workers: WorkersConfig {
                schedule_sync_interval_seconds: 3600,
                live_sync_interval_seconds: 300,
                live_sync_full: false,
            },
        }
    }
}
