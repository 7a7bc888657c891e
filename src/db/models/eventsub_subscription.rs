use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// EventSub types every streamer is subscribed to.
pub const SUBSCRIPTION_TYPES: [&str; 3] = ["stream.online", "stream.offline", "channel.update"];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventSubSubscription {
    pub id: String,
    /// Subscription UUID assigned by Twitch, hyphenated lowercase.
    pub twitch_subscription_id: String,
    pub streamer_id: String,
    pub subscription_type: String,
    pub secret: String,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventSubSubscription {
    pub fn state(&self) -> SubscriptionState {
        self.status.parse().unwrap_or(SubscriptionState::Unsubscribed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventSubSubscription {
    pub twitch_subscription_id: String,
    pub subscription_type: String,
    pub secret: String,
    pub status: SubscriptionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Unsubscribed,
    Pending,
    Subscribed,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Unsubscribed => "unsubscribed",
            SubscriptionState::Pending => "pending",
            SubscriptionState::Subscribed => "subscribed",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsubscribed" => Ok(SubscriptionState::Unsubscribed),
            "pending" => Ok(SubscriptionState::Pending),
            "subscribed" => Ok(SubscriptionState::Subscribed),
            other => Err(format!("unknown subscription state: {}", other)),
        }
    }
}
