pub mod calendar;
pub mod http;
pub mod init;
pub mod live;
pub mod roster;
pub mod schedule;
pub mod subscriptions;
pub mod twitch;
pub mod webhooks;
