pub mod eventsub_subscription;
pub mod scheduled_stream;
pub mod streamer;

pub use eventsub_subscription::EventSubSubscriptionRepository;
pub use scheduled_stream::ScheduledStreamRepository;
pub use streamer::StreamerRepository;
