//! Database models, one file per table.

pub mod eventsub_subscription;
pub mod scheduled_stream;
pub mod streamer;

pub use self::eventsub_subscription::*;
pub use self::scheduled_stream::*;
pub use self::streamer::*;
