pub mod channel;
pub mod crc;
pub mod error;
pub mod fast;
pub mod protocol;
pub mod slow;
pub mod stats;

pub use channel::{Channel, DecodedFrame, SlowChannelEntry};
pub use error::ChannelError;
pub use stats::ChannelStats;
