//! Reader-facing errors for the channel facade. `decode` itself keeps the
//! protocol's literal `{-1, 0, +1}` return convention (see [`crate::Channel::decode`]);
//! this type only covers the accessor methods that report "nothing to give
//! you yet" conditions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// No fast-channel frame has ever validated since construction (or the
    /// last restart).
    NoData,
    /// No valid mailbox entry exists for the requested slow-channel id.
    NotFound,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NoData => write!(f, "no fast-channel frame has validated yet"),
            ChannelError::NotFound => write!(f, "no valid slow-channel entry for that id"),
        }
    }
}

impl std::error::Error for ChannelError {}
