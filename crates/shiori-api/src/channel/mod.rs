mod client;
pub mod protocol;

pub use client::{ChannelClient, ChannelError, ChannelEvent};
