//! Remote collaborators of the sync core: the REST transport with its named
//! operations, and the duplex notification channel.

pub mod channel;
pub mod rest;
pub mod traits;

pub use channel::{ChannelClient, ChannelError, ChannelEvent};
pub use rest::RestClient;
