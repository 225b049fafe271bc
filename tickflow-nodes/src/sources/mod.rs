//! Source nodes.
//!
//! - [`ChannelSource`] - Push source fed through a [`PushSender`](tickflow_engine::PushSender)
//! - [`TickerNode`] - Counter on a fixed interval

mod channel;
mod ticker;

pub use channel::ChannelSource;
pub use ticker::TickerNode;
