//! Standard nodes for tickflow.
//!
//! The building blocks most graphs start from:
//!
//! ## Data (`data::*`)
//! - [`data::ConstNode`] - Ticks a fixed value once
//! - [`data::LiftNode`] - Applies a function to scalar inputs
//! - [`data::GetItemNode`] - References one entry of a dict
//!
//! ## Sources (`sources::*`)
//! - [`sources::ChannelSource`] - Push source fed from other threads
//! - [`sources::TickerNode`] - Counter ticking on a fixed interval
//!
//! ## Sinks (`sinks::*`)
//! - [`sinks::RecordingSink`] - Captures every tick into a shared [`sinks::Recording`]
//!
//! ## Flow (`flow::*`)
//! - [`flow::MeshLookupNode`] - Reads another key of the enclosing mesh
//! - [`flow::FailingNode`] - Passes values through, then fails

pub mod data;
pub mod flow;
pub mod sinks;
pub mod sources;

pub use data::{ConstNode, GetItemNode, LiftNode};
pub use flow::{FailingNode, MeshLookupNode};
pub use sinks::{Recording, RecordingSink};
pub use sources::{ChannelSource, TickerNode};

/// Prelude for commonly used types.
pub mod prelude {
    pub use crate::data::{ConstNode, GetItemNode, LiftNode};
    pub use crate::flow::{FailingNode, MeshLookupNode};
    pub use crate::sinks::{Recording, RecordingSink};
    pub use crate::sources::{ChannelSource, TickerNode};
}
