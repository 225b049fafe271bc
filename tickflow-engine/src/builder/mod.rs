//! Graph construction.
//!
//! - [`Wiring`]: declare nodes and connections in any order
//! - [`GraphBuilder`]: the ranked, immutable template produced by a wiring
//! - [`Edge`]: a data edge between two ranked nodes

mod edge;
mod graph_builder;
mod wiring;

pub use edge::Edge;
pub use graph_builder::GraphBuilder;
pub use wiring::{BuildContext, NodeRef, Wiring};
