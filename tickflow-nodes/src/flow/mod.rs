//! Flow nodes.
//!
//! - [`MeshLookupNode`] - Dependency on another key of the enclosing mesh
//! - [`FailingNode`] - Fails after a number of ticks, for exercising error paths

mod fail;
mod mesh_lookup;

pub use fail::FailingNode;
pub use mesh_lookup::MeshLookupNode;
