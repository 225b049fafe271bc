//! Strongly-typed identifiers for runtime arena entries.
//!
//! Graphs, outputs and inputs all live in index arenas owned by the runtime;
//! everything else refers to them by these ids, never by pointer.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from a raw arena index.
            #[must_use]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get the raw arena index.
            #[must_use]
            pub const fn as_u32(&self) -> u32 {
                self.0
            }

            /// Get the raw arena index as a `usize`.
            #[must_use]
            pub const fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self(index)
            }
        }
    };
}

arena_id!(
    /// Identifier for a graph instance (root or nested).
    GraphId,
    "graph"
);

arena_id!(
    /// Identifier for a time-series output in the output arena.
    OutputId,
    "output"
);

arena_id!(
    /// Identifier for a time-series input in the input arena.
    InputId,
    "input"
);

/// Identity of a runtime node: the graph that owns it plus its ordinal.
///
/// The ordinal doubles as the node's rank inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    /// Owning graph.
    pub graph: GraphId,
    /// Position of the node inside the graph's ranked node list.
    pub ordinal: usize,
}

impl NodeHandle {
    /// Create a new node handle.
    #[must_use]
    pub const fn new(graph: GraphId, ordinal: usize) -> Self {
        Self { graph, ordinal }
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.graph, self.ordinal)
    }
}
