//! Ranked graph edges.

use std::fmt;

/// A directed data edge between two ranked nodes.
///
/// `src_path` walks into the source node's output (empty for the output
/// itself); `dst_path[0]` is the destination argument index and any further
/// segments walk into that input's children.
///
/// Field order gives the derived ordering: source node, destination node,
/// then the paths.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    /// Ordinal of the producing node.
    pub src_node: usize,
    /// Ordinal of the consuming node.
    pub dst_node: usize,
    /// Path into the source output.
    pub src_path: Vec<usize>,
    /// Argument index followed by a path into that input.
    pub dst_path: Vec<usize>,
}

impl Edge {
    /// Create a new edge.
    pub fn new(src_node: usize, src_path: Vec<usize>, dst_node: usize, dst_path: Vec<usize>) -> Self {
        Self {
            src_node,
            dst_node,
            src_path,
            dst_path,
        }
    }

    /// Destination argument index.
    #[must_use]
    pub fn dst_arg(&self) -> Option<usize> {
        self.dst_path.first().copied()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:?} -> {}{:?}",
            self.src_node, self.src_path, self.dst_node, self.dst_path
        )
    }
}
