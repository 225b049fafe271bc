//! Immutable, ranked graph templates.

use super::edge::Edge;
use super::wiring::NodeRef;
use crate::node::NodeBuilder;
use std::collections::BTreeSet;
use std::fmt;
use tickflow_core::{FlowError, Result};

/// A ranked list of node builders plus the edges between them.
///
/// Built once, instantiated any number of times: every instantiation
/// produces an independent runtime graph.
#[derive(Clone)]
pub struct GraphBuilder {
    nodes: Vec<NodeBuilder>,
    edges: BTreeSet<Edge>,
    ordinals: Vec<usize>,
}

impl GraphBuilder {
    /// Create a builder from already-ranked nodes.
    ///
    /// Every edge must point forwards: `src_node < dst_node`.
    pub fn new(nodes: Vec<NodeBuilder>, edges: impl IntoIterator<Item = Edge>) -> Result<Self> {
        let ordinals = (0..nodes.len()).collect();
        Self::with_ordinals(nodes, edges.into_iter().collect(), ordinals)
    }

    pub(crate) fn with_ordinals(
        nodes: Vec<NodeBuilder>,
        edges: BTreeSet<Edge>,
        ordinals: Vec<usize>,
    ) -> Result<Self> {
        for edge in &edges {
            validate_edge(&nodes, edge)?;
        }
        Ok(Self {
            nodes,
            edges,
            ordinals,
        })
    }

    /// Node builders in rank order.
    pub fn nodes(&self) -> &[NodeBuilder] {
        &self.nodes
    }

    /// Node builder at `ordinal`.
    pub fn node(&self, ordinal: usize) -> Option<&NodeBuilder> {
        self.nodes.get(ordinal)
    }

    /// Sorted, deduplicated edges.
    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the builder has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ordinal assigned to a node declared in the wiring.
    pub fn ordinal_of(&self, node: NodeRef) -> Option<usize> {
        self.ordinals.get(node.0).copied()
    }

    /// Whether any node is a push source.
    pub fn has_push_nodes(&self) -> bool {
        self.nodes.iter().any(|n| n.descriptor.is_push_source())
    }

    /// Ordinals of push-source nodes.
    pub fn push_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.descriptor.is_push_source())
            .map(|(i, _)| i)
    }

    /// Edges feeding node `ordinal`.
    pub fn edges_into(&self, ordinal: usize) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.dst_node == ordinal)
    }
}

fn validate_edge(nodes: &[NodeBuilder], edge: &Edge) -> Result<()> {
    let invalid = |cause: String| FlowError::InvalidEdge {
        src_node: edge.src_node,
        dst_node: edge.dst_node,
        cause,
    };
    let dst = nodes
        .get(edge.dst_node)
        .ok_or_else(|| invalid(format!("destination ordinal out of range ({} nodes)", nodes.len())))?;
    if edge.src_node >= nodes.len() {
        return Err(invalid(format!("source ordinal out of range ({} nodes)", nodes.len())));
    }
    let arg = edge
        .dst_arg()
        .and_then(|i| dst.descriptor.args.get(i))
        .ok_or_else(|| invalid("destination path does not name an argument".into()))?;

    if edge.src_node >= edge.dst_node {
        return Err(FlowError::EdgeOrder {
            node: dst.descriptor.display_name().to_string(),
            input: arg.name.clone(),
        });
    }
    Ok(())
}

impl fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .nodes
            .iter()
            .map(|n| n.descriptor.display_name())
            .collect();
        f.debug_struct("GraphBuilder")
            .field("nodes", &names)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeBody, NodeBuilder};
    use tickflow_core::{NodeDescriptor, NodeKind, TsShape};

    fn node(name: &str) -> NodeBuilder {
        NodeBuilder::from_fn(
            NodeDescriptor::new(name, NodeKind::Compute)
                .with_input("ts", TsShape::Scalar)
                .with_output(TsShape::Scalar),
            |_, _| Ok(NodeBody::Stub),
        )
    }

    #[test]
    fn forward_edges_are_accepted() {
        let builder = GraphBuilder::new(
            vec![node("a"), node("b")],
            [Edge::new(0, vec![], 1, vec![0]), Edge::new(0, vec![], 1, vec![0])],
        )
        .unwrap();
        assert_eq!(builder.edges().len(), 1);
        assert_eq!(builder.edges_into(1).count(), 1);
        assert!(!builder.has_push_nodes());
    }

    #[test]
    fn backward_edge_names_node_and_input() {
        let err = GraphBuilder::new(
            vec![node("a"), node("b")],
            [Edge::new(1, vec![], 0, vec![0])],
        )
        .unwrap_err();
        assert_eq!(err.code(), "E103");
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("'ts'"));
    }

    #[test]
    fn out_of_range_edge_is_invalid() {
        let err = GraphBuilder::new(vec![node("a")], [Edge::new(0, vec![], 3, vec![0])]).unwrap_err();
        assert_eq!(err.code(), "E104");
    }
}
