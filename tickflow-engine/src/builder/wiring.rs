//! Wiring-time graph assembly and topological ranking.
//!
//! A [`Wiring`] collects node builders and the connections between them in
//! whatever order the caller declares them. [`Wiring::build`] ranks the
//! nodes into an executable order and produces an immutable
//! [`GraphBuilder`].

use super::edge::Edge;
use super::graph_builder::GraphBuilder;
use crate::node::NodeBuilder;
use std::collections::{BTreeMap, BTreeSet};
use tickflow_core::{FlowError, NodeKind, Result};

/// Handle to a node declared in a [`Wiring`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub(crate) usize);

impl NodeRef {
    /// Declaration index inside the wiring.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Where the built graph will live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildContext {
    /// Whether push-source nodes may appear.
    pub allow_push: bool,
}

impl BuildContext {
    /// Top-level graph driven by the evaluation engine.
    pub const ROOT: Self = Self { allow_push: true };

    /// Body of a nested graph.
    pub const NESTED: Self = Self { allow_push: false };
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::ROOT
    }
}

#[derive(Debug, Clone)]
struct WiredInput {
    src: usize,
    src_path: Vec<usize>,
    dst_path: Vec<usize>,
}

/// Mutable graph under construction.
#[derive(Default)]
pub struct Wiring {
    nodes: Vec<NodeBuilder>,
    inputs: Vec<Vec<WiredInput>>,
    indirect: BTreeSet<(usize, usize)>,
    alternatives: BTreeMap<usize, BTreeSet<usize>>,
}

impl Wiring {
    /// Create an empty wiring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node.
    pub fn add_node(&mut self, node: NodeBuilder) -> NodeRef {
        self.nodes.push(node);
        self.inputs.push(Vec::new());
        NodeRef(self.nodes.len() - 1)
    }

    /// Number of declared nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been declared.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Connect `src`'s output to `dst`'s input `input`.
    pub fn connect(&mut self, src: NodeRef, dst: NodeRef, input: &str) -> Result<()> {
        self.connect_path(src, &[], dst, input, &[])
    }

    /// Connect a path inside `src`'s output to a path inside `dst`'s input.
    ///
    /// A non-empty `dst_sub` binds one child of a composite input, leaving
    /// the input unpeered.
    pub fn connect_path(
        &mut self,
        src: NodeRef,
        src_path: &[usize],
        dst: NodeRef,
        input: &str,
        dst_sub: &[usize],
    ) -> Result<()> {
        self.check(src)?;
        self.check(dst)?;
        let descriptor = &self.nodes[dst.0].descriptor;
        let arg = descriptor
            .arg_index(input)
            .filter(|&i| descriptor.args[i].is_time_series())
            .ok_or_else(|| FlowError::UnknownInput {
                node: descriptor.signature_name.clone(),
                input: input.to_string(),
            })?;

        let mut dst_path = Vec::with_capacity(dst_sub.len() + 1);
        dst_path.push(arg);
        dst_path.extend_from_slice(dst_sub);

        self.inputs[dst.0].push(WiredInput {
            src: src.0,
            src_path: src_path.to_vec(),
            dst_path,
        });
        Ok(())
    }

    /// Rank `node` after `depends_on` without a data edge between them.
    pub fn add_indirect_dependency(&mut self, node: NodeRef, depends_on: NodeRef) -> Result<()> {
        self.check(node)?;
        self.check(depends_on)?;
        self.indirect.insert((node.0, depends_on.0));
        Ok(())
    }

    /// Register `alternative` as standing in for `original` when ranking:
    /// every consumer of `original` is also ranked after `alternative`.
    pub fn add_ranking_alternative(&mut self, original: NodeRef, alternative: NodeRef) -> Result<()> {
        self.check(original)?;
        self.check(alternative)?;
        self.alternatives
            .entry(original.0)
            .or_default()
            .insert(alternative.0);
        Ok(())
    }

    fn check(&self, node: NodeRef) -> Result<()> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(FlowError::InvalidEdge {
                src_node: node.0,
                dst_node: node.0,
                cause: format!("node {} was not declared in this wiring", node.0),
            })
        }
    }

    /// Ranking dependencies of every node.
    fn dependencies(&self) -> Vec<BTreeSet<usize>> {
        let mut deps = vec![BTreeSet::new(); self.nodes.len()];
        for (dst, inputs) in self.inputs.iter().enumerate() {
            for input in inputs {
                deps[dst].insert(input.src);
                if let Some(alts) = self.alternatives.get(&input.src) {
                    deps[dst].extend(alts.iter().copied());
                }
            }
        }
        for &(node, depends_on) in &self.indirect {
            deps[node].insert(depends_on);
            if let Some(alts) = self.alternatives.get(&depends_on) {
                deps[node].extend(alts.iter().copied());
            }
        }
        for (node, d) in deps.iter_mut().enumerate() {
            d.remove(&node);
        }
        deps
    }

    /// Rank the nodes and produce the immutable builder.
    pub fn build(self, ctx: BuildContext) -> Result<GraphBuilder> {
        let count = self.nodes.len();
        let deps = self.dependencies();
        // Self-loops are dropped from `deps`; they are still cycles.
        for (dst, inputs) in self.inputs.iter().enumerate() {
            if inputs.iter().any(|i| i.src == dst) {
                return Err(FlowError::GraphCycle {
                    chain: self.render_chain(&[dst, dst]),
                });
            }
        }

        let mut consumers = vec![BTreeSet::new(); count];
        for (node, d) in deps.iter().enumerate() {
            for &dep in d {
                consumers[dep].insert(node);
            }
        }

        // Kahn's algorithm, smallest declaration index first.
        let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..count).filter(|&n| in_degree[n] == 0).collect();
        let mut sorted = Vec::with_capacity(count);
        while let Some(node) = ready.pop_first() {
            sorted.push(node);
            for &consumer in &consumers[node] {
                in_degree[consumer] -= 1;
                if in_degree[consumer] == 0 {
                    ready.insert(consumer);
                }
            }
        }

        if sorted.len() < count {
            let placed: BTreeSet<usize> = sorted.iter().copied().collect();
            let residual: BTreeSet<usize> = (0..count).filter(|n| !placed.contains(n)).collect();
            let chain = find_cycle(&deps, &residual);
            tracing::warn!(nodes = residual.len(), "Graph ranking found a cycle");
            return Err(FlowError::GraphCycle {
                chain: self.render_chain(&chain),
            });
        }

        if !ctx.allow_push {
            if let Some(&push) = sorted
                .iter()
                .find(|&&n| self.nodes[n].descriptor.is_push_source())
            {
                return Err(FlowError::PushNodeNotSupported {
                    node: self.nodes[push].descriptor.display_name().to_string(),
                });
            }
        }

        // Push sources first, stubs next, sinks last.
        let kind = |n: usize| self.nodes[n].descriptor.kind;
        let mut order: Vec<usize> = Vec::with_capacity(count);
        order.extend(sorted.iter().filter(|&&n| kind(n) == NodeKind::PushSource));
        order.extend(sorted.iter().filter(|&&n| kind(n) == NodeKind::Stub));
        order.extend(sorted.iter().filter(|&&n| {
            !matches!(kind(n), NodeKind::PushSource | NodeKind::Stub | NodeKind::Sink)
        }));
        order.extend(sorted.iter().filter(|&&n| kind(n) == NodeKind::Sink));

        let mut ordinals = vec![0; count];
        for (ordinal, &node) in order.iter().enumerate() {
            ordinals[node] = ordinal;
        }

        let mut edges = BTreeSet::new();
        for (dst, inputs) in self.inputs.iter().enumerate() {
            for input in inputs {
                edges.insert(Edge::new(
                    ordinals[input.src],
                    input.src_path.clone(),
                    ordinals[dst],
                    input.dst_path.clone(),
                ));
            }
        }

        let mut slots: Vec<Option<NodeBuilder>> = self.nodes.into_iter().map(Some).collect();
        let nodes: Vec<NodeBuilder> = order.iter().filter_map(|&n| slots[n].take()).collect();

        tracing::debug!(nodes = nodes.len(), edges = edges.len(), "Ranked graph");
        GraphBuilder::with_ordinals(nodes, edges, ordinals)
    }

    fn render_chain(&self, chain: &[usize]) -> String {
        chain
            .iter()
            .map(|&n| {
                let node = &self.nodes[n];
                let scalars: Vec<String> = node
                    .scalars
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                format!(
                    "  {} ({})",
                    node.descriptor.display_name(),
                    scalars.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join(" ->\n")
    }
}

/// Walk dependencies inside the unsorted residue until a node repeats.
fn find_cycle(deps: &[BTreeSet<usize>], residual: &BTreeSet<usize>) -> Vec<usize> {
    let Some(&start) = residual.iter().next() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        // Every residual node keeps at least one residual dependency.
        let Some(&next) = deps[current].iter().find(|d| residual.contains(d)) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&n| n == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            cycle.reverse();
            return cycle;
        }
        path.push(next);
        current = next;
    }
}
