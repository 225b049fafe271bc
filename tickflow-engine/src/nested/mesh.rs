//! Mesh: keyed graphs that may read each other's outputs.
//!
//! A graph reaches another key through a mesh lookup, which hands out a
//! reference to that key's entry of the host's dict output and records a
//! dependency. Graphs are evaluated in rank order so a dependency is always
//! evaluated before the graph reading it. A lookup of a key nobody asked
//! for creates that key's graph. Keys that are neither requested by the
//! host's keys input nor depended upon are removed on a later evaluation.
//!
//! Rank changes and graphs created by lookups take effect from the next
//! engine instant: within the tick that discovers them, readers may see
//! the previous value of their dependency.

use super::ranking::{DependencyStatus, MeshRanking};
use super::{
    evaluate_due, host_input, nested_error, reschedule_host, restart_graphs, retire_graph,
    NestedGraphTemplate, NestedNode, NestedStrategy,
};
use crate::node::{NodeBody, NodeBuilder};
use crate::runtime::{MeshChange, Runtime};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tickflow_core::{GraphId, Key, NodeDescriptor, NodeHandle, OutputId, Result, MIN_DT};

#[derive(Debug)]
struct MeshConfig {
    template: NestedGraphTemplate,
    keys_input: String,
    keyed: BTreeSet<String>,
}

/// Host of mutually dependent keyed graphs.
#[derive(Debug)]
pub struct MeshNode {
    config: Arc<MeshConfig>,
    graphs: BTreeMap<Key, GraphId>,
    ranking: MeshRanking,
    /// Keys currently requested by the keys input.
    requested: BTreeSet<Key>,
    /// Keys to remove once nothing depends on them.
    retiring: BTreeSet<Key>,
}

impl MeshNode {
    /// Node meshing `template` over the keys of `keys_input`. The host's
    /// output must be a dict.
    pub fn builder(
        descriptor: NodeDescriptor,
        template: NestedGraphTemplate,
        keys_input: impl Into<String>,
        keyed_inputs: &[&str],
    ) -> NodeBuilder {
        let config = Arc::new(MeshConfig {
            template,
            keys_input: keys_input.into(),
            keyed: keyed_inputs.iter().map(|s| s.to_string()).collect(),
        });
        NodeBuilder::from_fn(descriptor.with_nested_graphs(true), move |_, _| {
            Ok(NodeBody::Nested(Box::new(NestedNode::Mesh(MeshNode {
                config: Arc::clone(&config),
                graphs: BTreeMap::new(),
                ranking: MeshRanking::new(),
                requested: BTreeSet::new(),
                retiring: BTreeSet::new(),
            }))))
        })
    }

    /// Ranks of the live keys.
    pub fn ranking(&self) -> &MeshRanking {
        &self.ranking
    }

    /// Keys with a live graph.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.graphs.keys()
    }

    fn output(rt: &Runtime, host: NodeHandle) -> Result<OutputId> {
        rt.node(host)?
            .output
            .ok_or_else(|| nested_error(rt, host, "mesh host has no dict output"))
    }

    fn add_key(&mut self, rt: &mut Runtime, host: NodeHandle, key: Key, rank: Option<usize>) -> Result<()> {
        let dict = Self::output(rt, host)?;
        let output = rt.dict_get_or_create(dict, &key)?;
        let template = &self.config.template;
        let refs = template.host_refs(rt, host, &self.config.keyed, Some(&key))?;
        let graph = template.instantiate(rt, host, &refs, Some(output), Some(&key))?;
        let rank = self.ranking.insert(key.clone(), rank);
        tracing::debug!(host = %host, key = %key, rank, graph = %graph, "Mesh key added");
        self.graphs.insert(key, graph);
        Ok(())
    }

    fn remove_key(&mut self, rt: &mut Runtime, host: NodeHandle, key: &Key) -> Result<()> {
        if let Some(graph) = self.graphs.remove(key) {
            retire_graph(rt, graph)?;
        }
        for released in self.ranking.remove(key) {
            if self.is_orphan(&released) {
                self.retiring.insert(released);
            }
        }
        let dict = Self::output(rt, host)?;
        rt.dict_remove(dict, key)?;
        tracing::debug!(host = %host, key = %key, "Mesh key removed");
        Ok(())
    }

    fn is_orphan(&self, key: &Key) -> bool {
        !self.requested.contains(key) && self.ranking.dependents_of(key).is_empty()
    }

    fn apply_requests(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        for change in rt.take_mesh_requests(host) {
            match change {
                MeshChange::Add { from, to } => {
                    if !self.graphs.contains_key(&from) {
                        continue;
                    }
                    self.retiring.remove(&to);
                    let status = self.ranking.add_dependency(&from, &to);
                    if status == DependencyStatus::Pending && !self.graphs.contains_key(&to) {
                        self.add_key(rt, host, to, Some(0))?;
                    }
                }
                MeshChange::Remove { from, to } => {
                    self.ranking.remove_dependency(&from, &to);
                    if self.graphs.contains_key(&to) && self.is_orphan(&to) {
                        self.retiring.insert(to);
                    }
                }
            }
        }
        Ok(())
    }
}

impl NestedStrategy for MeshNode {
    fn wire(&mut self, rt: &mut Runtime, _host: NodeHandle) -> Result<()> {
        restart_graphs(rt, self.graphs.values())
    }

    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let now = rt.evaluation_time;

        for key in std::mem::take(&mut self.retiring) {
            if self.graphs.contains_key(&key) && self.is_orphan(&key) {
                self.remove_key(rt, host, &key)?;
            }
        }

        let input = host_input(rt, host, &self.config.keys_input)?;
        let keys = rt.input_keys(input);
        let dropped: Vec<Key> = self.requested.difference(&keys).cloned().collect();
        for key in dropped {
            self.requested.remove(&key);
            if self.is_orphan(&key) {
                self.remove_key(rt, host, &key)?;
            }
        }
        for key in keys {
            if self.requested.insert(key.clone()) && !self.graphs.contains_key(&key) {
                self.add_key(rt, host, key, None)?;
            }
        }

        let template = &self.config.template;
        for rank in 0..=self.ranking.max_rank() {
            for key in self.ranking.keys_at(rank) {
                let Some(graph) = self.graphs.get(&key).copied() else {
                    continue;
                };
                let refs = template.host_refs(rt, host, &self.config.keyed, Some(&key))?;
                template.sync_inputs(rt, graph, &refs)?;
                evaluate_due(rt, graph)?;
            }
        }

        self.apply_requests(rt, host)?;
        if self.ranking.has_requests() {
            let changed = self.ranking.apply_re_ranks()?;
            if !changed.is_empty() {
                tracing::debug!(host = %host, changed = changed.len(), max_rank = self.ranking.max_rank(), "Mesh re-ranked");
            }
        }

        reschedule_host(rt, host, self.graphs.values())?;
        if !self.retiring.is_empty() {
            rt.schedule_internal(host, now + MIN_DT)?;
        }
        Ok(())
    }

    fn graphs(&self) -> Vec<GraphId> {
        self.graphs.values().copied().collect()
    }

    fn release(&mut self, _rt: &mut Runtime) {
        self.graphs.clear();
        self.ranking = MeshRanking::new();
        self.requested.clear();
        self.retiring.clear();
    }
}
