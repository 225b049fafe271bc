//! Map: one nested graph per key.

use super::{
    evaluate_due, host_input, reschedule_host, restart_graphs, retire_graph, NestedGraphTemplate,
    NestedNode, NestedStrategy,
};
use crate::node::{NodeBody, NodeBuilder};
use crate::runtime::Runtime;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tickflow_core::{GraphId, Key, NodeDescriptor, NodeHandle, Result};

#[derive(Debug)]
struct MapConfig {
    template: NestedGraphTemplate,
    keys_input: String,
    keyed: BTreeSet<String>,
}

/// Host of one graph per key of its `keys` input.
///
/// Keys come from a set input or from the key set of a dict input. Inputs
/// named as keyed bind each graph to the entry of that dict for its key;
/// every other input is shared by all graphs. A dict output gets one entry
/// per key, written by the graph of that key.
#[derive(Debug)]
pub struct MapNode {
    config: Arc<MapConfig>,
    graphs: BTreeMap<Key, GraphId>,
}

impl MapNode {
    /// Node mapping `template` over the keys of `keys_input`.
    pub fn builder(
        descriptor: NodeDescriptor,
        template: NestedGraphTemplate,
        keys_input: impl Into<String>,
        keyed_inputs: &[&str],
    ) -> NodeBuilder {
        let config = Arc::new(MapConfig {
            template,
            keys_input: keys_input.into(),
            keyed: keyed_inputs.iter().map(|s| s.to_string()).collect(),
        });
        NodeBuilder::from_fn(descriptor.with_nested_graphs(true), move |_, _| {
            Ok(NodeBody::Nested(Box::new(NestedNode::Map(MapNode {
                config: Arc::clone(&config),
                graphs: BTreeMap::new(),
            }))))
        })
    }

    /// Keys with a live graph.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.graphs.keys()
    }

    fn add_key(&mut self, rt: &mut Runtime, host: NodeHandle, key: Key) -> Result<()> {
        let output = match rt.node(host)?.output {
            Some(dict) => Some(rt.dict_get_or_create(dict, &key)?),
            None => None,
        };
        let template = &self.config.template;
        let refs = template.host_refs(rt, host, &self.config.keyed, Some(&key))?;
        let graph = template.instantiate(rt, host, &refs, output, Some(&key))?;
        self.graphs.insert(key, graph);
        Ok(())
    }

    fn remove_key(&mut self, rt: &mut Runtime, host: NodeHandle, key: &Key) -> Result<()> {
        if let Some(graph) = self.graphs.remove(key) {
            retire_graph(rt, graph)?;
        }
        if let Some(dict) = rt.node(host)?.output {
            rt.dict_remove(dict, key)?;
        }
        Ok(())
    }
}

impl NestedStrategy for MapNode {
    fn wire(&mut self, rt: &mut Runtime, _host: NodeHandle) -> Result<()> {
        restart_graphs(rt, self.graphs.values())
    }

    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let input = host_input(rt, host, &self.config.keys_input)?;
        let keys = rt.input_keys(input);

        let removed: Vec<Key> = self
            .graphs
            .keys()
            .filter(|k| !keys.contains(*k))
            .cloned()
            .collect();
        for key in &removed {
            self.remove_key(rt, host, key)?;
        }
        let added: Vec<Key> = keys
            .iter()
            .filter(|k| !self.graphs.contains_key(*k))
            .cloned()
            .collect();
        for key in added {
            self.add_key(rt, host, key)?;
        }
        if !removed.is_empty() {
            tracing::debug!(host = %host, removed = removed.len(), keys = self.graphs.len(), "Map keys changed");
        }

        let template = &self.config.template;
        for (key, graph) in &self.graphs {
            let refs = template.host_refs(rt, host, &self.config.keyed, Some(key))?;
            template.sync_inputs(rt, *graph, &refs)?;
            evaluate_due(rt, *graph)?;
        }
        reschedule_host(rt, host, self.graphs.values())
    }

    fn graphs(&self) -> Vec<GraphId> {
        self.graphs.values().copied().collect()
    }

    fn release(&mut self, _rt: &mut Runtime) {
        self.graphs.clear();
    }
}
