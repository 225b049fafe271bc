//! Switch: one nested graph selected by the value of a key input.

use super::{
    evaluate_due, host_input, nested_error, reschedule_host, restart_graphs, retire_graph,
    NestedGraphTemplate, NestedNode, NestedStrategy,
};
use crate::node::{NodeBody, NodeBuilder};
use crate::runtime::Runtime;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tickflow_core::{GraphId, Key, NodeDescriptor, NodeHandle, Result};

#[derive(Debug)]
struct SwitchConfig {
    key_input: String,
    cases: BTreeMap<Key, Arc<NestedGraphTemplate>>,
    default: Option<Arc<NestedGraphTemplate>>,
    reload_on_ticked: bool,
}

/// Assembles a switch node.
#[derive(Debug)]
pub struct SwitchBuilder {
    descriptor: NodeDescriptor,
    config: SwitchConfig,
}

impl SwitchBuilder {
    /// Graph used when the key equals `key`.
    pub fn case(mut self, key: impl Into<Key>, template: NestedGraphTemplate) -> Self {
        self.config.cases.insert(key.into(), Arc::new(template));
        self
    }

    /// Graph used for keys without a case.
    pub fn default_case(mut self, template: NestedGraphTemplate) -> Self {
        self.config.default = Some(Arc::new(template));
        self
    }

    /// Rebuild the graph whenever the key ticks, even with an unchanged value.
    pub fn reload_on_ticked(mut self, reload: bool) -> Self {
        self.config.reload_on_ticked = reload;
        self
    }

    /// Finish the node.
    pub fn build(self) -> NodeBuilder {
        let config = Arc::new(self.config);
        NodeBuilder::from_fn(self.descriptor.with_nested_graphs(true), move |_, _| {
            Ok(NodeBody::Nested(Box::new(NestedNode::Switch(SwitchNode {
                config: Arc::clone(&config),
                active: None,
            }))))
        })
    }
}

#[derive(Debug)]
struct ActiveCase {
    key: Key,
    graph: GraphId,
    template: Arc<NestedGraphTemplate>,
}

/// Host of the graph selected by the current key.
///
/// The selected graph writes straight to the host's output and reads the
/// host's inputs by name.
#[derive(Debug)]
pub struct SwitchNode {
    config: Arc<SwitchConfig>,
    active: Option<ActiveCase>,
}

impl SwitchNode {
    /// Start assembling a switch over the scalar input `key_input` of
    /// `descriptor`.
    pub fn builder(descriptor: NodeDescriptor, key_input: impl Into<String>) -> SwitchBuilder {
        SwitchBuilder {
            descriptor,
            config: SwitchConfig {
                key_input: key_input.into(),
                cases: BTreeMap::new(),
                default: None,
                reload_on_ticked: false,
            },
        }
    }

    /// Key of the selected graph.
    pub fn active_key(&self) -> Option<&Key> {
        self.active.as_ref().map(|a| &a.key)
    }
}

impl NestedStrategy for SwitchNode {
    fn wire(&mut self, rt: &mut Runtime, _host: NodeHandle) -> Result<()> {
        match &self.active {
            Some(active) => restart_graphs(rt, [&active.graph]),
            None => Ok(()),
        }
    }

    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let input = host_input(rt, host, &self.config.key_input)?;
        let Some(value) = rt.input_value(input) else {
            return Ok(());
        };
        let key = value
            .to_key()
            .ok_or_else(|| nested_error(rt, host, format!("switch key {} is not a valid key", value)))?;
        let reload = self.config.reload_on_ticked && rt.input_modified(input);

        let switching = match &self.active {
            Some(active) => active.key != key || reload,
            None => true,
        };
        if switching {
            if let Some(previous) = self.active.take() {
                retire_graph(rt, previous.graph)?;
            }
            let template = self
                .config
                .cases
                .get(&key)
                .or(self.config.default.as_ref())
                .cloned()
                .ok_or_else(|| nested_error(rt, host, format!("no graph for switch key {}", key)))?;
            let refs = template.host_refs(rt, host, &BTreeSet::new(), None)?;
            let output = rt.node(host)?.output;
            let graph = template.instantiate(rt, host, &refs, output, Some(&key))?;
            tracing::debug!(host = %host, key = %key, graph = %graph, "Switch selected graph");
            self.active = Some(ActiveCase {
                key,
                graph,
                template,
            });
        }

        if let Some(active) = &self.active {
            let refs = active.template.host_refs(rt, host, &BTreeSet::new(), None)?;
            active.template.sync_inputs(rt, active.graph, &refs)?;
            evaluate_due(rt, active.graph)?;
            reschedule_host(rt, host, [&active.graph])?;
        }
        Ok(())
    }

    fn graphs(&self) -> Vec<GraphId> {
        self.active.iter().map(|a| a.graph).collect()
    }

    fn release(&mut self, _rt: &mut Runtime) {
        self.active = None;
    }
}
