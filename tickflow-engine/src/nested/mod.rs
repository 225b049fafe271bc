//! Nodes hosting nested graphs.
//!
//! A nested graph is an ordinary [`Graph`](crate::graph::Graph) made from a
//! shared [`NestedGraphTemplate`] with its host node as parent. It shares the
//! engine's evaluation time but keeps its own schedule; whenever it gains a
//! request, the host is scheduled in turn.
//!
//! The template's input stubs are REF-shaped: the host points each one at
//! whatever its own input of the same name reads, so nested nodes bind
//! straight through to the upstream outputs. The template's output node is
//! spliced onto the host's output (or an entry of it) the same way. No data
//! is copied in either direction.
//!
//! Graphs torn down during a tick are stopped immediately and disposed
//! before the next evaluation.

mod component;
mod map;
mod mesh;
pub mod ranking;
mod reduce;
mod switch;
mod try_except;

pub use component::ComponentNode;
pub use map::MapNode;
pub use mesh::MeshNode;
pub use ranking::{DependencyStatus, MeshRanking};
pub use reduce::ReduceNode;
pub use switch::{SwitchBuilder, SwitchNode};
pub use try_except::{TryExceptNode, EXCEPTION_FIELD, OUT_FIELD};

use crate::builder::{BuildContext, GraphBuilder, NodeRef, Wiring};
use crate::graph::LifecycleState;
use crate::runtime::{GraphWiring, Runtime};
use crate::timeseries::TsRef;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tickflow_core::{
    FlowError, GraphId, InputId, Key, NodeHandle, NodeKind, OutputId, Result, TsShape, Value,
    MAX_DT,
};

/// A graph body instantiated by nested nodes.
#[derive(Debug, Clone)]
pub struct NestedGraphTemplate {
    builder: Arc<GraphBuilder>,
    /// Host argument name -> ordinal of the REF stub it feeds.
    inputs: Vec<(String, usize)>,
    output: Option<usize>,
    key: Option<usize>,
}

impl NestedGraphTemplate {
    /// Build a template from a wiring.
    ///
    /// `inputs` names the stubs fed from the host's inputs of the same
    /// name, `output` the node whose output becomes the host's, and `key`
    /// an optional stub that receives the graph's key as a scalar.
    pub fn from_wiring(
        wiring: Wiring,
        inputs: &[(&str, NodeRef)],
        output: Option<NodeRef>,
        key: Option<NodeRef>,
    ) -> Result<Self> {
        let builder = wiring.build(BuildContext::NESTED)?;
        let ordinal = |node: NodeRef| {
            builder.ordinal_of(node).ok_or_else(|| template_error(format!(
                "node {} is not part of the template",
                node.index()
            )))
        };
        let inputs = inputs
            .iter()
            .map(|(name, node)| Ok((name.to_string(), ordinal(*node)?)))
            .collect::<Result<Vec<_>>>()?;
        let output = output.map(ordinal).transpose()?;
        let key = key.map(ordinal).transpose()?;
        Self::new(Arc::new(builder), inputs, output, key)
    }

    /// Create a template from an already ranked builder and ordinals.
    pub fn new(
        builder: Arc<GraphBuilder>,
        inputs: Vec<(String, usize)>,
        output: Option<usize>,
        key: Option<usize>,
    ) -> Result<Self> {
        for (name, ordinal) in &inputs {
            let descriptor = builder
                .node(*ordinal)
                .map(|n| n.descriptor())
                .ok_or_else(|| template_error(format!("no node at ordinal {}", ordinal)))?;
            let is_ref_stub = descriptor.kind == NodeKind::Stub
                && descriptor.output.as_ref().is_some_and(TsShape::is_reference);
            if !is_ref_stub {
                return Err(template_error(format!(
                    "input '{}' must be a stub with a REF output",
                    name
                )));
            }
        }
        if let Some(ordinal) = key {
            let descriptor = builder
                .node(ordinal)
                .map(|n| n.descriptor())
                .ok_or_else(|| template_error(format!("no node at ordinal {}", ordinal)))?;
            if descriptor.kind != NodeKind::Stub || descriptor.output != Some(TsShape::Scalar) {
                return Err(template_error("key must be a stub with a scalar output"));
            }
        }
        if let Some(ordinal) = output {
            let has_output = builder
                .node(ordinal)
                .is_some_and(|n| n.descriptor().output.is_some());
            if !has_output {
                return Err(template_error("output node declares no output"));
            }
        }
        Ok(Self {
            builder,
            inputs,
            output,
            key,
        })
    }

    /// Ranked graph body.
    pub fn builder(&self) -> &Arc<GraphBuilder> {
        &self.builder
    }

    /// Names of the host inputs the template reads.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|(name, _)| name.as_str())
    }

    /// Shape written by the output node.
    pub fn output_shape(&self) -> Option<&TsShape> {
        self.output
            .and_then(|o| self.builder.node(o))
            .and_then(|n| n.descriptor().output.as_ref())
    }

    /// Make, initialise and start one instance.
    pub(crate) fn instantiate(
        &self,
        rt: &mut Runtime,
        host: NodeHandle,
        refs: &BTreeMap<String, TsRef>,
        output: Option<OutputId>,
        key: Option<&Key>,
    ) -> Result<GraphId> {
        let mut wiring = GraphWiring::default();
        for (name, ordinal) in &self.inputs {
            wiring
                .stub_refs
                .insert(*ordinal, refs.get(name).cloned().unwrap_or_default());
        }
        if let (Some(ordinal), Some(output)) = (self.output, output) {
            wiring.output_overrides.insert(ordinal, output);
        }

        let signature = rt.node(host)?.descriptor.display_name().to_string();
        let label = match key {
            Some(key) => format!("{}[{}]", signature, key),
            None => signature,
        };
        let id = rt.make_graph(
            Arc::clone(&self.builder),
            Some(host),
            wiring,
            key.cloned(),
            Some(label),
        )?;

        let started = self.start_instance(rt, id, key);
        if let Err(err) = started {
            if let Err(dispose) = rt.dispose_graph(id) {
                tracing::warn!(graph = %id, error = %dispose, "Failed to release nested graph");
            }
            return Err(err);
        }
        tracing::debug!(host = %host, graph = %id, key = ?key, "Nested graph instantiated");
        Ok(id)
    }

    fn start_instance(&self, rt: &mut Runtime, id: GraphId, key: Option<&Key>) -> Result<()> {
        rt.initialise_graph(id)?;
        if let (Some(ordinal), Some(key)) = (self.key, key) {
            if let Some(output) = rt.graph(id)?.node(ordinal).and_then(|n| n.output) {
                rt.set_value(output, Value::from(key.clone()))?;
            }
        }
        rt.start_graph(id)
    }

    /// Re-point the input stubs of `id` at `refs`. Unchanged references
    /// are left alone.
    pub(crate) fn sync_inputs(
        &self,
        rt: &mut Runtime,
        id: GraphId,
        refs: &BTreeMap<String, TsRef>,
    ) -> Result<()> {
        for (name, ordinal) in &self.inputs {
            let Some(output) = rt.graph(id)?.node(*ordinal).and_then(|n| n.output) else {
                continue;
            };
            let reference = refs.get(name).cloned().unwrap_or_default();
            rt.set_reference(output, reference)?;
        }
        Ok(())
    }

    /// References for every input stub, read from the host's inputs.
    /// Arguments named in `keyed` resolve to the entry `key` of the dict
    /// the host input reads.
    pub(crate) fn host_refs(
        &self,
        rt: &Runtime,
        host: NodeHandle,
        keyed: &BTreeSet<String>,
        key: Option<&Key>,
    ) -> Result<BTreeMap<String, TsRef>> {
        let mut refs = BTreeMap::new();
        for (name, _) in &self.inputs {
            let input = host_input(rt, host, name)?;
            let reference = match key {
                Some(key) if keyed.contains(name) => TsRef::from(rt.input_dict_child(input, key)),
                _ => rt.input_ref(input),
            };
            refs.insert(name.clone(), reference);
        }
        Ok(refs)
    }
}

fn template_error(cause: impl Into<String>) -> FlowError {
    FlowError::Nested {
        node: "template".into(),
        cause: cause.into(),
    }
}

/// Error raised by a host node about its nested graphs.
pub(crate) fn nested_error(rt: &Runtime, host: NodeHandle, cause: impl Into<String>) -> FlowError {
    FlowError::Nested {
        node: rt.node_path(host),
        cause: cause.into(),
    }
}

/// Root input of the host argument `name`.
pub(crate) fn host_input(rt: &Runtime, host: NodeHandle, name: &str) -> Result<InputId> {
    let node = rt.node(host)?;
    node.input(name).ok_or_else(|| FlowError::UnknownInput {
        node: node.descriptor.display_name().to_string(),
        input: name.to_string(),
    })
}

/// Evaluate `id` if it has a request due now.
pub(crate) fn evaluate_due(rt: &mut Runtime, id: GraphId) -> Result<()> {
    let graph = rt.graph(id)?;
    if graph.state == LifecycleState::Started && graph.next_scheduled <= rt.evaluation_time {
        rt.evaluate_graph(id)?;
    }
    Ok(())
}

/// Schedule the host for the earliest request among its graphs.
pub(crate) fn reschedule_host<'a>(
    rt: &mut Runtime,
    host: NodeHandle,
    graphs: impl IntoIterator<Item = &'a GraphId>,
) -> Result<()> {
    let next = graphs
        .into_iter()
        .filter_map(|id| rt.graphs.get(*id))
        .filter(|g| g.state == LifecycleState::Started)
        .map(|g| g.next_scheduled)
        .min();
    match next {
        Some(next) if next < MAX_DT => rt.schedule_internal(host, next),
        _ => Ok(()),
    }
}

/// Stop a graph now and dispose of it before the next evaluation.
pub(crate) fn retire_graph(rt: &mut Runtime, id: GraphId) -> Result<()> {
    if rt.graph(id)?.state == LifecycleState::Started {
        rt.stop_graph(id)?;
    }
    rt.before_notifications
        .push(Box::new(move |rt: &mut Runtime| rt.dispose_graph(id)));
    tracing::debug!(graph = %id, "Nested graph retired");
    Ok(())
}

/// Restart graphs stopped along with their host.
pub(crate) fn restart_graphs<'a>(
    rt: &mut Runtime,
    graphs: impl IntoIterator<Item = &'a GraphId>,
) -> Result<()> {
    for id in graphs {
        if rt.graph(*id)?.state == LifecycleState::Stopped {
            rt.start_graph(*id)?;
        }
    }
    Ok(())
}

/// Behaviour shared by every nested node kind.
pub(crate) trait NestedStrategy {
    /// Set up graphs when the host starts (or restart them).
    fn wire(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()>;

    /// Bring graphs in line with the host's inputs and evaluate them.
    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()>;

    /// Live graphs owned by the host.
    fn graphs(&self) -> Vec<GraphId>;

    /// Forget graphs and free anything else the host created.
    fn release(&mut self, rt: &mut Runtime);

    fn stop(&mut self, rt: &mut Runtime, _host: NodeHandle) -> Result<()> {
        let mut first_error = None;
        for id in self.graphs() {
            let started = rt
                .graphs
                .get(id)
                .is_some_and(|g| g.state == LifecycleState::Started);
            if started {
                if let Err(err) = rt.stop_graph(id) {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn dispose(&mut self, rt: &mut Runtime, _host: NodeHandle) -> Result<()> {
        let mut first_error = None;
        for id in self.graphs() {
            if let Err(err) = rt.dispose_graph(id) {
                first_error.get_or_insert(err);
            }
        }
        self.release(rt);
        first_error.map_or(Ok(()), Err)
    }
}

/// Runtime state of a node hosting nested graphs.
#[derive(Debug)]
pub enum NestedNode {
    /// One graph per key.
    Map(MapNode),
    /// Balanced tree of binary reductions.
    Reduce(ReduceNode),
    /// One graph chosen by key.
    Switch(SwitchNode),
    /// Graph whose failures become output ticks.
    TryExcept(TryExceptNode),
    /// Single embedded graph.
    Component(ComponentNode),
    /// Mutually dependent keyed graphs.
    Mesh(MeshNode),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            NestedNode::Map($inner) => $body,
            NestedNode::Reduce($inner) => $body,
            NestedNode::Switch($inner) => $body,
            NestedNode::TryExcept($inner) => $body,
            NestedNode::Component($inner) => $body,
            NestedNode::Mesh($inner) => $body,
        }
    };
}

impl NestedNode {
    /// Kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::Reduce(_) => "reduce",
            Self::Switch(_) => "switch",
            Self::TryExcept(_) => "try_except",
            Self::Component(_) => "component",
            Self::Mesh(_) => "mesh",
        }
    }

    /// Graphs currently owned by the node.
    pub fn graphs(&self) -> Vec<GraphId> {
        dispatch!(self, inner => inner.graphs())
    }

    pub(crate) fn wire(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        dispatch!(self, inner => inner.wire(rt, host))
    }

    pub(crate) fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        dispatch!(self, inner => inner.eval(rt, host))
    }

    pub(crate) fn stop(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        dispatch!(self, inner => inner.stop(rt, host))
    }

    pub(crate) fn dispose(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        dispatch!(self, inner => inner.dispose(rt, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBuilder;
    use tickflow_core::NodeDescriptor;

    fn passthrough() -> NodeBuilder {
        NodeBuilder::from_fn(
            NodeDescriptor::new("pass", NodeKind::Compute)
                .with_input("ts", TsShape::Scalar)
                .with_output(TsShape::Scalar),
            |_, _| Ok(crate::node::NodeBody::Stub),
        )
    }

    #[test]
    fn template_resolves_ordinals() {
        let mut w = Wiring::new();
        let body = w.add_node(passthrough());
        let ts = w.add_node(NodeBuilder::stub("ts", TsShape::reference(TsShape::Scalar)));
        w.connect(ts, body, "ts").unwrap();

        let template = NestedGraphTemplate::from_wiring(w, &[("ts", ts)], Some(body), None).unwrap();
        assert_eq!(template.input_names().collect::<Vec<_>>(), vec!["ts"]);
        assert_eq!(template.output_shape(), Some(&TsShape::Scalar));
        // stubs rank ahead of compute nodes
        assert_eq!(template.inputs[0].1, 0);
        assert_eq!(template.output, Some(1));
    }

    #[test]
    fn template_rejects_plain_input_stub() {
        let mut w = Wiring::new();
        let body = w.add_node(passthrough());
        let ts = w.add_node(NodeBuilder::stub("ts", TsShape::Scalar));
        w.connect(ts, body, "ts").unwrap();

        let err = NestedGraphTemplate::from_wiring(w, &[("ts", ts)], Some(body), None).unwrap_err();
        assert_eq!(err.code(), "E402");
    }

    #[test]
    fn template_rejects_push_nodes() {
        let mut w = Wiring::new();
        w.add_node(NodeBuilder::from_fn(
            NodeDescriptor::new("feed", NodeKind::PushSource).with_output(TsShape::Scalar),
            |_, _| Ok(crate::node::NodeBody::Stub),
        ));
        let err = NestedGraphTemplate::from_wiring(w, &[], None, None).unwrap_err();
        assert_eq!(err.code(), "E102");
    }
}
