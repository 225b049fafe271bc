//! Node behaviour and the context handed to it.
//!
//! The wiring layer supplies a [`NodeBuilder`] per node: the resolved
//! descriptor, scalar arguments and a [`NodeFactory`] that makes and
//! releases runtime instances. An instance is a [`NodeBody`]: compute logic,
//! a nested-graph host, or an inert stub.

use crate::engine::{EvaluationEngineApi, PushSender};
use crate::nested::NestedNode;
use crate::runtime::Runtime;
use crate::timeseries::TsRef;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tickflow_core::{
    EngineDelta, EngineTime, FlowError, GraphId, Injectable, InputId, Key, NodeDescriptor,
    NodeHandle, NodeKind, OutputId, Result, TsShape, Value,
};

/// Behaviour of a compute or source node.
///
/// Errors returned from these methods are caught at the node boundary.
/// Returning a fatal [`FlowError`] (directly or wrapped in `anyhow`)
/// aborts evaluation instead.
pub trait NodeLogic: Send {
    /// Called once when the owning graph starts.
    fn start(&mut self, _ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the node is scheduled and its inputs satisfy the
    /// descriptor's validity requirements.
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()>;

    /// Called once when the owning graph stops.
    fn stop(&mut self, _ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Apply a message from the push queue. Returning `false` declines the
    /// message for this tick; it is offered again on the next one.
    fn apply_message(&mut self, ctx: &mut NodeContext<'_>, message: Value) -> anyhow::Result<bool> {
        ctx.set_output(message)?;
        Ok(true)
    }
}

/// A runtime node instance.
pub enum NodeBody {
    /// Plain compute/source/sink logic.
    Compute(Box<dyn NodeLogic>),
    /// Host of one or more nested graphs.
    Nested(Box<NestedNode>),
    /// Placeholder whose output is supplied from outside the graph.
    Stub,
}

impl NodeBody {
    /// Wrap compute logic.
    pub fn compute(logic: impl NodeLogic + 'static) -> Self {
        Self::Compute(Box::new(logic))
    }
}

impl fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute(_) => write!(f, "Compute"),
            Self::Nested(nested) => write!(f, "Nested({})", nested.kind_name()),
            Self::Stub => write!(f, "Stub"),
        }
    }
}

/// Makes and releases runtime instances of one node.
pub trait NodeFactory: Send + Sync {
    /// Make the instance for node `ordinal` of `graph`.
    fn make_instance(&self, graph: GraphId, ordinal: usize) -> Result<NodeBody>;

    /// Release an instance made by this factory.
    fn release_instance(&self, _body: NodeBody) {}
}

impl<F> NodeFactory for F
where
    F: Fn(GraphId, usize) -> Result<NodeBody> + Send + Sync,
{
    fn make_instance(&self, graph: GraphId, ordinal: usize) -> Result<NodeBody> {
        self(graph, ordinal)
    }
}

/// Everything needed to instantiate one node.
#[derive(Clone)]
pub struct NodeBuilder {
    pub(crate) descriptor: Arc<NodeDescriptor>,
    pub(crate) scalars: Arc<BTreeMap<String, Value>>,
    pub(crate) factory: Arc<dyn NodeFactory>,
}

impl NodeBuilder {
    /// Create a builder from a descriptor and a factory.
    pub fn new(descriptor: NodeDescriptor, factory: Arc<dyn NodeFactory>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            scalars: Arc::new(BTreeMap::new()),
            factory,
        }
    }

    /// Create a builder whose factory is a closure.
    pub fn from_fn<F>(descriptor: NodeDescriptor, make: F) -> Self
    where
        F: Fn(GraphId, usize) -> Result<NodeBody> + Send + Sync + 'static,
    {
        Self::new(descriptor, Arc::new(make))
    }

    /// Create a builder that makes a fresh [`NodeLogic`] per instance.
    pub fn from_logic<L, F>(descriptor: NodeDescriptor, make: F) -> Self
    where
        L: NodeLogic + 'static,
        F: Fn() -> L + Send + Sync + 'static,
    {
        Self::from_fn(descriptor, move |_, _| Ok(NodeBody::compute(make())))
    }

    /// A stub whose output is supplied by the graph's host.
    pub fn stub(name: impl Into<String>, output: TsShape) -> Self {
        Self::from_fn(
            NodeDescriptor::new(name, NodeKind::Stub).with_output(output),
            |_, _| Ok(NodeBody::Stub),
        )
    }

    /// Add a scalar argument.
    pub fn with_scalar(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.scalars).insert(name.into(), value.into());
        self
    }

    /// Set the diagnostic label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.descriptor).label = Some(label.into());
        self
    }

    /// Resolved descriptor.
    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// Scalar arguments.
    pub fn scalars(&self) -> &BTreeMap<String, Value> {
        &self.scalars
    }

    /// Instance factory.
    pub fn factory(&self) -> &Arc<dyn NodeFactory> {
        &self.factory
    }
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("signature", &self.descriptor.signature_name)
            .field("kind", &self.descriptor.kind)
            .field("scalars", &self.scalars)
            .finish()
    }
}

/// View of the runtime from inside one node.
pub struct NodeContext<'a> {
    rt: &'a mut Runtime,
    handle: NodeHandle,
    descriptor: Arc<NodeDescriptor>,
    scalars: Arc<BTreeMap<String, Value>>,
    inputs: Vec<Option<InputId>>,
    output: Option<OutputId>,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(rt: &'a mut Runtime, handle: NodeHandle) -> Result<Self> {
        let node = rt.node(handle)?;
        let descriptor = Arc::clone(&node.descriptor);
        let scalars = Arc::clone(&node.scalars);
        let inputs = node.inputs.clone();
        let output = node.output;
        Ok(Self {
            rt,
            handle,
            descriptor,
            scalars,
            inputs,
            output,
        })
    }

    /// This node's handle.
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// This node's descriptor.
    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// Current evaluation time.
    pub fn evaluation_time(&self) -> EngineTime {
        self.rt.evaluation_time()
    }

    /// Engine "now": wall time in real-time modes.
    pub fn now(&self) -> Result<EngineTime> {
        self.require(Injectable::Clock)?;
        Ok(self.rt.now())
    }

    /// Diagnostic path of this node.
    pub fn node_path(&self) -> String {
        self.rt.node_path(self.handle)
    }

    fn require(&self, injectable: Injectable) -> Result<()> {
        if self.descriptor.has_injectable(injectable) {
            Ok(())
        } else {
            Err(FlowError::MissingInjectable {
                node: self.descriptor.display_name().to_string(),
                injectable: injectable.as_str().to_string(),
            })
        }
    }

    // ---- scalars ----------------------------------------------------------

    /// Scalar argument by name.
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.scalars.get(name)
    }

    /// Decode a scalar argument.
    pub fn scalar_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.scalar(name)
            .ok_or_else(|| FlowError::UnknownInput {
                node: self.descriptor.display_name().to_string(),
                input: name.to_string(),
            })?
            .decode()
    }

    // ---- inputs -----------------------------------------------------------

    /// Root input id of a time-series argument.
    pub fn input(&self, name: &str) -> Result<InputId> {
        self.descriptor
            .arg_index(name)
            .and_then(|i| self.inputs.get(i).copied().flatten())
            .ok_or_else(|| FlowError::UnknownInput {
                node: self.descriptor.display_name().to_string(),
                input: name.to_string(),
            })
    }

    /// Child input of a composite argument.
    pub fn child_input(&self, name: &str, index: usize) -> Result<InputId> {
        let input = self.input(name)?;
        self.rt
            .input(input)?
            .children()
            .get(index)
            .copied()
            .ok_or_else(|| FlowError::UnknownInput {
                node: self.descriptor.display_name().to_string(),
                input: format!("{}[{}]", name, index),
            })
    }

    /// Scalar value of an input.
    pub fn value(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.rt.input_value(self.input(name)?))
    }

    /// Decode the scalar value of an input.
    pub fn value_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.value(name)?.map(|v| v.decode()).transpose()
    }

    /// Scalar value of one child of a composite input.
    pub fn child_value(&self, name: &str, index: usize) -> Result<Option<Value>> {
        Ok(self.rt.input_value(self.child_input(name, index)?))
    }

    /// Whether an input ticked this evaluation.
    pub fn modified(&self, name: &str) -> Result<bool> {
        Ok(self.rt.input_modified(self.input(name)?))
    }

    /// Whether an input holds a value.
    pub fn valid(&self, name: &str) -> Result<bool> {
        Ok(self.rt.input_valid(self.input(name)?))
    }

    /// Whether an input and all of its children hold values.
    pub fn all_valid(&self, name: &str) -> Result<bool> {
        Ok(self.rt.input_all_valid(self.input(name)?))
    }

    /// Reference carried by a REF input.
    pub fn ref_value(&self, name: &str) -> Result<TsRef> {
        Ok(self.rt.input_ref(self.input(name)?))
    }

    /// Output an input currently reads from.
    pub fn bound_output(&self, name: &str) -> Result<Option<OutputId>> {
        Ok(self.rt.input_output(self.input(name)?))
    }

    /// Keys of a set or dict input.
    pub fn keys(&self, name: &str) -> Result<Vec<Key>> {
        Ok(self.rt.input_keys(self.input(name)?).into_iter().collect())
    }

    /// Scalar value of one dict entry.
    pub fn dict_value(&self, name: &str, key: &Key) -> Result<Option<Value>> {
        let input = self.input(name)?;
        Ok(self
            .rt
            .input_dict_child(input, key)
            .and_then(|child| self.rt.output_value(child)))
    }

    /// Dict keys whose entry ticked this evaluation.
    pub fn modified_keys(&self, name: &str) -> Result<Vec<Key>> {
        Ok(self.rt.input_modified_keys(self.input(name)?))
    }

    /// Keys added to a set or dict input this evaluation.
    pub fn added_keys(&self, name: &str) -> Result<Vec<Key>> {
        Ok(self.rt.input_added_keys(self.input(name)?))
    }

    /// Keys removed from a set or dict input this evaluation.
    pub fn removed_keys(&self, name: &str) -> Result<Vec<Key>> {
        Ok(self.rt.input_removed_keys(self.input(name)?))
    }

    /// Make an input schedule this node when it ticks.
    pub fn make_active(&mut self, name: &str) -> Result<()> {
        let input = self.input(name)?;
        self.rt.set_input_active(input, true)
    }

    /// Stop an input from scheduling this node.
    pub fn make_passive(&mut self, name: &str) -> Result<()> {
        let input = self.input(name)?;
        self.rt.set_input_active(input, false)
    }

    // ---- output -----------------------------------------------------------

    /// This node's primary output.
    pub fn output(&self) -> Result<OutputId> {
        self.output.ok_or_else(|| FlowError::Binding {
            input: self.rt.node_path(self.handle),
            cause: "node declares no output".into(),
        })
    }

    /// Current value of this node's output.
    pub fn output_value(&self) -> Option<Value> {
        self.output.and_then(|o| self.rt.output_value(o))
    }

    /// Whether this node's output ticked this evaluation.
    pub fn output_modified(&self) -> bool {
        self.output.is_some_and(|o| self.rt.output_modified(o))
    }

    /// Write this node's output.
    pub fn set_output(&mut self, value: impl Into<Value>) -> Result<()> {
        let output = self.output()?;
        self.rt.set_value(output, value.into())
    }

    /// Write one child of a composite output.
    pub fn set_output_child(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let output = self.output()?;
        let child = self.rt.output_child(output, index)?;
        self.rt.set_value(child, value.into())
    }

    /// Point a REF output at something.
    pub fn set_reference(&mut self, reference: TsRef) -> Result<()> {
        let output = self.output()?;
        self.rt.set_reference(output, reference)
    }

    /// Write one entry of a dict output.
    pub fn dict_set(&mut self, key: Key, value: impl Into<Value>) -> Result<()> {
        let output = self.output()?;
        self.rt.dict_set(output, key, value.into())
    }

    /// Remove one entry of a dict output.
    pub fn dict_remove(&mut self, key: &Key) -> Result<bool> {
        let output = self.output()?;
        self.rt.dict_remove(output, key)
    }

    /// Add a member to a set output.
    pub fn set_add(&mut self, key: Key) -> Result<bool> {
        let output = self.output()?;
        self.rt.set_add(output, key)
    }

    /// Remove a member from a set output.
    pub fn set_remove(&mut self, key: &Key) -> Result<bool> {
        let output = self.output()?;
        self.rt.set_remove(output, key)
    }

    // ---- references -------------------------------------------------------

    /// Take a reference to entry `key` of the dict bound to input `name`.
    ///
    /// The returned REF output stays alive until every requester has
    /// released it.
    pub fn get_ref(&mut self, name: &str, key: &Key) -> Result<OutputId> {
        let input = self.input(name)?;
        let dict = self.rt.input_output(input).ok_or_else(|| FlowError::Binding {
            input: format!("{}.{}", self.rt.node_path(self.handle), name),
            cause: "input is not bound to a dict".into(),
        })?;
        self.rt.get_ref(dict, key, self.handle)
    }

    /// Release a reference taken with [`get_ref`](Self::get_ref).
    pub fn release_ref(&mut self, name: &str, key: &Key) -> Result<bool> {
        let input = self.input(name)?;
        match self.rt.input_output(input) {
            Some(dict) => self.rt.release_ref(dict, key, self.handle),
            None => Ok(false),
        }
    }

    // ---- scheduling -------------------------------------------------------

    /// Schedule this node at an absolute time.
    pub fn schedule(&mut self, when: EngineTime) -> Result<()> {
        self.require(Injectable::Scheduler)?;
        self.rt.request_node_schedule(self.handle, when)
    }

    /// Schedule this node `delta` after the current evaluation time.
    pub fn schedule_in(&mut self, delta: EngineDelta) -> Result<()> {
        let when = self.evaluation_time() + delta;
        self.schedule(when)
    }

    /// Engine services: time bounds, notifications, stop requests.
    pub fn engine_api(&mut self) -> Result<&mut dyn EvaluationEngineApi> {
        self.require(Injectable::EngineApi)?;
        Ok(&mut *self.rt)
    }

    /// Sender for messages addressed to this push node.
    pub fn push_sender(&self) -> PushSender {
        self.rt.push_sender(self.handle)
    }

    // ---- mesh -------------------------------------------------------------

    /// Resolve the output of mesh key `key` from inside a mesh graph,
    /// registering a dependency of this graph's key on it.
    pub fn mesh_lookup(&mut self, key: &Key) -> Result<OutputId> {
        self.rt.mesh_lookup(self.handle, key)
    }

    /// Drop a dependency taken with [`mesh_lookup`](Self::mesh_lookup).
    pub fn mesh_release(&mut self, key: &Key) -> Result<()> {
        self.rt.mesh_release(self.handle, key)
    }
}
