//! Runtime graphs and node slots.

use crate::builder::GraphBuilder;
use crate::nested::NestedNode;
use crate::node::{NodeBody, NodeFactory};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tickflow_core::{
    EngineTime, GraphId, InputId, Key, NodeDescriptor, NodeHandle, OutputId, Value, MAX_DT,
};

/// Lifecycle of a graph or a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Created, instances not yet made.
    Uninitialised,
    /// Instances made, not started.
    Initialised,
    /// Evaluating.
    Started,
    /// Stop in progress.
    Stopping,
    /// Stopped; may be restarted or disposed.
    Stopped,
    /// Released; nothing further is allowed.
    Disposed,
}

impl LifecycleState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialised => "uninitialised",
            Self::Initialised => "initialised",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A runtime node.
pub struct NodeSlot {
    pub(crate) descriptor: Arc<NodeDescriptor>,
    pub(crate) scalars: Arc<BTreeMap<String, Value>>,
    pub(crate) factory: Arc<dyn NodeFactory>,
    /// Root input per argument index; `None` for non-time-series arguments.
    pub(crate) inputs: Vec<Option<InputId>>,
    pub(crate) output: Option<OutputId>,
    pub(crate) owns_output: bool,
    pub(crate) error_output: Option<OutputId>,
    pub(crate) state: LifecycleState,
    /// Taken out while the node evaluates.
    pub(crate) body: Option<NodeBody>,
    pub(crate) last_evaluated: EngineTime,
    /// Times requested through the scheduler injectable.
    pub(crate) scheduler: BTreeSet<EngineTime>,
}

impl NodeSlot {
    /// Resolved descriptor.
    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// Scalar arguments.
    pub fn scalars(&self) -> &BTreeMap<String, Value> {
        &self.scalars
    }

    /// Root input for argument `name`.
    pub fn input(&self, name: &str) -> Option<InputId> {
        self.descriptor
            .arg_index(name)
            .and_then(|i| self.inputs.get(i).copied().flatten())
    }

    /// Root inputs by argument index.
    pub fn inputs(&self) -> &[Option<InputId>] {
        &self.inputs
    }

    /// Primary output.
    pub fn output(&self) -> Option<OutputId> {
        self.output
    }

    /// Error output, present when the node captures errors.
    pub fn error_output(&self) -> Option<OutputId> {
        self.error_output
    }

    /// Lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Last evaluation time.
    pub fn last_evaluated(&self) -> EngineTime {
        self.last_evaluated
    }

    /// Whether the node hosts nested graphs.
    pub fn is_nested(&self) -> bool {
        matches!(self.body, Some(NodeBody::Nested(_)))
    }

    /// Nested-graph host state. `None` for other nodes and while the node
    /// is evaluating.
    pub fn nested(&self) -> Option<&NestedNode> {
        match &self.body {
            Some(NodeBody::Nested(nested)) => Some(&**nested),
            _ => None,
        }
    }
}

impl fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSlot")
            .field("signature", &self.descriptor.signature_name)
            .field("state", &self.state)
            .field("output", &self.output)
            .field("last_evaluated", &self.last_evaluated)
            .finish()
    }
}

/// An instantiated graph: ranked nodes plus their schedule.
pub struct Graph {
    pub(crate) id: GraphId,
    pub(crate) label: Option<String>,
    pub(crate) key: Option<Key>,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) builder: Arc<GraphBuilder>,
    pub(crate) nodes: Vec<NodeSlot>,
    /// Requested evaluation time per ordinal. An entry is pending while it
    /// is later than the node's last evaluation.
    pub(crate) schedule: Vec<EngineTime>,
    pub(crate) state: LifecycleState,
    pub(crate) evaluating: Option<usize>,
    pub(crate) next_scheduled: EngineTime,
    pub(crate) last_evaluation_time: EngineTime,
}

impl Graph {
    pub(crate) fn new(
        id: GraphId,
        builder: Arc<GraphBuilder>,
        parent: Option<NodeHandle>,
        key: Option<Key>,
        label: Option<String>,
    ) -> Self {
        Self {
            id,
            label,
            key,
            parent,
            builder,
            nodes: Vec::new(),
            schedule: Vec::new(),
            state: LifecycleState::Uninitialised,
            evaluating: None,
            next_scheduled: MAX_DT,
            last_evaluation_time: EngineTime::NEVER,
        }
    }

    /// Graph id.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Diagnostic label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Key of a keyed nested graph.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Host node of a nested graph.
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// Template this graph was built from.
    pub fn builder(&self) -> &Arc<GraphBuilder> {
        &self.builder
    }

    /// Lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `ordinal`.
    pub fn node(&self, ordinal: usize) -> Option<&NodeSlot> {
        self.nodes.get(ordinal)
    }

    /// All nodes in rank order.
    pub fn nodes(&self) -> &[NodeSlot] {
        &self.nodes
    }

    /// Requested time for `ordinal`.
    pub fn scheduled_time(&self, ordinal: usize) -> Option<EngineTime> {
        self.schedule.get(ordinal).copied()
    }

    /// Whether `ordinal` has a request that has not been evaluated yet.
    pub fn is_pending(&self, ordinal: usize) -> bool {
        match (self.schedule.get(ordinal), self.nodes.get(ordinal)) {
            (Some(&st), Some(node)) => st > node.last_evaluated,
            _ => false,
        }
    }

    /// Earliest pending request, [`MAX_DT`] when idle.
    pub fn next_scheduled(&self) -> EngineTime {
        self.next_scheduled
    }

    /// Ordinal currently being evaluated.
    pub fn evaluating(&self) -> Option<usize> {
        self.evaluating
    }

    /// Time of the last evaluation.
    pub fn last_evaluation_time(&self) -> EngineTime {
        self.last_evaluation_time
    }

    /// Handle of the node at `ordinal`.
    pub fn handle(&self, ordinal: usize) -> NodeHandle {
        NodeHandle::new(self.id, ordinal)
    }

    pub(crate) fn recompute_next(&mut self) {
        self.next_scheduled = self
            .schedule
            .iter()
            .zip(&self.nodes)
            .filter(|(st, node)| **st > node.last_evaluated)
            .map(|(st, _)| *st)
            .min()
            .unwrap_or(MAX_DT);
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("key", &self.key)
            .field("parent", &self.parent)
            .field("state", &self.state)
            .field("nodes", &self.nodes)
            .field("next_scheduled", &self.next_scheduled)
            .finish()
    }
}
