//! The evaluation runtime.
//!
//! Every graph, output and input of one evaluation run lives in an arena
//! owned by the [`Runtime`]. Nodes, nested graphs and bindings refer to each
//! other by id, so a nested graph can reach its host (and the host its
//! graphs) without either owning the other.
//!
//! The runtime is split by concern:
//!
//! - `outputs`: writing outputs and propagating modifications
//! - `binding`: binding inputs to outputs, including references
//! - `scheduling`: the per-graph schedule tables
//! - `lifecycle`: make / initialise / start / stop / dispose
//! - `evaluation`: the rank-ordered sweep and the node error boundary
//! - `rollback`: undoing the output writes of a failed node

mod binding;
mod evaluation;
mod lifecycle;
mod outputs;
mod rollback;
mod scheduling;

use crate::arena::Arena;
use crate::engine::{EvaluationEngineApi, Notification, PushQueue, PushSender};
use crate::graph::{Graph, NodeSlot};
use crate::observer::{GraphInfo, LifecycleObserver};
use crate::replay::ReplayStore;
use crate::timeseries::{InputSlot, OutputSlot, TsRef};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tickflow_core::{
    EngineConfig, EngineTime, EvaluationMode, FlowError, GraphId, InputId, Key, NodeHandle,
    OutputId, Result, WallClock,
};

/// Per-instantiation overrides applied by [`Runtime::make_graph`].
///
/// Hosts use these to splice a nested graph into their own inputs and
/// outputs without copying data.
#[derive(Debug, Clone, Default)]
pub struct GraphWiring {
    /// Ordinal -> existing output the node writes to instead of its own.
    pub output_overrides: BTreeMap<usize, OutputId>,
    /// Ordinal -> reference a stub's REF output is set to before binding.
    pub stub_refs: BTreeMap<usize, TsRef>,
}

/// A dependency change raised from inside a mesh graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MeshChange {
    Add { from: Key, to: Key },
    Remove { from: Key, to: Key },
}

/// A mesh change addressed to its host node.
#[derive(Debug, Clone)]
pub(crate) struct MeshRequest {
    pub(crate) host: NodeHandle,
    pub(crate) change: MeshChange,
}

/// Owner of all runtime state for one evaluation run.
pub struct Runtime {
    pub(crate) graphs: Arena<GraphId, Graph>,
    pub(crate) outputs: Arena<OutputId, OutputSlot>,
    pub(crate) inputs: Arena<InputId, InputSlot>,
    pub(crate) config: EngineConfig,
    pub(crate) evaluation_time: EngineTime,
    pub(crate) wall: Arc<dyn WallClock>,
    pub(crate) before_notifications: Vec<Notification>,
    pub(crate) after_notifications: Vec<Notification>,
    pub(crate) observers: Vec<Arc<dyn LifecycleObserver>>,
    pub(crate) replay: Arc<Mutex<ReplayStore>>,
    pub(crate) mesh_requests: Vec<MeshRequest>,
    pub(crate) push: Arc<PushQueue>,
    pub(crate) stop_requested: bool,
    /// Subscriber notices held back while a capturing node evaluates.
    pub(crate) held: Option<Vec<(InputId, OutputId)>>,
}

impl Runtime {
    /// Create an empty runtime.
    pub fn new(config: EngineConfig, wall: Arc<dyn WallClock>) -> Self {
        let push = Arc::new(PushQueue::new(config.push_queue_capacity));
        let evaluation_time = config.start_time;
        Self {
            graphs: Arena::new(),
            outputs: Arena::new(),
            inputs: Arena::new(),
            config,
            evaluation_time,
            wall,
            before_notifications: Vec::new(),
            after_notifications: Vec::new(),
            observers: Vec::new(),
            replay: Arc::new(Mutex::new(ReplayStore::new())),
            mesh_requests: Vec::new(),
            push,
            stop_requested: false,
            held: None,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Time of the tick being evaluated.
    pub fn evaluation_time(&self) -> EngineTime {
        self.evaluation_time
    }

    /// Wall time in real-time modes, the evaluation time otherwise.
    pub fn now(&self) -> EngineTime {
        if self.config.mode.is_real_time() {
            self.wall.now()
        } else {
            self.evaluation_time
        }
    }

    /// Register a lifecycle observer.
    pub fn add_observer(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }

    /// Shared record/replay store.
    pub fn replay_store(&self) -> &Arc<Mutex<ReplayStore>> {
        &self.replay
    }

    pub(crate) fn set_replay_store(&mut self, store: Arc<Mutex<ReplayStore>>) {
        self.replay = store;
    }

    /// Queue shared with push producers.
    pub fn push_queue(&self) -> &Arc<PushQueue> {
        &self.push
    }

    /// Sender addressing push node `node`.
    pub fn push_sender(&self, node: NodeHandle) -> PushSender {
        PushSender::new(Arc::clone(&self.push), node)
    }

    // ---- lookups ----------------------------------------------------------

    /// Graph by id.
    pub fn graph(&self, id: GraphId) -> Result<&Graph> {
        self.graphs.get(id).ok_or_else(|| FlowError::InvalidLifecycle {
            target: id.to_string(),
            operation: "access".into(),
            state: "disposed".into(),
        })
    }

    pub(crate) fn graph_mut(&mut self, id: GraphId) -> Result<&mut Graph> {
        self.graphs.get_mut(id).ok_or_else(|| FlowError::InvalidLifecycle {
            target: id.to_string(),
            operation: "access".into(),
            state: "disposed".into(),
        })
    }

    /// Ids of every live graph.
    pub fn graph_ids(&self) -> Vec<GraphId> {
        self.graphs.iter().map(|(id, _)| id).collect()
    }

    /// Node by handle.
    pub fn node(&self, handle: NodeHandle) -> Result<&NodeSlot> {
        self.graphs
            .get(handle.graph)
            .and_then(|g| g.nodes.get(handle.ordinal))
            .ok_or(FlowError::UnknownNode { node: handle })
    }

    pub(crate) fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut NodeSlot> {
        self.graphs
            .get_mut(handle.graph)
            .and_then(|g| g.nodes.get_mut(handle.ordinal))
            .ok_or(FlowError::UnknownNode { node: handle })
    }

    /// Output by id.
    pub fn output(&self, id: OutputId) -> Result<&OutputSlot> {
        self.outputs
            .get(id)
            .ok_or(FlowError::UnknownOutput { output: id })
    }

    pub(crate) fn output_mut(&mut self, id: OutputId) -> Result<&mut OutputSlot> {
        self.outputs
            .get_mut(id)
            .ok_or(FlowError::UnknownOutput { output: id })
    }

    /// Input by id.
    pub fn input(&self, id: InputId) -> Result<&InputSlot> {
        self.inputs.get(id).ok_or_else(|| FlowError::Binding {
            input: id.to_string(),
            cause: "input has been released".into(),
        })
    }

    /// Number of live outputs.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Number of live inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Diagnostic path of a node, outermost graph first:
    /// `graph_0[3]/graph_4[1]`.
    pub fn node_path(&self, handle: NodeHandle) -> String {
        let mut segments = vec![handle.to_string()];
        let mut graph = handle.graph;
        while let Some(parent) = self.graphs.get(graph).and_then(|g| g.parent) {
            segments.push(parent.to_string());
            graph = parent.graph;
        }
        segments.reverse();
        segments.join("/")
    }

    pub(crate) fn graph_info(&self, id: GraphId) -> Option<GraphInfo<'_>> {
        self.graphs.get(id).map(|g| GraphInfo {
            id,
            label: g.label.as_deref(),
            parent: g.parent,
            time: self.evaluation_time,
        })
    }

    // ---- notifications ----------------------------------------------------

    /// Run queued before-evaluation notifications, including any they queue.
    pub(crate) fn run_before_notifications(&mut self) -> Result<()> {
        while !self.before_notifications.is_empty() {
            let pending = std::mem::take(&mut self.before_notifications);
            for notification in pending {
                notification(self)?;
            }
        }
        Ok(())
    }

    /// Run queued after-evaluation notifications, including any they queue.
    pub(crate) fn run_after_notifications(&mut self) -> Result<()> {
        while !self.after_notifications.is_empty() {
            let pending = std::mem::take(&mut self.after_notifications);
            for notification in pending {
                notification(self)?;
            }
        }
        Ok(())
    }

    // ---- mesh -------------------------------------------------------------

    fn mesh_context(&self, handle: NodeHandle) -> Result<(Key, NodeHandle, OutputId)> {
        let graph = self.graph(handle.graph)?;
        let nested = |cause: &str| FlowError::Nested {
            node: self.node_path(handle),
            cause: cause.to_string(),
        };
        let key = graph
            .key
            .clone()
            .ok_or_else(|| nested("mesh lookup outside a keyed graph"))?;
        let host = graph
            .parent
            .ok_or_else(|| nested("mesh lookup outside a nested graph"))?;
        let output = self
            .node(host)?
            .output
            .ok_or_else(|| nested("mesh host has no output"))?;
        Ok((key, host, output))
    }

    /// Resolve mesh key `key` for the node `handle` and record the
    /// dependency of its graph on that key with the host.
    pub fn mesh_lookup(&mut self, handle: NodeHandle, key: &Key) -> Result<OutputId> {
        let (from, host, output) = self.mesh_context(handle)?;
        tracing::debug!(host = %host, from = %from, to = %key, "Mesh dependency requested");
        self.mesh_requests.push(MeshRequest {
            host,
            change: MeshChange::Add {
                from,
                to: key.clone(),
            },
        });
        self.get_ref(output, key, handle)
    }

    /// Drop a dependency taken with [`mesh_lookup`](Self::mesh_lookup).
    pub fn mesh_release(&mut self, handle: NodeHandle, key: &Key) -> Result<()> {
        let (from, host, output) = self.mesh_context(handle)?;
        self.mesh_requests.push(MeshRequest {
            host,
            change: MeshChange::Remove {
                from,
                to: key.clone(),
            },
        });
        self.release_ref(output, key, handle)?;
        Ok(())
    }

    pub(crate) fn take_mesh_requests(&mut self, host: NodeHandle) -> Vec<MeshChange> {
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.mesh_requests)
            .into_iter()
            .partition(|r| r.host == host);
        self.mesh_requests = rest;
        mine.into_iter().map(|r| r.change).collect()
    }
}

impl EvaluationEngineApi for Runtime {
    fn start_time(&self) -> EngineTime {
        self.config.start_time
    }

    fn end_time(&self) -> EngineTime {
        self.config.end_time
    }

    fn now(&self) -> EngineTime {
        Runtime::now(self)
    }

    fn evaluation_time(&self) -> EngineTime {
        self.evaluation_time
    }

    fn evaluation_mode(&self) -> EvaluationMode {
        self.config.mode
    }

    fn add_before_evaluation_notification(&mut self, notification: Notification) {
        self.before_notifications.push(notification);
    }

    fn add_after_evaluation_notification(&mut self, notification: Notification) {
        self.after_notifications.push(notification);
    }

    fn request_stop(&mut self) {
        tracing::info!(time = %self.evaluation_time, "Stop requested");
        self.stop_requested = true;
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("mode", &self.config.mode)
            .field("evaluation_time", &self.evaluation_time)
            .field("graphs", &self.graphs.len())
            .field("outputs", &self.outputs.len())
            .field("inputs", &self.inputs.len())
            .finish()
    }
}
