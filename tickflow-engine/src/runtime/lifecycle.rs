//! Graph lifecycle: make, initialise, start, stop, dispose.

use super::{GraphWiring, Runtime};
use crate::builder::GraphBuilder;
use crate::graph::{Graph, LifecycleState, NodeSlot};
use crate::node::{NodeBody, NodeContext};
use std::collections::BTreeSet;
use std::sync::Arc;
use tickflow_core::{
    ArgKind, EngineTime, FlowError, GraphId, Key, NodeError, NodeHandle, Result, TsShape,
};

impl Runtime {
    fn lifecycle_error(&self, id: GraphId, operation: &str) -> FlowError {
        FlowError::InvalidLifecycle {
            target: id.to_string(),
            operation: operation.to_string(),
            state: self
                .graphs
                .get(id)
                .map_or("disposed", |g| g.state.as_str())
                .to_string(),
        }
    }

    /// Instantiate a graph from `builder`: outputs, inputs and the bindings
    /// of every edge. Nodes are left uninitialised.
    pub fn make_graph(
        &mut self,
        builder: Arc<GraphBuilder>,
        parent: Option<NodeHandle>,
        wiring: GraphWiring,
        key: Option<Key>,
        label: Option<String>,
    ) -> Result<GraphId> {
        let id = self
            .graphs
            .insert_with(|id| Graph::new(id, Arc::clone(&builder), parent, key, label));
        match self.wire_graph(id, &builder, &wiring) {
            Ok(()) => {
                tracing::debug!(graph = %id, nodes = builder.len(), parent = ?parent, "Graph made");
                Ok(id)
            }
            Err(err) => {
                self.release_graph(id);
                Err(err)
            }
        }
    }

    fn wire_graph(&mut self, id: GraphId, builder: &GraphBuilder, wiring: &GraphWiring) -> Result<()> {
        let mut nodes = Vec::with_capacity(builder.len());
        for (ordinal, node) in builder.nodes().iter().enumerate() {
            let handle = NodeHandle::new(id, ordinal);
            let descriptor = Arc::clone(&node.descriptor);

            let (output, owns_output) = match (wiring.output_overrides.get(&ordinal), &descriptor.output) {
                (Some(&existing), Some(shape)) => {
                    let actual = self.output(existing)?.shape.kind_name();
                    if actual != shape.kind_name() {
                        return Err(FlowError::ShapeMismatch {
                            output: existing,
                            expected: shape.kind_name().to_string(),
                            actual: actual.to_string(),
                        });
                    }
                    (Some(existing), false)
                }
                (_, Some(shape)) => (Some(self.create_output(shape, Some(handle), None)), true),
                (_, None) => (None, false),
            };
            let error_output = descriptor
                .capture_exception
                .then(|| self.create_output(&TsShape::Scalar, Some(handle), None));

            let inputs = descriptor
                .args
                .iter()
                .map(|arg| match &arg.kind {
                    ArgKind::TimeSeries(shape) => {
                        Some(self.create_input(handle, &arg.name, shape, None, arg.active))
                    }
                    _ => None,
                })
                .collect();

            nodes.push(NodeSlot {
                descriptor,
                scalars: Arc::clone(&node.scalars),
                factory: Arc::clone(&node.factory),
                inputs,
                output,
                owns_output,
                error_output,
                state: LifecycleState::Uninitialised,
                body: None,
                last_evaluated: EngineTime::NEVER,
                scheduler: BTreeSet::new(),
            });
        }
        let count = nodes.len();
        let graph = self.graph_mut(id)?;
        graph.nodes = nodes;
        graph.schedule = vec![EngineTime::NEVER; count];

        for (ordinal, reference) in &wiring.stub_refs {
            let output = self
                .graph(id)?
                .node(*ordinal)
                .and_then(|n| n.output)
                .ok_or_else(|| FlowError::Binding {
                    input: NodeHandle::new(id, *ordinal).to_string(),
                    cause: "stub has no output".into(),
                })?;
            self.set_reference(output, reference.clone())?;
        }

        for edge in builder.edges() {
            let graph = self.graph(id)?;
            let invalid = |cause: &str| FlowError::InvalidEdge {
                src_node: edge.src_node,
                dst_node: edge.dst_node,
                cause: cause.to_string(),
            };
            let mut source = graph
                .node(edge.src_node)
                .and_then(|n| n.output)
                .ok_or_else(|| invalid("source has no output"))?;
            let mut target = edge
                .dst_arg()
                .and_then(|arg| graph.node(edge.dst_node)?.inputs.get(arg).copied().flatten())
                .ok_or_else(|| invalid("destination is not a time-series input"))?;

            for index in &edge.src_path {
                source = self.output_child(source, *index)?;
            }
            for index in edge.dst_path.iter().skip(1) {
                self.bind_input_unpeered(target);
                target = self
                    .input(target)?
                    .children
                    .get(*index)
                    .copied()
                    .ok_or_else(|| invalid("destination path leaves the input"))?;
            }
            self.bind_input(target, source)?;
        }
        Ok(())
    }

    /// Make the runtime instance of every node.
    pub fn initialise_graph(&mut self, id: GraphId) -> Result<()> {
        if self.graph(id)?.state != LifecycleState::Uninitialised {
            return Err(self.lifecycle_error(id, "initialise"));
        }
        let count = self.graph(id)?.len();
        for ordinal in 0..count {
            let factory = Arc::clone(&self.graph(id)?.nodes[ordinal].factory);
            let body = factory.make_instance(id, ordinal)?;
            let node = self.node_mut(NodeHandle::new(id, ordinal))?;
            node.body = Some(body);
            node.state = LifecycleState::Initialised;
        }
        self.graph_mut(id)?.state = LifecycleState::Initialised;
        Ok(())
    }

    /// Start every node in rank order. A node whose active inputs already
    /// hold values is scheduled for the current time.
    pub fn start_graph(&mut self, id: GraphId) -> Result<()> {
        let state = self.graph(id)?.state;
        if !matches!(state, LifecycleState::Initialised | LifecycleState::Stopped) {
            return Err(self.lifecycle_error(id, "start"));
        }
        if let Some(info) = self.graph_info(id) {
            for observer in &self.observers {
                observer.on_before_start_graph(&info);
            }
        }
        self.graph_mut(id)?.state = LifecycleState::Started;

        let count = self.graph(id)?.len();
        for ordinal in 0..count {
            let handle = NodeHandle::new(id, ordinal);
            self.node_mut(handle)?.state = LifecycleState::Started;
            self.start_node(handle)?;

            let node = self.node(handle)?;
            let ready = node
                .inputs
                .iter()
                .flatten()
                .any(|i| self.inputs.get(*i).is_some_and(|s| s.active) && self.input_valid(*i));
            if ready && !node.descriptor.is_stub() {
                self.schedule_internal(handle, self.evaluation_time)?;
            }
        }

        tracing::debug!(graph = %id, time = %self.evaluation_time, "Graph started");
        if let Some(info) = self.graph_info(id) {
            for observer in &self.observers {
                observer.on_after_start_graph(&info);
            }
        }
        Ok(())
    }

    fn start_node(&mut self, handle: NodeHandle) -> Result<()> {
        let mut body = self.node_mut(handle)?.body.take();
        let result = match &mut body {
            Some(NodeBody::Compute(logic)) => {
                NodeContext::new(self, handle).and_then(|mut ctx| {
                    logic.start(&mut ctx).map_err(|e| node_code_error(handle, "start", e))
                })
            }
            Some(NodeBody::Nested(nested)) => nested.wire(self, handle),
            Some(NodeBody::Stub) | None => Ok(()),
        };
        if let Ok(node) = self.node_mut(handle) {
            node.body = body;
        }
        result.map_err(|err| self.lifecycle_failure(handle, "start", err))
    }

    fn stop_node(&mut self, handle: NodeHandle) -> Result<()> {
        self.node_mut(handle)?.state = LifecycleState::Stopping;
        let mut body = self.node_mut(handle)?.body.take();
        let result = match &mut body {
            Some(NodeBody::Compute(logic)) => NodeContext::new(self, handle)
                .and_then(|mut ctx| logic.stop(&mut ctx).map_err(|e| node_code_error(handle, "stop", e))),
            Some(NodeBody::Nested(nested)) => nested.stop(self, handle),
            Some(NodeBody::Stub) | None => Ok(()),
        };
        if let Ok(node) = self.node_mut(handle) {
            node.body = body;
            node.state = LifecycleState::Stopped;
        }
        result.map_err(|err| self.lifecycle_failure(handle, "stop", err))
    }

    fn lifecycle_failure(&self, handle: NodeHandle, operation: &str, err: FlowError) -> FlowError {
        match err {
            FlowError::NodeEvaluation(mut inner) if inner.node_path.is_empty() => {
                inner.node_path = self.node_path(handle);
                if let Ok(node) = self.node(handle) {
                    inner.signature_name = node.descriptor.signature_name.clone();
                    inner.label = node.descriptor.label.clone();
                }
                tracing::warn!(node = %handle, operation, error = %inner.error_msg, "Node lifecycle call failed");
                FlowError::NodeEvaluation(inner)
            }
            other => other,
        }
    }

    /// Stop every node. All nodes are stopped even if one fails; the first
    /// failure is returned.
    pub fn stop_graph(&mut self, id: GraphId) -> Result<()> {
        if self.graph(id)?.state != LifecycleState::Started {
            return Err(self.lifecycle_error(id, "stop"));
        }
        if let Some(info) = self.graph_info(id) {
            for observer in &self.observers {
                observer.on_before_stop_graph(&info);
            }
        }
        self.graph_mut(id)?.state = LifecycleState::Stopping;

        let mut first_error = None;
        let count = self.graph(id)?.len();
        for ordinal in 0..count {
            let handle = NodeHandle::new(id, ordinal);
            if let Err(err) = self.stop_node(handle) {
                tracing::warn!(node = %handle, error = %err, "Node failed to stop");
                first_error.get_or_insert(err);
            }
        }
        self.graph_mut(id)?.state = LifecycleState::Stopped;

        tracing::debug!(graph = %id, time = %self.evaluation_time, "Graph stopped");
        if let Some(info) = self.graph_info(id) {
            for observer in &self.observers {
                observer.on_after_stop_graph(&info);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release a graph and everything it owns. Disposing a graph that is
    /// already gone is not an error; a started graph is stopped first.
    pub fn dispose_graph(&mut self, id: GraphId) -> Result<()> {
        let Some(graph) = self.graphs.get(id) else {
            return Ok(());
        };
        let mut result = Ok(());
        if graph.state == LifecycleState::Started {
            result = self.stop_graph(id);
        }

        let count = self.graph(id)?.len();
        for ordinal in 0..count {
            let handle = NodeHandle::new(id, ordinal);
            let body = self.node_mut(handle)?.body.take();
            if let Some(mut body) = body {
                if let NodeBody::Nested(nested) = &mut body {
                    if let Err(err) = nested.dispose(self, handle) {
                        tracing::warn!(node = %handle, error = %err, "Nested graphs failed to dispose");
                        if result.is_ok() {
                            result = Err(err);
                        }
                    }
                }
                let factory = Arc::clone(&self.node(handle)?.factory);
                factory.release_instance(body);
            }
            self.node_mut(handle)?.state = LifecycleState::Disposed;
        }
        self.release_graph(id);
        tracing::debug!(graph = %id, "Graph disposed");
        result
    }

    /// Free the inputs and owned outputs of a graph and drop it.
    fn release_graph(&mut self, id: GraphId) {
        let Some(graph) = self.graphs.remove(id) else {
            return;
        };
        for node in &graph.nodes {
            for input in node.inputs.iter().flatten() {
                self.free_input(*input);
            }
        }
        for node in &graph.nodes {
            if node.owns_output {
                if let Some(output) = node.output {
                    self.free_output(output);
                }
            }
            if let Some(output) = node.error_output {
                self.free_output(output);
            }
        }
        self.mesh_requests
            .retain(|r| r.host.graph != id);
    }
}

/// Convert a failure raised by node start/stop code.
fn node_code_error(handle: NodeHandle, operation: &str, err: anyhow::Error) -> FlowError {
    match err.downcast::<FlowError>() {
        Ok(flow) => flow,
        Err(other) => NodeError::new("", "", format!("{} failed: {}", operation, other))
            .with_stack_trace(format!("{:?}", other))
            .with_additional_context(format!("during {} of {}", operation, handle))
            .into(),
    }
}
