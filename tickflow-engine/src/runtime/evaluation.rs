//! The rank-ordered sweep and the node error boundary.

use super::Runtime;
use crate::graph::LifecycleState;
use crate::node::{NodeBody, NodeContext};
use crate::observer::NodeInfo;
use tickflow_core::{FlowError, GraphId, NodeError, NodeHandle, Result, Value};

impl Runtime {
    /// Evaluate every node of `id` that is due at the current time, in rank
    /// order. Nodes scheduled for now by an earlier rank in the same sweep
    /// are picked up when the sweep reaches them.
    pub fn evaluate_graph(&mut self, id: GraphId) -> Result<()> {
        let now = self.evaluation_time;
        let graph = self.graph_mut(id)?;
        if graph.state != LifecycleState::Started {
            return Ok(());
        }
        graph.last_evaluation_time = now;

        if let Some(info) = self.graph_info(id) {
            for observer in &self.observers {
                observer.on_before_graph_evaluation(&info);
            }
        }

        let count = self.graph(id)?.len();
        for ordinal in 0..count {
            let graph = self.graph(id)?;
            let node = &graph.nodes[ordinal];
            let due = graph.schedule[ordinal] <= now
                && graph.schedule[ordinal] > node.last_evaluated
                && node.state == LifecycleState::Started
                && !node.descriptor.is_stub();
            if !due {
                continue;
            }

            self.graph_mut(id)?.evaluating = Some(ordinal);
            let result = self.evaluate_node(NodeHandle::new(id, ordinal));
            if let Some(graph) = self.graphs.get_mut(id) {
                graph.evaluating = None;
            }
            result?;
        }

        if let Some(graph) = self.graphs.get_mut(id) {
            graph.recompute_next();
        }
        if let Some(info) = self.graph_info(id) {
            for observer in &self.observers {
                observer.on_after_graph_evaluation(&info);
            }
        }
        Ok(())
    }

    /// Whether the node's inputs satisfy its validity requirements.
    fn inputs_ready(&self, handle: NodeHandle) -> Result<bool> {
        let node = self.node(handle)?;
        for (index, arg) in node.descriptor.time_series_inputs() {
            let Some(input) = node.inputs.get(index).copied().flatten() else {
                continue;
            };
            if node.descriptor.requires_valid(&arg.name) && !self.input_valid(input) {
                return Ok(false);
            }
            if node.descriptor.requires_all_valid(&arg.name) && !self.input_all_valid(input) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_node(&mut self, handle: NodeHandle) -> Result<()> {
        let now = self.evaluation_time;
        self.node_mut(handle)?.last_evaluated = now;
        if !self.inputs_ready(handle)? {
            tracing::trace!(node = %handle, "Inputs not valid; node skipped");
            return self.pop_scheduler(handle);
        }

        let descriptor = std::sync::Arc::clone(&self.node(handle)?.descriptor);
        let info = NodeInfo {
            handle,
            signature: &descriptor.signature_name,
            time: now,
        };
        for observer in &self.observers {
            observer.on_before_node_evaluation(&info);
        }

        let captures = {
            let node = self.node(handle)?;
            node.error_output.is_some() && matches!(node.body, Some(NodeBody::Compute(_)))
        };
        let checkpoint = if captures {
            self.checkpoint_output(handle)?
        } else {
            None
        };
        let mut body = self.node_mut(handle)?.body.take();
        let result: anyhow::Result<()> = match &mut body {
            Some(NodeBody::Compute(logic)) => NodeContext::new(self, handle)
                .map_err(anyhow::Error::from)
                .and_then(|mut ctx| logic.eval(&mut ctx)),
            Some(NodeBody::Nested(nested)) => nested.eval(self, handle).map_err(anyhow::Error::from),
            Some(NodeBody::Stub) | None => Ok(()),
        };
        if let Ok(node) = self.node_mut(handle) {
            node.body = body;
        }

        for observer in &self.observers {
            observer.on_after_node_evaluation(&info);
        }

        let outcome = match (result, checkpoint) {
            (Ok(()), Some(checkpoint)) => self.commit_output(checkpoint),
            (Ok(()), None) => Ok(()),
            (Err(err), checkpoint) => {
                if let Some(checkpoint) = checkpoint {
                    self.rollback_output(checkpoint)?;
                }
                self.capture_error(handle, err)
            }
        };
        self.pop_scheduler(handle)?;
        outcome
    }

    /// Package a node failure. Fatal errors pass through untouched; so does
    /// a nested failure reaching a node that does not capture errors.
    /// Everything else becomes a [`NodeError`] delivered on the node's error
    /// output, or returned when it has none.
    fn capture_error(&mut self, handle: NodeHandle, err: anyhow::Error) -> Result<()> {
        let error_output = self.node(handle)?.error_output;
        let capturing = error_output.is_some();
        let (message, stack_trace, inner) = match err.downcast::<FlowError>() {
            Ok(flow) if flow.is_fatal() => return Err(flow),
            Ok(FlowError::NodeEvaluation(inner)) if !capturing => {
                return Err(FlowError::NodeEvaluation(inner))
            }
            Ok(FlowError::NodeEvaluation(inner)) => {
                (inner.error_msg.clone(), inner.stack_trace.clone(), Some(inner))
            }
            Ok(flow) => (flow.to_string(), format!("{:?}", flow), None),
            Err(other) => (other.to_string(), format!("{:?}", other), None),
        };

        let node = self.node(handle)?;
        let trace = self.back_trace(handle, self.config.back_trace_depth);
        let mut error = NodeError::new(
            node.descriptor.signature_name.clone(),
            self.node_path(handle),
            message,
        )
        .with_label(node.descriptor.label.clone())
        .with_stack_trace(stack_trace)
        .with_back_trace(&trace);
        if let Some(inner) = inner {
            error = error.with_additional_context(inner.to_string());
        }

        tracing::warn!(
            node = %handle,
            signature = %error.signature_name,
            error = %error.error_msg,
            "Node evaluation failed"
        );
        let info = NodeInfo {
            handle,
            signature: &node.descriptor.signature_name,
            time: self.evaluation_time,
        };
        for observer in &self.observers {
            observer.on_node_error(&info, &error);
        }

        match error_output {
            Some(output) => {
                let value: Value = error.to_value()?;
                self.set_value(output, value)
            }
            None => Err(error.into()),
        }
    }

    /// Deliver a push message to `handle`. Returns whether it was accepted.
    pub(crate) fn apply_push_message(&mut self, handle: NodeHandle, message: Value) -> Result<bool> {
        let mut body = self.node_mut(handle)?.body.take();
        let result: anyhow::Result<bool> = match &mut body {
            Some(NodeBody::Compute(logic)) => NodeContext::new(self, handle)
                .map_err(anyhow::Error::from)
                .and_then(|mut ctx| logic.apply_message(&mut ctx, message)),
            _ => Err(anyhow::Error::from(FlowError::Binding {
                input: self.node_path(handle),
                cause: "node cannot accept push messages".into(),
            })),
        };
        if let Ok(node) = self.node_mut(handle) {
            node.body = body;
        }
        match result {
            Ok(accepted) => Ok(accepted),
            Err(err) => self.capture_error(handle, err).map(|()| true),
        }
    }
}
