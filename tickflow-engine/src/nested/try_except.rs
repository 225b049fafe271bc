//! Try-except: a nested graph whose failures become output ticks.

use super::{
    evaluate_due, nested_error, reschedule_host, restart_graphs, NestedGraphTemplate, NestedNode,
    NestedStrategy,
};
use crate::graph::LifecycleState;
use crate::node::{NodeBody, NodeBuilder};
use crate::runtime::Runtime;
use std::collections::BTreeSet;
use std::sync::Arc;
use tickflow_core::{FlowError, GraphId, NodeDescriptor, NodeError, NodeHandle, OutputId, Result, TsShape};

/// Field of the host bundle output carrying the graph's output.
pub const OUT_FIELD: &str = "out";
/// Field of the host bundle output carrying captured errors.
pub const EXCEPTION_FIELD: &str = "exception";

/// Host of a single graph guarded by an error boundary.
///
/// The host's output is a bundle `{out, exception}`. The graph writes to
/// `out`; when its evaluation fails with a non-fatal error the graph is
/// stopped and the [`NodeError`] ticks on `exception` instead of
/// propagating.
#[derive(Debug)]
pub struct TryExceptNode {
    template: Arc<NestedGraphTemplate>,
    graph: Option<GraphId>,
    failed: bool,
}

impl TryExceptNode {
    /// Node running `template` behind an error boundary. The output of
    /// `descriptor` is replaced by the `{out, exception}` bundle.
    pub fn builder(descriptor: NodeDescriptor, template: NestedGraphTemplate) -> NodeBuilder {
        let out = template.output_shape().cloned().unwrap_or(TsShape::Scalar);
        let descriptor = descriptor
            .with_output(TsShape::bundle([(OUT_FIELD, out), (EXCEPTION_FIELD, TsShape::Scalar)]))
            .with_nested_graphs(true);
        let template = Arc::new(template);
        NodeBuilder::from_fn(descriptor, move |_, _| {
            Ok(NodeBody::Nested(Box::new(NestedNode::TryExcept(TryExceptNode {
                template: Arc::clone(&template),
                graph: None,
                failed: false,
            }))))
        })
    }

    /// Whether the graph has failed and been stopped.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    fn field(rt: &Runtime, host: NodeHandle, index: usize) -> Result<OutputId> {
        let output = rt
            .node(host)?
            .output
            .ok_or_else(|| nested_error(rt, host, "try-except host has no output"))?;
        rt.output_child(output, index)
    }

    fn capture(&mut self, rt: &mut Runtime, host: NodeHandle, graph: GraphId, err: FlowError) -> Result<()> {
        self.failed = true;
        if rt.graph(graph)?.state == LifecycleState::Started {
            if let Err(stop) = rt.stop_graph(graph) {
                tracing::warn!(graph = %graph, error = %stop, "Failed graph did not stop cleanly");
            }
        }
        let error = match err {
            FlowError::NodeEvaluation(inner) => *inner,
            other => {
                let node = rt.node(host)?;
                NodeError::new(
                    node.descriptor.signature_name.clone(),
                    rt.node_path(host),
                    other.to_string(),
                )
                .with_stack_trace(format!("{:?}", other))
            }
        };
        tracing::warn!(host = %host, node = %error.node_path, error = %error.error_msg, "Nested graph failed; error captured");
        let exception = Self::field(rt, host, 1)?;
        rt.set_value(exception, error.to_value()?)
    }
}

impl NestedStrategy for TryExceptNode {
    fn wire(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        if let Some(graph) = &self.graph {
            self.failed = false;
            return restart_graphs(rt, [graph]);
        }
        let out = Self::field(rt, host, 0)?;
        let refs = self.template.host_refs(rt, host, &BTreeSet::new(), None)?;
        self.graph = Some(self.template.instantiate(rt, host, &refs, Some(out), None)?);
        Ok(())
    }

    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let Some(graph) = self.graph else {
            return Ok(());
        };
        if self.failed {
            return Ok(());
        }
        let refs = self.template.host_refs(rt, host, &BTreeSet::new(), None)?;
        let outcome = self
            .template
            .sync_inputs(rt, graph, &refs)
            .and_then(|()| evaluate_due(rt, graph));
        match outcome {
            Ok(()) => reschedule_host(rt, host, [&graph]),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => self.capture(rt, host, graph, err),
        }
    }

    fn graphs(&self) -> Vec<GraphId> {
        self.graph.into_iter().collect()
    }

    fn release(&mut self, _rt: &mut Runtime) {
        self.graph = None;
    }
}
