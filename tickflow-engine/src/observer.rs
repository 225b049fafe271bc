//! Lifecycle observers.
//!
//! Observers are told about graph start/stop, every graph evaluation and
//! every node evaluation. They must not mutate the runtime; the
//! [`LoggingObserver`] turns the callbacks into structured log events.

use std::sync::Arc;
use tickflow_core::logging::{BufferedCollector, LogCategory, LogCollector, LogEvent, LogLevel};
use tickflow_core::{EngineTime, GraphId, NodeError, NodeHandle};

/// Graph being reported on.
#[derive(Debug, Clone, Copy)]
pub struct GraphInfo<'a> {
    /// Graph id.
    pub id: GraphId,
    /// Diagnostic label.
    pub label: Option<&'a str>,
    /// Host node for nested graphs.
    pub parent: Option<NodeHandle>,
    /// Current evaluation time.
    pub time: EngineTime,
}

/// Node being reported on.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo<'a> {
    /// Node handle.
    pub handle: NodeHandle,
    /// Signature name.
    pub signature: &'a str,
    /// Current evaluation time.
    pub time: EngineTime,
}

/// Hooks into graph and node lifecycle. Every method defaults to a no-op.
pub trait LifecycleObserver: Send + Sync {
    /// Before a graph starts its nodes.
    fn on_before_start_graph(&self, _graph: &GraphInfo<'_>) {}

    /// After a graph has started.
    fn on_after_start_graph(&self, _graph: &GraphInfo<'_>) {}

    /// Before a graph's node sweep.
    fn on_before_graph_evaluation(&self, _graph: &GraphInfo<'_>) {}

    /// After a graph's node sweep.
    fn on_after_graph_evaluation(&self, _graph: &GraphInfo<'_>) {}

    /// Before a node evaluates.
    fn on_before_node_evaluation(&self, _node: &NodeInfo<'_>) {}

    /// After a node evaluates (successfully or not).
    fn on_after_node_evaluation(&self, _node: &NodeInfo<'_>) {}

    /// A node failed; called before the error is captured or propagated.
    fn on_node_error(&self, _node: &NodeInfo<'_>, _error: &NodeError) {}

    /// Before a graph stops.
    fn on_before_stop_graph(&self, _graph: &GraphInfo<'_>) {}

    /// After a graph has stopped.
    fn on_after_stop_graph(&self, _graph: &GraphInfo<'_>) {}
}

/// Observer that records lifecycle events into a [`BufferedCollector`].
///
/// Node evaluations are only recorded when `trace_nodes` is set; they are
/// by far the most frequent event.
pub struct LoggingObserver {
    collector: Arc<BufferedCollector>,
    trace_nodes: bool,
}

impl LoggingObserver {
    /// Create an observer writing into `collector`.
    pub fn new(collector: Arc<BufferedCollector>) -> Self {
        Self {
            collector,
            trace_nodes: false,
        }
    }

    /// Also record every node evaluation.
    pub fn with_node_tracing(mut self, enabled: bool) -> Self {
        self.trace_nodes = enabled;
        self
    }

    /// The collector events are written to.
    pub fn collector(&self) -> &Arc<BufferedCollector> {
        &self.collector
    }

    fn graph_event(&self, category: LogCategory, message: &str, graph: &GraphInfo<'_>) {
        let mut event = LogEvent::new(LogLevel::Info, category, graph.id, graph.time, message);
        if let Some(label) = graph.label {
            event = event.with_field("label", label);
        }
        if let Some(parent) = graph.parent {
            event = event.with_field("parent", parent);
        }
        self.collector.collect(event);
    }
}

impl LifecycleObserver for LoggingObserver {
    fn on_after_start_graph(&self, graph: &GraphInfo<'_>) {
        tracing::info!(graph = %graph.id, label = ?graph.label, "Graph started");
        self.graph_event(LogCategory::Graph, "graph started", graph);
    }

    fn on_before_graph_evaluation(&self, graph: &GraphInfo<'_>) {
        if graph.parent.is_none() {
            tracing::trace!(graph = %graph.id, time = %graph.time, "Tick started");
            self.collector.collect(LogEvent::new(
                LogLevel::Debug,
                LogCategory::Tick,
                graph.id,
                graph.time,
                "tick started",
            ));
        }
    }

    fn on_after_graph_evaluation(&self, graph: &GraphInfo<'_>) {
        if graph.parent.is_none() {
            self.collector.collect(LogEvent::new(
                LogLevel::Debug,
                LogCategory::Tick,
                graph.id,
                graph.time,
                "tick completed",
            ));
        }
    }

    fn on_before_node_evaluation(&self, node: &NodeInfo<'_>) {
        if self.trace_nodes {
            self.collector.collect(
                LogEvent::new(
                    LogLevel::Debug,
                    LogCategory::Node,
                    node.handle,
                    node.time,
                    "node evaluating",
                )
                .with_field("signature", node.signature),
            );
        }
    }

    fn on_node_error(&self, node: &NodeInfo<'_>, error: &NodeError) {
        tracing::warn!(
            node = %node.handle,
            signature = node.signature,
            error = %error.error_msg,
            "Node evaluation failed"
        );
        self.collector.collect(
            LogEvent::new(
                LogLevel::Error,
                LogCategory::Node,
                node.handle,
                node.time,
                error.error_msg.clone(),
            )
            .with_field("signature", node.signature)
            .with_field("path", &error.node_path),
        );
    }

    fn on_after_stop_graph(&self, graph: &GraphInfo<'_>) {
        tracing::info!(graph = %graph.id, label = ?graph.label, "Graph stopped");
        self.graph_event(LogCategory::Graph, "graph stopped", graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_observer_records_graph_and_errors() {
        let collector = Arc::new(BufferedCollector::new(16));
        let observer = LoggingObserver::new(Arc::clone(&collector));
        let graph = GraphInfo {
            id: GraphId::new(0),
            label: Some("root"),
            parent: None,
            time: EngineTime::from_micros(5),
        };
        observer.on_after_start_graph(&graph);
        observer.on_before_graph_evaluation(&graph);

        let node = NodeInfo {
            handle: NodeHandle::new(GraphId::new(0), 1),
            signature: "lift",
            time: EngineTime::from_micros(5),
        };
        observer.on_before_node_evaluation(&node);
        observer.on_node_error(&node, &NodeError::new("lift", "graph_0[1]", "boom"));

        assert_eq!(collector.by_category(LogCategory::Graph).len(), 1);
        assert_eq!(collector.by_category(LogCategory::Tick).len(), 1);
        assert!(collector.by_category(LogCategory::Node).iter().all(|e| e.level == LogLevel::Error));
        let failures = collector.by_node(node.handle);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field("path"), Some("graph_0[1]"));
        assert_eq!(collector.by_graph(GraphId::new(0)).len(), 3);
    }

    #[test]
    fn nested_graph_ticks_are_not_logged() {
        let collector = Arc::new(BufferedCollector::new(16));
        let observer = LoggingObserver::new(Arc::clone(&collector)).with_node_tracing(true);
        let nested = GraphInfo {
            id: GraphId::new(3),
            label: None,
            parent: Some(NodeHandle::new(GraphId::new(0), 2)),
            time: EngineTime::from_micros(1),
        };
        observer.on_before_graph_evaluation(&nested);
        assert!(collector.is_empty());

        observer.on_before_node_evaluation(&NodeInfo {
            handle: NodeHandle::new(GraphId::new(3), 0),
            signature: "const",
            time: EngineTime::from_micros(1),
        });
        assert_eq!(collector.len(), 1);
    }
}
