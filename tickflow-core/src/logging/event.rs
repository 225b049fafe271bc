//! Engine log events.

use crate::types::{EngineTime, GraphId, NodeHandle};
use serde::Serialize;
use std::fmt;

/// Severity of an engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-tick chatter.
    Debug,
    /// Lifecycle changes.
    Info,
    /// Recoverable trouble.
    Warn,
    /// A node or graph failed.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// What part of the engine lifecycle an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// A graph started or stopped.
    Graph,
    /// A root graph evaluation began or ended.
    Tick,
    /// A node evaluated or failed.
    Node,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Graph => "graph",
            Self::Tick => "tick",
            Self::Node => "node",
        })
    }
}

/// The graph or node an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    /// A whole graph.
    Graph(GraphId),
    /// One node.
    Node(NodeHandle),
}

impl EventScope {
    /// Graph the event belongs to; for a node, its owning graph.
    pub fn graph(&self) -> GraphId {
        match self {
            Self::Graph(graph) => *graph,
            Self::Node(node) => node.graph,
        }
    }

    /// Node the event belongs to, if any.
    pub fn node(&self) -> Option<NodeHandle> {
        match self {
            Self::Graph(_) => None,
            Self::Node(node) => Some(*node),
        }
    }
}

impl From<GraphId> for EventScope {
    fn from(graph: GraphId) -> Self {
        Self::Graph(graph)
    }
}

impl From<NodeHandle> for EventScope {
    fn from(node: NodeHandle) -> Self {
        Self::Node(node)
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(graph) => write!(f, "{}", graph),
            Self::Node(node) => write!(f, "{}", node),
        }
    }
}

/// One engine event, stamped with the evaluation time it happened at.
///
/// `seq` is zero until a collector accepts the event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    /// Position in the collector's stream.
    pub seq: u64,
    /// Severity.
    pub level: LogLevel,
    /// Lifecycle category.
    pub category: LogCategory,
    /// Evaluation time.
    pub time: EngineTime,
    /// Graph or node concerned.
    pub scope: EventScope,
    /// Message text.
    pub message: String,
    /// Extra context, in insertion order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<(String, String)>,
}

impl LogEvent {
    /// Build an event for `scope` at `time`.
    pub fn new(
        level: LogLevel,
        category: LogCategory,
        scope: impl Into<EventScope>,
        time: EngineTime,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            level,
            category,
            time,
            scope: scope.into(),
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Attach a key/value pair; keys keep insertion order.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Value of the first field named `key`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {} {}: {}",
            self.time, self.level, self.category, self.scope, self.message
        )?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_scope_reports_its_graph() {
        let node = NodeHandle::new(GraphId::new(4), 1);
        let event = LogEvent::new(
            LogLevel::Error,
            LogCategory::Node,
            node,
            EngineTime::from_micros(7),
            "failed",
        );
        assert_eq!(event.scope.graph(), GraphId::new(4));
        assert_eq!(event.scope.node(), Some(node));
        assert!(EventScope::from(GraphId::new(4)).node().is_none());
    }

    #[test]
    fn display_lists_fields_in_order() {
        let event = LogEvent::new(
            LogLevel::Warn,
            LogCategory::Node,
            NodeHandle::new(GraphId::new(2), 5),
            EngineTime::from_micros(0),
            "slow",
        )
        .with_field("signature", "lift")
        .with_field("rank", 3);

        let line = event.to_string();
        assert!(line.contains("Warn node graph_2[5]: slow"));
        assert!(line.ends_with("signature=lift rank=3"));
        assert_eq!(event.field("rank"), Some("3"));
        assert_eq!(event.field("missing"), None);
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
    }
}
