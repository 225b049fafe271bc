//! Error types for tickflow.
//!
//! Every variant carries a stable code and the identifiers needed to find
//! the offending graph, node or input. Build-time and scheduling errors are
//! fatal; errors raised by node code are captured at the node boundary and
//! delivered on the node's error output when one is wired.

use crate::node_error::NodeError;
use crate::types::{EngineTime, NodeHandle, OutputId};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tickflow operations.
#[derive(Error, Debug)]
pub enum FlowError {
    // =========================================================================
    // Build Errors (E100-E199)
    // =========================================================================
    /// Topological sort could not order every node.
    #[error("E101: Cycle detected in graph:\n{chain}")]
    GraphCycle {
        /// Rendered node chain, one node per line with its scalars.
        chain: String,
    },

    /// A push-source node was wired into a graph that cannot host one.
    #[error("E102: Push source node '{node}' is not supported in a nested graph")]
    PushNodeNotSupported {
        /// Signature of the offending node.
        node: String,
    },

    /// An edge points backwards in the ranked node list.
    #[error("E103: Edge order violation: node '{node}' input '{input}' is bound to a node that ranks after it")]
    EdgeOrder {
        /// Signature of the destination node.
        node: String,
        /// Name of the destination input.
        input: String,
    },

    /// An edge references a node or path that does not exist.
    #[error("E104: Invalid edge {src_node} -> {dst_node}: {cause}")]
    InvalidEdge {
        /// Source ordinal.
        src_node: usize,
        /// Destination ordinal.
        dst_node: usize,
        /// Description of the problem.
        cause: String,
    },

    /// A named input is not declared by the node descriptor.
    #[error("E105: Node '{node}' has no input named '{input}'")]
    UnknownInput {
        /// Signature of the node.
        node: String,
        /// The unknown input name.
        input: String,
    },

    /// A node used a capability it did not declare.
    #[error("E106: Node '{node}' did not declare the '{injectable}' injectable")]
    MissingInjectable {
        /// Signature of the node.
        node: String,
        /// The injectable that is missing.
        injectable: String,
    },

    // =========================================================================
    // Scheduling / Lifecycle Errors (E200-E299)
    // =========================================================================
    /// A node was scheduled at or before the time currently being evaluated.
    #[error("E201: Cannot schedule {node} at {requested}: current evaluation time is {now}")]
    ScheduleInPast {
        /// Node being scheduled.
        node: NodeHandle,
        /// The requested time.
        requested: EngineTime,
        /// The current evaluation time.
        now: EngineTime,
    },

    /// An operation was attempted in the wrong lifecycle state.
    #[error("E202: Cannot {operation} {target} while it is {state}")]
    InvalidLifecycle {
        /// Graph or node description.
        target: String,
        /// The attempted operation.
        operation: String,
        /// The current lifecycle state.
        state: String,
    },

    /// A node handle does not resolve to a live node.
    #[error("E203: Node {node} not found")]
    UnknownNode {
        /// The dangling handle.
        node: NodeHandle,
    },

    /// A push queue is full and the producer asked not to block.
    #[error("E204: Push queue full (capacity {capacity})")]
    PushQueueFull {
        /// The queue capacity.
        capacity: usize,
    },

    /// The evaluation loop has gone away.
    #[error("E205: Push queue closed")]
    PushQueueClosed,

    // =========================================================================
    // Node Evaluation Errors (E300-E399)
    // =========================================================================
    /// A node failed during evaluation and no error output captured it.
    #[error("E301: {0}")]
    NodeEvaluation(Box<NodeError>),

    // =========================================================================
    // Nested Graph Errors (E400-E499)
    // =========================================================================
    /// A mesh dependency would close a cycle.
    #[error("E401: Mesh dependency cycle: {}", path.join(" -> "))]
    MeshCycle {
        /// Keys on the cycle, first key repeated at the end.
        path: Vec<String>,
    },

    /// A nested graph could not be wired or driven.
    #[error("E402: Nested graph error in {node}: {cause}")]
    Nested {
        /// The host node.
        node: String,
        /// Description of the failure.
        cause: String,
    },

    // =========================================================================
    // Binding Errors (E500-E599)
    // =========================================================================
    /// An input could not be bound to an output.
    #[error("E501: Binding failed for {input}: {cause}")]
    Binding {
        /// The input description.
        input: String,
        /// Reason for the failure.
        cause: String,
    },

    /// An output id does not resolve to a live output.
    #[error("E502: Output {output} not found")]
    UnknownOutput {
        /// The dangling id.
        output: OutputId,
    },

    /// A value of the wrong shape was written to an output.
    #[error("E503: Shape mismatch on {output}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The output being written.
        output: OutputId,
        /// The expected shape.
        expected: String,
        /// The attempted shape.
        actual: String,
    },

    // =========================================================================
    // Replay Errors (E600-E699)
    // =========================================================================
    /// A replay source could not be read.
    #[error("E601: Replay failed for '{recordable_id}': {cause}")]
    Replay {
        /// The recordable id of the stream.
        recordable_id: String,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// YAML parsing failed.
    #[error("E801: Failed to parse YAML at {path}: {cause}")]
    YamlParse {
        /// The path to the YAML file.
        path: PathBuf,
        /// Reason for the parse failure.
        cause: String,
    },

    /// Invalid configuration value.
    #[error("E802: Invalid configuration '{field}': {cause}")]
    ConfigValue {
        /// The configuration field with invalid value.
        field: String,
        /// Description of why the value is invalid.
        cause: String,
    },

    /// Serialization/deserialization error.
    #[error("E804: Serialization error: {0}")]
    Serialization(
        /// The serialization error message.
        String,
    ),

    // =========================================================================
    // I/O Errors (E900-E999)
    // =========================================================================
    /// File I/O error.
    #[error("E901: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

impl FlowError {
    /// Get the error code (e.g., "E101").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::GraphCycle { .. } => "E101",
            Self::PushNodeNotSupported { .. } => "E102",
            Self::EdgeOrder { .. } => "E103",
            Self::InvalidEdge { .. } => "E104",
            Self::UnknownInput { .. } => "E105",
            Self::MissingInjectable { .. } => "E106",
            Self::ScheduleInPast { .. } => "E201",
            Self::InvalidLifecycle { .. } => "E202",
            Self::UnknownNode { .. } => "E203",
            Self::PushQueueFull { .. } => "E204",
            Self::PushQueueClosed => "E205",
            Self::NodeEvaluation(_) => "E301",
            Self::MeshCycle { .. } => "E401",
            Self::Nested { .. } => "E402",
            Self::Binding { .. } => "E501",
            Self::UnknownOutput { .. } => "E502",
            Self::ShapeMismatch { .. } => "E503",
            Self::Replay { .. } => "E601",
            Self::YamlParse { .. } => "E801",
            Self::ConfigValue { .. } => "E802",
            Self::Serialization(_) => "E804",
            Self::Io { .. } => "E901",
        }
    }

    /// Check if this error must abort evaluation.
    ///
    /// Fatal errors are never captured onto a node's error output; they
    /// propagate straight out of the evaluation call.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::GraphCycle { .. }
                | Self::PushNodeNotSupported { .. }
                | Self::EdgeOrder { .. }
                | Self::InvalidEdge { .. }
                | Self::MissingInjectable { .. }
                | Self::ScheduleInPast { .. }
                | Self::InvalidLifecycle { .. }
                | Self::UnknownNode { .. }
                | Self::MeshCycle { .. }
                | Self::UnknownOutput { .. }
        )
    }

    /// Check if this error was raised while building a graph.
    #[must_use]
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::GraphCycle { .. }
                | Self::PushNodeNotSupported { .. }
                | Self::EdgeOrder { .. }
                | Self::InvalidEdge { .. }
                | Self::UnknownInput { .. }
        )
    }

    /// Get the structured node error, if this is a node evaluation failure.
    #[must_use]
    pub fn node_error(&self) -> Option<&NodeError> {
        match self {
            Self::NodeEvaluation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NodeError> for FlowError {
    fn from(err: NodeError) -> Self {
        Self::NodeEvaluation(Box::new(err))
    }
}

/// Result type alias using `FlowError`.
pub type Result<T> = std::result::Result<T, FlowError>;
