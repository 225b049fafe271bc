//! Resolved node descriptors.
//!
//! A [`NodeDescriptor`] is the only thing the engine knows about a node's
//! signature: ordered arguments with their kinds, the declared output shape,
//! and a handful of flags that change how the engine treats the node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a time-series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsShape {
    /// A single scalar value.
    Scalar,
    /// A set of keys with per-tick added/removed deltas.
    Set,
    /// Fixed-size list of time-series.
    List {
        /// Shape of each element.
        element: Box<TsShape>,
        /// Number of elements.
        size: usize,
    },
    /// Named fields, each its own time-series.
    Bundle(Vec<(String, TsShape)>),
    /// Dynamically keyed time-series.
    Dict(Box<TsShape>),
    /// Reference to a time-series of the wrapped shape.
    Reference(Box<TsShape>),
}

impl TsShape {
    /// Create a list shape.
    pub fn list(element: TsShape, size: usize) -> Self {
        Self::List {
            element: Box::new(element),
            size,
        }
    }

    /// Create a dict shape.
    pub fn dict(element: TsShape) -> Self {
        Self::Dict(Box::new(element))
    }

    /// Create a reference shape.
    pub fn reference(inner: TsShape) -> Self {
        Self::Reference(Box::new(inner))
    }

    /// Create a bundle shape from `(name, shape)` pairs.
    pub fn bundle<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, TsShape)>,
        S: Into<String>,
    {
        Self::Bundle(fields.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }

    /// Whether this is a reference shape.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    /// Shape of the child at `index`, for list and bundle shapes.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<&TsShape> {
        match self {
            Self::List { element, size } if index < *size => Some(element),
            Self::Bundle(fields) => fields.get(index).map(|(_, s)| s),
            _ => None,
        }
    }

    /// Index of a bundle field by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        match self {
            Self::Bundle(fields) => fields.iter().position(|(n, _)| n == name),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar => "TS",
            Self::Set => "TSS",
            Self::List { .. } => "TSL",
            Self::Bundle(_) => "TSB",
            Self::Dict(_) => "TSD",
            Self::Reference(_) => "REF",
        }
    }
}

impl fmt::Display for TsShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar | Self::Set => write!(f, "{}", self.kind_name()),
            Self::List { element, size } => write!(f, "TSL[{}, {}]", element, size),
            Self::Bundle(fields) => {
                let parts: Vec<String> = fields.iter().map(|(n, s)| format!("{}: {}", n, s)).collect();
                write!(f, "TSB[{}]", parts.join(", "))
            }
            Self::Dict(element) => write!(f, "TSD[{}]", element),
            Self::Reference(inner) => write!(f, "REF[{}]", inner),
        }
    }
}

/// Engine-provided capabilities a node may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Injectable {
    /// Read access to the evaluation clock.
    Clock,
    /// Permission to schedule its own future evaluations.
    Scheduler,
    /// Per-node mutable state.
    State,
    /// Direct access to its own output.
    Output,
    /// Access to the engine notification API.
    EngineApi,
}

impl Injectable {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clock => "clock",
            Self::Scheduler => "scheduler",
            Self::State => "state",
            Self::Output => "output",
            Self::EngineApi => "engine_api",
        }
    }
}

/// Kind of a single node argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// Configuration value fixed at wiring time.
    Scalar,
    /// Time-series input of the given shape.
    TimeSeries(TsShape),
    /// Capability supplied by the engine.
    Injectable(Injectable),
}

/// One named argument of a node signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Argument name.
    pub name: String,
    /// Argument kind.
    pub kind: ArgKind,
    /// Whether a tick on this input schedules the node. Ignored for non time-series args.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl ArgSpec {
    /// Whether this argument is a time-series input.
    #[must_use]
    pub fn is_time_series(&self) -> bool {
        matches!(self.kind, ArgKind::TimeSeries(_))
    }

    /// Shape of the time-series input, if it is one.
    #[must_use]
    pub fn shape(&self) -> Option<&TsShape> {
        match &self.kind {
            ArgKind::TimeSeries(shape) => Some(shape),
            _ => None,
        }
    }
}

/// Role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Fed from outside the graph by a producer thread.
    PushSource,
    /// Generates values by scheduling itself.
    PullSource,
    /// Ordinary computation.
    Compute,
    /// Terminal node with no output.
    Sink,
    /// Placeholder that a host node wires to its own inputs or outputs.
    Stub,
}

impl NodeKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PushSource => "push_source",
            Self::PullSource => "pull_source",
            Self::Compute => "compute",
            Self::Sink => "sink",
            Self::Stub => "stub",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved signature of a node. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Signature name, e.g. `add_`.
    pub signature_name: String,
    /// Optional user label.
    #[serde(default)]
    pub label: Option<String>,
    /// Role of the node.
    pub kind: NodeKind,
    /// Ordered arguments.
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// Declared output shape.
    #[serde(default)]
    pub output: Option<TsShape>,
    /// Deliver failures on an error output instead of raising them.
    #[serde(default)]
    pub capture_exception: bool,
    /// The node hosts one or more nested graphs.
    #[serde(default)]
    pub has_nested_graphs: bool,
    /// Inputs that must be valid before the node evaluates. `None` means all.
    #[serde(default)]
    pub valid_inputs: Option<Vec<String>>,
    /// Inputs whose every element must be valid before the node evaluates.
    #[serde(default)]
    pub all_valid_inputs: Vec<String>,
    /// Key of the persisted stream this node records to or replays from.
    #[serde(default)]
    pub recordable_id: Option<String>,
}

impl NodeDescriptor {
    /// Create a new descriptor with no arguments and no output.
    pub fn new(signature_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            signature_name: signature_name.into(),
            label: None,
            kind,
            args: Vec::new(),
            output: None,
            capture_exception: false,
            has_nested_graphs: false,
            valid_inputs: None,
            all_valid_inputs: Vec::new(),
            recordable_id: None,
        }
    }

    /// Add a scalar argument.
    pub fn with_scalar(mut self, name: impl Into<String>) -> Self {
        self.args.push(ArgSpec {
            name: name.into(),
            kind: ArgKind::Scalar,
            active: false,
        });
        self
    }

    /// Add an active time-series input.
    pub fn with_input(mut self, name: impl Into<String>, shape: TsShape) -> Self {
        self.args.push(ArgSpec {
            name: name.into(),
            kind: ArgKind::TimeSeries(shape),
            active: true,
        });
        self
    }

    /// Add a passive time-series input.
    pub fn with_passive_input(mut self, name: impl Into<String>, shape: TsShape) -> Self {
        self.args.push(ArgSpec {
            name: name.into(),
            kind: ArgKind::TimeSeries(shape),
            active: false,
        });
        self
    }

    /// Add an injectable argument.
    pub fn with_injectable(mut self, name: impl Into<String>, injectable: Injectable) -> Self {
        self.args.push(ArgSpec {
            name: name.into(),
            kind: ArgKind::Injectable(injectable),
            active: false,
        });
        self
    }

    /// Set the output shape.
    pub fn with_output(mut self, shape: TsShape) -> Self {
        self.output = Some(shape);
        self
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Capture failures onto an error output.
    pub fn with_capture_exception(mut self, capture: bool) -> Self {
        self.capture_exception = capture;
        self
    }

    /// Mark the node as hosting nested graphs.
    pub fn with_nested_graphs(mut self, nested: bool) -> Self {
        self.has_nested_graphs = nested;
        self
    }

    /// Restrict the inputs that must be valid.
    pub fn with_valid_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_inputs = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Require inputs to be fully valid.
    pub fn with_all_valid_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.all_valid_inputs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the recordable id.
    pub fn with_recordable_id(mut self, id: impl Into<String>) -> Self {
        self.recordable_id = Some(id.into());
        self
    }

    /// Position of an argument by name.
    #[must_use]
    pub fn arg_index(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|a| a.name == name)
    }

    /// Iterate `(position, spec)` for time-series inputs.
    pub fn time_series_inputs(&self) -> impl Iterator<Item = (usize, &ArgSpec)> {
        self.args.iter().enumerate().filter(|(_, a)| a.is_time_series())
    }

    /// Whether the node declared an injectable.
    #[must_use]
    pub fn has_injectable(&self, injectable: Injectable) -> bool {
        self.args
            .iter()
            .any(|a| a.kind == ArgKind::Injectable(injectable))
    }

    /// Whether the named input must be valid before evaluation.
    #[must_use]
    pub fn requires_valid(&self, name: &str) -> bool {
        match &self.valid_inputs {
            Some(names) => names.iter().any(|n| n == name),
            None => true,
        }
    }

    /// Whether the named input must be fully valid before evaluation.
    #[must_use]
    pub fn requires_all_valid(&self, name: &str) -> bool {
        self.all_valid_inputs.iter().any(|n| n == name)
    }

    /// Whether this is a push source.
    #[must_use]
    pub fn is_push_source(&self) -> bool {
        self.kind == NodeKind::PushSource
    }

    /// Whether this is a stub.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.kind == NodeKind::Stub
    }

    /// Whether this is a sink.
    #[must_use]
    pub fn is_sink(&self) -> bool {
        self.kind == NodeKind::Sink
    }

    /// Whether this is any kind of source.
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.kind, NodeKind::PushSource | NodeKind::PullSource)
    }

    /// Human-readable name: the label when present, else the signature.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.signature_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lift() -> NodeDescriptor {
        NodeDescriptor::new("lift", NodeKind::Compute)
            .with_scalar("fn")
            .with_input("lhs", TsShape::Scalar)
            .with_passive_input("rhs", TsShape::Scalar)
            .with_injectable("sched", Injectable::Scheduler)
            .with_output(TsShape::Scalar)
    }

    #[test]
    fn argument_lookup() {
        let d = lift();
        assert_eq!(d.arg_index("rhs"), Some(2));
        assert_eq!(d.arg_index("missing"), None);
        let ts: Vec<_> = d.time_series_inputs().map(|(i, a)| (i, a.active)).collect();
        assert_eq!(ts, vec![(1, true), (2, false)]);
        assert!(d.has_injectable(Injectable::Scheduler));
        assert!(!d.has_injectable(Injectable::State));
    }

    #[test]
    fn validity_requirements() {
        let d = lift();
        assert!(d.requires_valid("lhs"));
        assert!(d.requires_valid("rhs"));

        let d = lift().with_valid_inputs(["lhs"]).with_all_valid_inputs(["lhs"]);
        assert!(d.requires_valid("lhs"));
        assert!(!d.requires_valid("rhs"));
        assert!(d.requires_all_valid("lhs"));
        assert!(!d.requires_all_valid("rhs"));
    }

    #[test]
    fn shape_navigation() {
        let shape = TsShape::bundle([("a", TsShape::Scalar), ("b", TsShape::dict(TsShape::Scalar))]);
        assert_eq!(shape.field_index("b"), Some(1));
        assert_eq!(shape.child(1), Some(&TsShape::dict(TsShape::Scalar)));
        assert_eq!(shape.to_string(), "TSB[a: TS, b: TSD[TS]]");

        let list = TsShape::list(TsShape::Scalar, 2);
        assert_eq!(list.child(1), Some(&TsShape::Scalar));
        assert_eq!(list.child(2), None);
        assert!(TsShape::reference(TsShape::Scalar).is_reference());
    }

    #[test]
    fn descriptor_serde() {
        let d = lift().with_recordable_id("quotes");
        let json = serde_json::to_string(&d).unwrap();
        let parsed: NodeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, d);
    }
}
