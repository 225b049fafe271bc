//! Structured node failure payload.
//!
//! When a node fails, the engine packages the failure into a [`NodeError`]
//! and either ticks it on the node's error output or returns it inside
//! [`FlowError::NodeEvaluation`](crate::FlowError::NodeEvaluation).

use crate::error::{FlowError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured description of a failed node evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    /// Signature name of the failing node.
    pub signature_name: String,
    /// Optional user label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Node path, e.g. `graph_0[3]/graph_4[1]`.
    pub node_path: String,
    /// Top-level error message.
    pub error_msg: String,
    /// Full rendered error chain.
    #[serde(default)]
    pub stack_trace: String,
    /// Rendered activation back trace.
    #[serde(default)]
    pub activation_back_trace: String,
    /// Extra context added by the capturing boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl NodeError {
    /// Create a new node error.
    pub fn new(
        signature_name: impl Into<String>,
        node_path: impl Into<String>,
        error_msg: impl Into<String>,
    ) -> Self {
        Self {
            signature_name: signature_name.into(),
            label: None,
            node_path: node_path.into(),
            error_msg: error_msg.into(),
            stack_trace: String::new(),
            activation_back_trace: String::new(),
            additional_context: None,
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// Set the rendered error chain.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    /// Set the activation back trace.
    pub fn with_back_trace(mut self, back_trace: &BackTrace) -> Self {
        self.activation_back_trace = back_trace.to_string();
        self
    }

    /// Set additional context.
    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    /// Encode as a scalar value for delivery on an error output.
    pub fn to_value(&self) -> Result<Value> {
        Value::from_serialize(self)
    }

    /// Decode from a scalar value read from an error output.
    pub fn from_value(value: &Value) -> Result<Self> {
        value
            .decode()
            .map_err(|e| FlowError::Serialization(format!("Not a node error: {}", e)))
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {} ", self.signature_name)?;
        if let Some(label) = &self.label {
            write!(f, "'{}' ", label)?;
        }
        write!(f, "at {} failed: {}", self.node_path, self.error_msg)?;
        if let Some(context) = &self.additional_context {
            write!(f, " ({})", context)?;
        }
        if !self.activation_back_trace.is_empty() {
            write!(f, "\n{}", self.activation_back_trace)?;
        }
        Ok(())
    }
}

impl std::error::Error for NodeError {}

/// Snapshot of one input at the moment its node failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTrace {
    /// Input argument name.
    pub name: String,
    /// Whether the input ticked this evaluation.
    pub modified: bool,
    /// Whether the input currently has a value.
    pub valid: bool,
    /// Rendered value, when value capture is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Trace of the upstream node, while depth allows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Box<BackTrace>>,
}

/// Bounded-depth tree of the inputs that led to a node activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackTrace {
    /// Signature of the traced node.
    pub signature_name: String,
    /// Node path of the traced node.
    pub node_path: String,
    /// Inputs of the traced node.
    pub inputs: Vec<InputTrace>,
}

impl BackTrace {
    /// Create an empty back trace for a node.
    pub fn new(signature_name: impl Into<String>, node_path: impl Into<String>) -> Self {
        Self {
            signature_name: signature_name.into(),
            node_path: node_path.into(),
            inputs: Vec::new(),
        }
    }

    /// Names of the inputs that ticked.
    pub fn modified_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|i| i.modified)
            .map(|i| i.name.as_str())
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(f, "{}{} @ {}", indent, self.signature_name, self.node_path)?;
        for input in &self.inputs {
            let marker = if input.modified { "*" } else { " " };
            write!(f, "{}  {}{}", indent, marker, input.name)?;
            if !input.valid {
                write!(f, " <invalid>")?;
            } else if let Some(value) = &input.value {
                write!(f, " = {}", value)?;
            }
            writeln!(f)?;
            if let Some(upstream) = &input.upstream {
                upstream.render(f, depth + 2)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for BackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> BackTrace {
        let upstream = BackTrace::new("const", "graph_0[0]");

        let mut trace = BackTrace::new("lift", "graph_0[1]");
        trace.inputs.push(InputTrace {
            name: "lhs".into(),
            modified: true,
            valid: true,
            value: Some("1".into()),
            upstream: Some(Box::new(upstream)),
        });
        trace.inputs.push(InputTrace {
            name: "rhs".into(),
            modified: false,
            valid: false,
            value: None,
            upstream: None,
        });
        trace
    }

    #[test]
    fn back_trace_rendering() {
        let rendered = sample_trace().to_string();
        assert!(rendered.starts_with("lift @ graph_0[1]"));
        assert!(rendered.contains("*lhs = 1"));
        assert!(rendered.contains(" rhs <invalid>"));
        assert!(rendered.contains("    const @ graph_0[0]"));
    }

    #[test]
    fn modified_inputs() {
        let trace = sample_trace();
        assert_eq!(trace.modified_inputs().collect::<Vec<_>>(), vec!["lhs"]);
    }

    #[test]
    fn value_round_trip() {
        let err = NodeError::new("lift", "graph_0[1]", "division by zero")
            .with_label(Some("ratio".into()))
            .with_back_trace(&sample_trace())
            .with_additional_context("captured");

        let value = err.to_value().unwrap();
        assert_eq!(NodeError::from_value(&value).unwrap(), err);
        assert!(NodeError::from_value(&Value::int(1)).is_err());
    }

    #[test]
    fn display_includes_path_and_message() {
        let err = NodeError::new("lift", "graph_0[1]", "boom").with_label(Some("x".into()));
        let msg = err.to_string();
        assert!(msg.contains("lift 'x' at graph_0[1] failed: boom"));
    }
}
