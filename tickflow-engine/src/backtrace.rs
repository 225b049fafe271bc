//! Activation back-traces.
//!
//! When a node fails, the error carries a bounded-depth picture of what
//! activated it: which inputs ticked, which were valid, optionally their
//! values, and the same for the producers upstream.

use crate::runtime::Runtime;
use tickflow_core::{BackTrace, InputTrace, NodeHandle};

impl Runtime {
    /// Trace the inputs of `handle`, following producers for `depth` levels.
    pub fn back_trace(&self, handle: NodeHandle, depth: usize) -> BackTrace {
        let path = self.node_path(handle);
        let Ok(node) = self.node(handle) else {
            return BackTrace::new("<released>", path);
        };
        let mut trace = BackTrace::new(node.descriptor.signature_name.clone(), path);

        for (index, arg) in node.descriptor.time_series_inputs() {
            let Some(input) = node.inputs.get(index).copied().flatten() else {
                continue;
            };
            let value = if self.config.capture_values {
                self.input_snapshot(input).map(|v| v.to_string())
            } else {
                None
            };
            let upstream = if depth > 0 {
                self.input_output(input)
                    .and_then(|o| self.outputs.get(o))
                    .and_then(|o| o.owner)
                    .filter(|owner| *owner != handle)
                    .map(|owner| Box::new(self.back_trace(owner, depth - 1)))
            } else {
                None
            };
            trace.inputs.push(InputTrace {
                name: arg.name.clone(),
                modified: self.input_modified(input),
                valid: self.input_valid(input),
                value,
                upstream,
            });
        }
        trace
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::{BuildContext, Wiring};
    use crate::node::{NodeBody, NodeBuilder};
    use crate::runtime::{GraphWiring, Runtime};
    use std::sync::Arc;
    use tickflow_core::{
        EngineConfig, EngineTime, NodeDescriptor, NodeHandle, NodeKind, RealClock, TsShape, Value,
    };

    fn node(name: &str, kind: NodeKind, inputs: &[&str]) -> NodeBuilder {
        let mut descriptor = NodeDescriptor::new(name, kind).with_output(TsShape::Scalar);
        for input in inputs {
            descriptor = descriptor.with_input(*input, TsShape::Scalar);
        }
        NodeBuilder::from_fn(descriptor, |_, _| Ok(NodeBody::Stub))
    }

    fn chain(capture_values: bool) -> (Runtime, NodeHandle) {
        let mut w = Wiring::new();
        let a = w.add_node(node("a", NodeKind::PullSource, &[]));
        let b = w.add_node(node("b", NodeKind::Compute, &["x"]));
        let c = w.add_node(node("c", NodeKind::Compute, &["lhs", "rhs"]));
        w.connect(a, b, "x").unwrap();
        w.connect(b, c, "lhs").unwrap();
        w.connect(a, c, "rhs").unwrap();
        let builder = Arc::new(w.build(BuildContext::ROOT).unwrap());

        let config = EngineConfig::default().with_capture_values(capture_values);
        let mut rt = Runtime::new(config, Arc::new(RealClock::new()));
        rt.evaluation_time = EngineTime::from_micros(5);
        let id = rt
            .make_graph(Arc::clone(&builder), None, GraphWiring::default(), None, None)
            .unwrap();
        let a_out = rt.graph(id).unwrap().node(0).unwrap().output.unwrap();
        rt.set_value(a_out, Value::int(7)).unwrap();
        (rt, NodeHandle::new(id, 2))
    }

    #[test]
    fn records_inputs_and_upstream() {
        let (rt, c) = chain(true);
        let trace = rt.back_trace(c, 1);
        assert_eq!(trace.signature_name, "c");
        assert_eq!(trace.inputs.len(), 2);

        let lhs = &trace.inputs[0];
        assert!(!lhs.valid);
        let upstream = lhs.upstream.as_ref().unwrap();
        assert_eq!(upstream.signature_name, "b");
        assert!(upstream.inputs[0].upstream.is_none());

        let rhs = &trace.inputs[1];
        assert!(rhs.modified);
        assert_eq!(rhs.value.as_deref(), Some("7"));
        assert_eq!(trace.modified_inputs().collect::<Vec<_>>(), vec!["rhs"]);
    }

    #[test]
    fn depth_zero_and_no_values() {
        let (rt, c) = chain(false);
        let trace = rt.back_trace(c, 0);
        assert!(trace.inputs.iter().all(|i| i.upstream.is_none()));
        assert!(trace.inputs.iter().all(|i| i.value.is_none()));
    }
}
