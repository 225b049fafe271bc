//! Lift a plain function onto time-series.

use std::sync::Arc;
use tickflow_core::{NodeDescriptor, NodeKind, Result, TsShape, Value};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic};

type LiftFn = dyn Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync;

/// Compute node calling a function with the current value of each
/// time-series input, in declaration order.
///
/// The function sees `None` for inputs that are not valid. Returning
/// `Ok(None)` leaves the output untouched for the tick.
pub struct LiftNode {
    inputs: Arc<Vec<String>>,
    f: Arc<LiftFn>,
}

impl LiftNode {
    /// Scalar-in, scalar-out node named `name`.
    pub fn builder<F>(name: &str, inputs: &[&str], f: F) -> NodeBuilder
    where
        F: Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        let descriptor = inputs
            .iter()
            .fold(NodeDescriptor::new(name, NodeKind::Compute), |d, input| {
                d.with_input(*input, TsShape::Scalar)
            })
            .with_output(TsShape::Scalar);
        Self::with_descriptor(descriptor, f)
    }

    /// Node over a caller-supplied descriptor, e.g. one with relaxed
    /// validity or error capture.
    pub fn with_descriptor<F>(descriptor: NodeDescriptor, f: F) -> NodeBuilder
    where
        F: Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        let inputs: Arc<Vec<String>> = Arc::new(
            descriptor
                .time_series_inputs()
                .map(|(_, arg)| arg.name.clone())
                .collect(),
        );
        let f: Arc<LiftFn> = Arc::new(f);
        NodeBuilder::from_logic(descriptor, move || LiftNode {
            inputs: Arc::clone(&inputs),
            f: Arc::clone(&f),
        })
    }
}

impl NodeLogic for LiftNode {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let values = self
            .inputs
            .iter()
            .map(|name| ctx.value(name))
            .collect::<Result<Vec<_>>>()?;
        if let Some(value) = (self.f)(&values)? {
            ctx.set_output(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConstNode;
    use crate::sinks::{Recording, RecordingSink};
    use tickflow_core::{EngineConfig, EngineDelta, EngineTime};
    use tickflow_engine::{BuildContext, EvaluationEngine, Wiring};

    fn add(v: &[Option<Value>]) -> anyhow::Result<Option<Value>> {
        let total: i64 = v.iter().flatten().filter_map(Value::as_i64).sum();
        Ok(Some(Value::from(total)))
    }

    #[test]
    fn combines_latest_values() {
        let recording = Recording::new();
        let mut w = Wiring::new();
        let a = w.add_node(ConstNode::new(1).builder());
        let b = w
            .add_node(ConstNode::new(10).with_delay(EngineDelta::from_micros(2)).builder());
        let sum = w.add_node(LiftNode::builder("add", &["a", "b"], add));
        let sink = w.add_node(RecordingSink::builder(&recording));
        w.connect(a, sum, "a").unwrap();
        w.connect(b, sum, "b").unwrap();
        w.connect(sum, sink, "ts").unwrap();

        let start = EngineTime::from_secs(1);
        let config = EngineConfig::default().with_start_time(start);
        let mut engine = EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config);
        engine.run().unwrap();

        // Nothing ticks until both inputs are valid.
        assert_eq!(
            recording.ticks(),
            vec![(start + EngineDelta::from_micros(2), Value::from(11))]
        );
    }

    #[test]
    fn relaxed_validity_sees_missing_inputs() {
        let recording = Recording::new();
        let mut w = Wiring::new();
        let a = w.add_node(ConstNode::new(1).builder());
        let b = w
            .add_node(ConstNode::new(10).with_delay(EngineDelta::from_micros(2)).builder());
        let descriptor = NodeDescriptor::new("add", NodeKind::Compute)
            .with_input("a", TsShape::Scalar)
            .with_input("b", TsShape::Scalar)
            .with_output(TsShape::Scalar)
            .with_valid_inputs(["a"]);
        let sum = w.add_node(LiftNode::with_descriptor(descriptor, add));
        let sink = w.add_node(RecordingSink::builder(&recording));
        w.connect(a, sum, "a").unwrap();
        w.connect(b, sum, "b").unwrap();
        w.connect(sum, sink, "ts").unwrap();

        let config = EngineConfig::default().with_start_time(EngineTime::from_secs(1));
        let mut engine = EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config);
        engine.run().unwrap();

        assert_eq!(recording.values(), vec![Value::from(1), Value::from(11)]);
    }
}
