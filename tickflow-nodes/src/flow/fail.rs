//! Deliberate failures.

use tickflow_core::{NodeDescriptor, NodeKind, TsShape};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic};

/// Forwards its `x` input for the first `passes` ticks, then fails on
/// every tick after that.
#[derive(Debug, Clone)]
pub struct FailingNode {
    passes: usize,
    message: String,
    seen: usize,
}

impl FailingNode {
    /// Node failing with a generic message.
    pub fn new(passes: usize) -> Self {
        Self {
            passes,
            message: format!("failing after {} ticks", passes),
            seen: 0,
        }
    }

    /// Fail with `message` instead.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Scalar pass-through descriptor named `name`.
    pub fn descriptor(name: &str) -> NodeDescriptor {
        NodeDescriptor::new(name, NodeKind::Compute)
            .with_input("x", TsShape::Scalar)
            .with_output(TsShape::Scalar)
    }

    /// Builder over `descriptor`, typically [`FailingNode::descriptor`]
    /// with error capture switched on or off.
    pub fn builder(self, descriptor: NodeDescriptor) -> NodeBuilder {
        NodeBuilder::from_logic(descriptor, move || self.clone())
    }
}

impl NodeLogic for FailingNode {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        self.seen += 1;
        if self.seen > self.passes {
            anyhow::bail!("{}", self.message);
        }
        if let Some(value) = ctx.value("x")? {
            ctx.set_output(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{Recording, RecordingSink};
    use crate::sources::TickerNode;
    use tickflow_core::{EngineConfig, EngineDelta, EngineTime, NodeError, Value};
    use tickflow_engine::{BuildContext, EvaluationEngine, Wiring};

    #[test]
    fn captured_failures_keep_the_graph_running() {
        let recording = Recording::new();
        let mut w = Wiring::new();
        let ticker = w.add_node(TickerNode::new(EngineDelta::from_micros(1)).with_limit(4).builder());
        let descriptor = FailingNode::descriptor("flaky").with_capture_exception(true);
        let flaky = w.add_node(FailingNode::new(2).with_message("flaky gave up").builder(descriptor));
        let sink = w.add_node(RecordingSink::builder(&recording));
        w.connect(ticker, flaky, "x").unwrap();
        w.connect(flaky, sink, "ts").unwrap();

        let config = EngineConfig::default().with_start_time(EngineTime::from_micros(10));
        let mut engine = EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config);
        engine.run().unwrap();

        assert_eq!(recording.values(), vec![Value::from(0), Value::from(1)]);
        assert_eq!(engine.last_tick(), EngineTime::from_micros(13));

        let rt = engine.runtime();
        let error_output = rt.node(engine.handle(flaky).unwrap()).unwrap().error_output().unwrap();
        let error = NodeError::from_value(&rt.output_value(error_output).unwrap()).unwrap();
        assert_eq!(error.error_msg, "flaky gave up");
        assert_eq!(rt.output(error_output).unwrap().last_modified(), EngineTime::from_micros(13));
    }
}
