//! Constant source.

use tickflow_core::{EngineDelta, Injectable, NodeDescriptor, NodeKind, TsShape, Value};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic};

/// Ticks `value` once, `delay` after the graph starts.
///
/// # Usage
///
/// ```ignore
/// let one = wiring.add_node(ConstNode::new(1).builder());
/// let late = wiring.add_node(ConstNode::new("x").with_delay(EngineDelta::from_secs(5)).builder());
/// ```
#[derive(Debug, Clone)]
pub struct ConstNode {
    value: Value,
    delay: EngineDelta,
}

impl ConstNode {
    /// Constant ticking at start time.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            delay: EngineDelta::ZERO,
        }
    }

    /// Tick `delay` after start instead.
    pub fn with_delay(mut self, delay: EngineDelta) -> Self {
        self.delay = delay;
        self
    }

    /// Descriptor shared by all constants.
    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new("const", NodeKind::PullSource)
            .with_injectable("scheduler", Injectable::Scheduler)
            .with_output(TsShape::Scalar)
    }

    /// Builder producing one instance per graph.
    pub fn builder(self) -> NodeBuilder {
        NodeBuilder::from_logic(Self::descriptor(), move || self.clone())
    }
}

impl NodeLogic for ConstNode {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        ctx.schedule_in(self.delay)?;
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        ctx.set_output(self.value.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{Recording, RecordingSink};
    use tickflow_core::{EngineConfig, EngineTime};
    use tickflow_engine::{BuildContext, EvaluationEngine, Wiring};

    fn run(node: ConstNode, start: EngineTime) -> Recording {
        let recording = Recording::new();
        let mut w = Wiring::new();
        let source = w.add_node(node.builder());
        let sink = w.add_node(RecordingSink::builder(&recording));
        w.connect(source, sink, "ts").unwrap();
        let config = EngineConfig::default().with_start_time(start);
        let mut engine = EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config);
        engine.run().unwrap();
        recording
    }

    #[test]
    fn ticks_once_at_start() {
        let start = EngineTime::from_secs(10);
        let recording = run(ConstNode::new(42), start);
        assert_eq!(recording.ticks(), vec![(start, Value::from(42))]);
    }

    #[test]
    fn delay_shifts_the_tick() {
        let start = EngineTime::from_secs(10);
        let delay = EngineDelta::from_millis(250);
        let recording = run(ConstNode::new("late").with_delay(delay), start);
        assert_eq!(recording.ticks(), vec![(start + delay, Value::from("late"))]);
    }
}
