//! Push source for values produced outside the engine.

use tickflow_core::{NodeDescriptor, NodeKind, TsShape, Value};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic};

/// Scalar push source.
///
/// By default every message gets a tick of its own: a second message
/// arriving in the same engine instant waits for the next one. A
/// coalescing source applies every message it is offered, so only the
/// latest of a burst is visible downstream.
///
/// # Usage
///
/// ```ignore
/// let prices = wiring.add_node(ChannelSource::builder(ChannelSource::descriptor("prices")));
/// let mut engine = EvaluationEngine::new(wiring.build(BuildContext::ROOT)?, config);
/// engine.initialise()?;
/// let sender = engine.push_sender(prices)?;
/// std::thread::spawn(move || sender.send(101.5));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ChannelSource {
    coalesce: bool,
}

impl ChannelSource {
    /// Descriptor for a source named `name`. Add a recordable id to
    /// capture it in record mode.
    pub fn descriptor(name: &str) -> NodeDescriptor {
        NodeDescriptor::new(name, NodeKind::PushSource).with_output(TsShape::Scalar)
    }

    /// One message per tick.
    pub fn builder(descriptor: NodeDescriptor) -> NodeBuilder {
        NodeBuilder::from_logic(descriptor, || ChannelSource { coalesce: false })
    }

    /// Latest message wins within a tick.
    pub fn coalescing(descriptor: NodeDescriptor) -> NodeBuilder {
        NodeBuilder::from_logic(descriptor, || ChannelSource { coalesce: true })
    }
}

impl NodeLogic for ChannelSource {
    fn eval(&mut self, _ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn apply_message(&mut self, ctx: &mut NodeContext<'_>, message: Value) -> anyhow::Result<bool> {
        if !self.coalesce && ctx.output_modified() {
            return Ok(false);
        }
        ctx.set_output(message)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{Recording, RecordingSink};
    use tickflow_core::{EngineConfig, EngineTime};
    use tickflow_engine::{BuildContext, EvaluationEngine, Wiring};

    fn run(builder: NodeBuilder, messages: &[i64]) -> Recording {
        let recording = Recording::new();
        let mut w = Wiring::new();
        let source = w.add_node(builder);
        let sink = w.add_node(RecordingSink::builder(&recording));
        w.connect(source, sink, "ts").unwrap();

        let config = EngineConfig::default().with_start_time(EngineTime::from_micros(50));
        let mut engine = EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config);
        engine.initialise().unwrap();
        let sender = engine.push_sender(source).unwrap();
        for message in messages {
            sender.send(*message).unwrap();
        }
        engine.run().unwrap();
        recording
    }

    #[test]
    fn one_message_per_tick() {
        let recording = run(ChannelSource::builder(ChannelSource::descriptor("feed")), &[1, 2, 3]);
        let times: Vec<i64> = recording.ticks().iter().map(|(t, _)| t.as_micros()).collect();
        assert_eq!(times, vec![50, 51, 52]);
        assert_eq!(recording.values(), vec![Value::from(1), Value::from(2), Value::from(3)]);
    }

    #[test]
    fn coalescing_keeps_the_latest() {
        let recording = run(ChannelSource::coalescing(ChannelSource::descriptor("feed")), &[1, 2, 3]);
        assert_eq!(recording.ticks(), vec![(EngineTime::from_micros(50), Value::from(3))]);
    }
}
