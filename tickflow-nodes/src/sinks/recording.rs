//! In-memory capture of a time-series.

use parking_lot::Mutex;
use std::sync::Arc;
use tickflow_core::{EngineTime, NodeDescriptor, NodeKind, TsShape, Value};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic};

/// Shared handle to the ticks captured by one or more [`RecordingSink`]s.
///
/// Cloning the handle shares the underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    ticks: Arc<Mutex<Vec<(EngineTime, Value)>>>,
}

impl Recording {
    /// Empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured `(time, value)` pairs in tick order.
    pub fn ticks(&self) -> Vec<(EngineTime, Value)> {
        self.ticks.lock().clone()
    }

    /// Captured values without their times.
    pub fn values(&self) -> Vec<Value> {
        self.ticks.lock().iter().map(|(_, value)| value.clone()).collect()
    }

    /// Most recent tick.
    pub fn last(&self) -> Option<(EngineTime, Value)> {
        self.ticks.lock().last().cloned()
    }

    /// Number of captured ticks.
    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.ticks.lock().is_empty()
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.ticks.lock().clear();
    }

    fn push(&self, time: EngineTime, value: Value) {
        self.ticks.lock().push((time, value));
    }
}

/// Sink appending each tick of its `ts` input to a [`Recording`].
#[derive(Debug)]
pub struct RecordingSink {
    recording: Recording,
}

impl RecordingSink {
    /// Sink feeding `recording`.
    pub fn builder(recording: &Recording) -> NodeBuilder {
        let recording = recording.clone();
        let descriptor = NodeDescriptor::new("record", NodeKind::Sink).with_input("ts", TsShape::Scalar);
        NodeBuilder::from_logic(descriptor, move || RecordingSink {
            recording: recording.clone(),
        })
    }
}

impl NodeLogic for RecordingSink {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        if let Some(value) = ctx.value("ts")? {
            self.recording.push(ctx.evaluation_time(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_buffer() {
        let recording = Recording::new();
        let other = recording.clone();
        other.push(EngineTime::from_micros(3), Value::from("x"));

        assert_eq!(recording.len(), 1);
        assert_eq!(recording.last(), Some((EngineTime::from_micros(3), Value::from("x"))));

        recording.clear();
        assert!(other.is_empty());
    }
}
