//! Interval source.

use tickflow_core::{EngineDelta, Injectable, NodeDescriptor, NodeKind, TsShape};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic};

/// Emits 0, 1, 2, ... starting at graph start, one value every `interval`.
#[derive(Debug, Clone)]
pub struct TickerNode {
    interval: EngineDelta,
    limit: Option<u64>,
    count: u64,
}

impl TickerNode {
    /// Ticker that runs until the engine's end time.
    pub fn new(interval: EngineDelta) -> Self {
        Self {
            interval,
            limit: None,
            count: 0,
        }
    }

    /// Stop after `limit` ticks.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder producing one instance per graph.
    pub fn builder(self) -> NodeBuilder {
        let descriptor = NodeDescriptor::new("ticker", NodeKind::PullSource)
            .with_injectable("scheduler", Injectable::Scheduler)
            .with_output(TsShape::Scalar);
        NodeBuilder::from_logic(descriptor, move || self.clone())
    }

    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.count >= limit)
    }
}

impl NodeLogic for TickerNode {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        if self.interval <= EngineDelta::ZERO {
            anyhow::bail!("ticker interval must be positive, got {}us", self.interval.as_micros());
        }
        self.count = 0;
        if !self.exhausted() {
            ctx.schedule_in(EngineDelta::ZERO)?;
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let count = i64::try_from(self.count)?;
        ctx.set_output(count)?;
        self.count += 1;
        if !self.exhausted() {
            ctx.schedule_in(self.interval)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{Recording, RecordingSink};
    use tickflow_core::{EngineConfig, EngineTime, Value};
    use tickflow_engine::{BuildContext, EvaluationEngine, Wiring};

    fn run(ticker: TickerNode, config: EngineConfig) -> Recording {
        let recording = Recording::new();
        let mut w = Wiring::new();
        let source = w.add_node(ticker.builder());
        let sink = w.add_node(RecordingSink::builder(&recording));
        w.connect(source, sink, "ts").unwrap();
        let mut engine = EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config);
        engine.run().unwrap();
        recording
    }

    #[test]
    fn counts_on_the_interval() {
        let config = EngineConfig::default().with_start_time(EngineTime::from_secs(1));
        let recording = run(TickerNode::new(EngineDelta::from_secs(1)).with_limit(3), config);
        assert_eq!(
            recording.ticks(),
            vec![
                (EngineTime::from_secs(1), Value::from(0)),
                (EngineTime::from_secs(2), Value::from(1)),
                (EngineTime::from_secs(3), Value::from(2)),
            ]
        );
    }

    #[test]
    fn end_time_stops_an_unlimited_ticker() {
        let config = EngineConfig::default()
            .with_start_time(EngineTime::from_millis(1))
            .with_end_time(EngineTime::from_millis(10));
        let recording = run(TickerNode::new(EngineDelta::from_millis(4)), config);
        assert_eq!(recording.values(), vec![Value::from(0), Value::from(1), Value::from(2)]);
    }
}
