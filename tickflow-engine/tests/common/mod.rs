//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use tickflow_engine::prelude::*;

/// Ticks seen by a [`collect`] sink.
pub type Ticks = Arc<Mutex<Vec<(EngineTime, Value)>>>;

pub fn t(micros: i64) -> EngineTime {
    EngineTime::from_micros(micros)
}

pub fn ticks() -> Ticks {
    Arc::new(Mutex::new(Vec::new()))
}

/// Plain `(time, value)` pairs for assertions.
pub fn seen(ticks: &Ticks) -> Vec<(i64, Value)> {
    ticks
        .lock()
        .iter()
        .map(|(time, value)| (time.as_micros(), value.clone()))
        .collect()
}

pub fn int(value: &Option<Value>) -> Option<i64> {
    value.as_ref().and_then(Value::as_i64)
}

// ---- sources ------------------------------------------------------------

/// Scalar source emitting scripted values at scripted times.
struct Script {
    values: Arc<Vec<(EngineTime, Value)>>,
}

impl NodeLogic for Script {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        for (time, _) in self.values.iter() {
            ctx.schedule(*time)?;
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let now = ctx.evaluation_time();
        if let Some((_, value)) = self.values.iter().find(|(time, _)| *time == now) {
            ctx.set_output(value.clone())?;
        }
        Ok(())
    }
}

pub fn script(name: &str, values: Vec<(i64, Value)>) -> NodeBuilder {
    let values: Arc<Vec<(EngineTime, Value)>> =
        Arc::new(values.into_iter().map(|(time, value)| (t(time), value)).collect());
    let descriptor = NodeDescriptor::new(name, NodeKind::PullSource)
        .with_injectable("scheduler", Injectable::Scheduler)
        .with_output(TsShape::Scalar);
    NodeBuilder::from_logic(descriptor, move || Script {
        values: Arc::clone(&values),
    })
}

/// Dict source: `Some` sets an entry, `None` removes it.
struct DictScript {
    entries: Arc<Vec<(EngineTime, Key, Option<Value>)>>,
}

impl NodeLogic for DictScript {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        for (time, _, _) in self.entries.iter() {
            ctx.schedule(*time)?;
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let now = ctx.evaluation_time();
        for (_, key, value) in self.entries.iter().filter(|(time, _, _)| *time == now) {
            match value {
                Some(value) => ctx.dict_set(key.clone(), value.clone())?,
                None => {
                    ctx.dict_remove(key)?;
                }
            }
        }
        Ok(())
    }
}

pub fn dict_script(name: &str, entries: Vec<(i64, &str, Option<i64>)>) -> NodeBuilder {
    let entries: Arc<Vec<(EngineTime, Key, Option<Value>)>> = Arc::new(
        entries
            .into_iter()
            .map(|(time, key, value)| (t(time), Key::from(key), value.map(Value::from)))
            .collect(),
    );
    let descriptor = NodeDescriptor::new(name, NodeKind::PullSource)
        .with_injectable("scheduler", Injectable::Scheduler)
        .with_output(TsShape::dict(TsShape::Scalar));
    NodeBuilder::from_logic(descriptor, move || DictScript {
        entries: Arc::clone(&entries),
    })
}

/// Push source accepting one message per tick.
struct Feed;

impl NodeLogic for Feed {
    fn eval(&mut self, _ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn apply_message(&mut self, ctx: &mut NodeContext<'_>, message: Value) -> anyhow::Result<bool> {
        if ctx.output_modified() {
            return Ok(false);
        }
        ctx.set_output(message)?;
        Ok(true)
    }
}

pub fn feed(name: &str, recordable_id: Option<&str>) -> NodeBuilder {
    let mut descriptor = NodeDescriptor::new(name, NodeKind::PushSource).with_output(TsShape::Scalar);
    if let Some(id) = recordable_id {
        descriptor = descriptor.with_recordable_id(id);
    }
    NodeBuilder::from_logic(descriptor, || Feed)
}

// ---- compute ------------------------------------------------------------

type LiftFn = dyn Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync;

/// Compute node applying a function to its scalar inputs.
struct Lift {
    inputs: Arc<Vec<String>>,
    f: Arc<LiftFn>,
}

impl NodeLogic for Lift {
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

pub fn lift_with<F>(descriptor: NodeDescriptor, f: F) -> NodeBuilder
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
    NodeBuilder::from_logic(descriptor, move || Lift {
        inputs: Arc::clone(&inputs),
        f: Arc::clone(&f),
    })
}

pub fn lift<F>(name: &str, inputs: &[&str], f: F) -> NodeBuilder
where
    F: Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
{
    lift_with(compute_descriptor(name, inputs), f)
}

pub fn compute_descriptor(name: &str, inputs: &[&str]) -> NodeDescriptor {
    inputs
        .iter()
        .fold(NodeDescriptor::new(name, NodeKind::Compute), |d, input| {
            d.with_input(*input, TsShape::Scalar)
        })
        .with_output(TsShape::Scalar)
}

/// `x * factor` over one integer input.
pub fn scale(name: &str, factor: i64) -> NodeBuilder {
    lift(name, &["x"], move |v| Ok(int(&v[0]).map(|x| Value::from(x * factor))))
}

/// Sum of integer inputs.
pub fn sum(name: &str, inputs: &[&str]) -> NodeBuilder {
    lift(name, inputs, |v| {
        Ok(Some(Value::from(v.iter().filter_map(int).sum::<i64>())))
    })
}

// ---- sinks --------------------------------------------------------------

struct Collect {
    ticks: Ticks,
}

impl NodeLogic for Collect {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        if let Some(value) = ctx.value("ts")? {
            self.ticks.lock().push((ctx.evaluation_time(), value));
        }
        Ok(())
    }
}

pub fn collect(name: &str, ticks: &Ticks) -> NodeBuilder {
    let ticks = Arc::clone(ticks);
    let descriptor = NodeDescriptor::new(name, NodeKind::Sink).with_input("ts", TsShape::Scalar);
    NodeBuilder::from_logic(descriptor, move || Collect {
        ticks: Arc::clone(&ticks),
    })
}

// ---- templates ----------------------------------------------------------

/// Nested template `stub(x) -> scale(x)`.
pub fn scale_template(factor: i64) -> NestedGraphTemplate {
    let mut w = Wiring::new();
    let x = w.add_node(NodeBuilder::stub("x", TsShape::reference(TsShape::Scalar)));
    let out = w.add_node(scale("scale", factor));
    w.connect(x, out, "x").unwrap();
    NestedGraphTemplate::from_wiring(w, &[("x", x)], Some(out), None).unwrap()
}

pub fn engine(w: Wiring, config: EngineConfig) -> EvaluationEngine {
    EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), config)
}
