//! The REF protocol: references to dict entries that come and go.

mod common;

use common::*;
use std::sync::Arc;
use tickflow_engine::prelude::*;
use tickflow_engine::timeseries::OutputValue;

/// Holds a reference to one dict entry from start to stop.
struct Watch {
    key: Key,
    released: Ticks,
}

impl NodeLogic for Watch {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let reference = ctx.get_ref("dict", &self.key)?;
        ctx.set_reference(TsRef::Bound(reference))?;
        Ok(())
    }

    fn eval(&mut self, _ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let freed = ctx.release_ref("dict", &self.key)?;
        self.released
            .lock()
            .push((ctx.evaluation_time(), Value::from(freed)));
        Ok(())
    }
}

fn watch(name: &str, key: &str, released: &Ticks) -> NodeBuilder {
    let key = Key::from(key);
    let released = Arc::clone(released);
    let descriptor = NodeDescriptor::new(name, NodeKind::Compute)
        .with_passive_input("dict", TsShape::dict(TsShape::Scalar))
        .with_output(TsShape::reference(TsShape::Scalar));
    NodeBuilder::from_logic(descriptor, move || Watch {
        key: key.clone(),
        released: Arc::clone(&released),
    })
}

fn outstanding_refs(engine: &EvaluationEngine, dict: NodeRef) -> usize {
    let rt = engine.runtime();
    let output = engine.output_of(dict).unwrap();
    match rt.output(output).unwrap().value() {
        OutputValue::Dict(state) => state.refs().len(),
        other => panic!("not a dict: {other:?}"),
    }
}

#[test]
fn reference_follows_entry_through_its_lifetime() {
    let out = ticks();
    let released = ticks();
    let mut w = Wiring::new();
    let dict = w.add_node(dict_script(
        "dict",
        vec![
            (1, "a", Some(1)),
            (2, "b", Some(2)),
            (3, "b", Some(3)),
            (4, "b", None),
            (5, "a", Some(5)),
        ],
    ));
    let r = w.add_node(watch("watch", "b", &released));
    let sink = w.add_node(collect("sink", &out));
    w.connect(dict, r, "dict").unwrap();
    w.connect(r, sink, "ts").unwrap();

    let mut engine = engine(w, EngineConfig::default());
    engine.initialise().unwrap();
    engine.start().unwrap();
    assert_eq!(outstanding_refs(&engine, dict), 1);

    while engine.evaluate_one_tick().unwrap() {}

    // Entry "b" exists from 2 to 4; nothing else reaches the sink.
    assert_eq!(seen(&out), vec![(2, Value::from(2)), (3, Value::from(3))]);

    engine.stop().unwrap();
    assert_eq!(outstanding_refs(&engine, dict), 0);
    assert_eq!(seen(&released), vec![(5, Value::from(true))]);
    engine.dispose().unwrap();
}

#[test]
fn reference_is_shared_until_last_release() {
    let released = ticks();
    let mut w = Wiring::new();
    let dict = w.add_node(dict_script("dict", vec![(1, "k", Some(1))]));
    let first = w.add_node(watch("first", "k", &released));
    let second = w.add_node(watch("second", "k", &released));
    w.connect(dict, first, "dict").unwrap();
    w.connect(dict, second, "dict").unwrap();

    let mut engine = engine(w, EngineConfig::default());
    engine.initialise().unwrap();
    engine.start().unwrap();
    assert_eq!(outstanding_refs(&engine, dict), 1);
    assert_ne!(engine.output_of(first).unwrap(), engine.output_of(second).unwrap());

    while engine.evaluate_one_tick().unwrap() {}
    engine.stop().unwrap();

    let mut frees: Vec<bool> = seen(&released)
        .into_iter()
        .filter_map(|(_, freed)| freed.as_bool())
        .collect();
    frees.sort();
    assert_eq!(frees, vec![false, true]);
    assert_eq!(outstanding_refs(&engine, dict), 0);
}
