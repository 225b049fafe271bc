//! Meshes built from lookup nodes: recursive definitions over keys.

use std::collections::BTreeSet;
use std::sync::Arc;
use tickflow_engine::prelude::*;
use tickflow_engine::NestedNode;
use tickflow_nodes::prelude::*;

/// Set source: `(time, key, true)` adds a key, `false` removes it.
struct KeySet {
    changes: Arc<Vec<(EngineTime, Key, bool)>>,
}

impl NodeLogic for KeySet {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        for (time, _, _) in self.changes.iter() {
            ctx.schedule(*time)?;
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let now = ctx.evaluation_time();
        for (_, key, add) in self.changes.iter().filter(|(time, _, _)| *time == now) {
            if *add {
                ctx.set_add(key.clone())?;
            } else {
                ctx.set_remove(key)?;
            }
        }
        Ok(())
    }
}

fn key_set(changes: Vec<(i64, Key, bool)>) -> NodeBuilder {
    let changes: Arc<Vec<(EngineTime, Key, bool)>> = Arc::new(
        changes
            .into_iter()
            .map(|(time, key, add)| (EngineTime::from_micros(time), key, add))
            .collect(),
    );
    let descriptor = NodeDescriptor::new("keys", NodeKind::PullSource)
        .with_injectable("scheduler", Injectable::Scheduler)
        .with_output(TsShape::Set);
    NodeBuilder::from_logic(descriptor, move || KeySet {
        changes: Arc::clone(&changes),
    })
}

fn int(value: &Option<Value>) -> Option<i64> {
    value.as_ref().and_then(Value::as_i64)
}

/// `fib(n) = fib(n - 1) + fib(n - 2)`, each term read through a lookup.
fn fib_template() -> NestedGraphTemplate {
    let back = |step: i64| {
        move |v: &[Option<Value>]| -> anyhow::Result<Option<Value>> {
            Ok(int(&v[0]).filter(|n| *n >= 2).map(|n| Value::from(n - step)))
        }
    };

    let mut w = Wiring::new();
    let n = w.add_node(NodeBuilder::stub("n", TsShape::Scalar));
    let prev1 = w.add_node(LiftNode::builder("prev1", &["n"], back(1)));
    let prev2 = w.add_node(LiftNode::builder("prev2", &["n"], back(2)));
    let look1 = w.add_node(MeshLookupNode::builder("look1"));
    let look2 = w.add_node(MeshLookupNode::builder("look2"));
    let descriptor = NodeDescriptor::new("fib", NodeKind::Compute)
        .with_input("n", TsShape::Scalar)
        .with_input("a", TsShape::Scalar)
        .with_input("b", TsShape::Scalar)
        .with_output(TsShape::Scalar)
        .with_valid_inputs(["n"]);
    let fib = w.add_node(LiftNode::with_descriptor(descriptor, |v| {
        let Some(n) = int(&v[0]) else {
            return Ok(None);
        };
        if n < 2 {
            return Ok(Some(Value::from(n)));
        }
        Ok(int(&v[1]).zip(int(&v[2])).map(|(a, b)| Value::from(a + b)))
    }));

    w.connect(n, prev1, "n").unwrap();
    w.connect(n, prev2, "n").unwrap();
    w.connect(prev1, look1, "key").unwrap();
    w.connect(prev2, look2, "key").unwrap();
    w.connect(n, fib, "n").unwrap();
    w.connect(look1, fib, "a").unwrap();
    w.connect(look2, fib, "b").unwrap();
    NestedGraphTemplate::from_wiring(w, &[], Some(fib), Some(n)).unwrap()
}

fn mesh_descriptor() -> NodeDescriptor {
    NodeDescriptor::new("mesh", NodeKind::Compute)
        .with_input("keys", TsShape::Set)
        .with_output(TsShape::dict(TsShape::Scalar))
}

fn mesh_wiring(template: NestedGraphTemplate, changes: Vec<(i64, Key, bool)>) -> (Wiring, NodeRef) {
    let mut w = Wiring::new();
    let keys = w.add_node(key_set(changes));
    let mesh = w.add_node(MeshNode::builder(mesh_descriptor(), template, "keys", &[]));
    w.connect(keys, mesh, "keys").unwrap();
    (w, mesh)
}

fn engine(w: Wiring) -> EvaluationEngine {
    EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), EngineConfig::default())
}

fn entry(engine: &EvaluationEngine, mesh: NodeRef, key: i64) -> Option<i64> {
    let rt = engine.runtime();
    let output = engine.output_of(mesh).unwrap();
    rt.dict_child(output, &Key::from(key))
        .and_then(|child| rt.output_value(child))
        .and_then(|value| value.as_i64())
}

fn mesh_state(engine: &EvaluationEngine, mesh: NodeRef) -> &MeshNode {
    let rt = engine.runtime();
    match rt.node(engine.handle(mesh).unwrap()).unwrap().nested() {
        Some(NestedNode::Mesh(state)) => state,
        other => panic!("not a mesh host: {other:?}"),
    }
}

#[test]
fn lookups_pull_in_the_keys_they_need() {
    let (w, mesh) = mesh_wiring(fib_template(), vec![(1, Key::from(4), true)]);
    let mut engine = engine(w);
    engine.run().unwrap();

    let values: Vec<Option<i64>> = (0..=4).map(|k| entry(&engine, mesh, k)).collect();
    assert_eq!(values, vec![Some(0), Some(1), Some(1), Some(2), Some(3)]);

    let ranking = mesh_state(&engine, mesh).ranking();
    assert_eq!(ranking.len(), 5);
    for k in 0..=4 {
        let key = Key::from(k);
        let rank = ranking.rank(&key).unwrap();
        for dependency in ranking.dependencies_of(&key) {
            assert!(rank > ranking.rank(&dependency).unwrap(), "{key} must rank above {dependency}");
        }
    }
    assert_eq!(
        ranking.dependencies_of(&Key::from(4)),
        BTreeSet::from([Key::from(3), Key::from(2)])
    );
}

#[test]
fn re_ranks_take_effect_on_the_next_tick() {
    let (w, mesh) = mesh_wiring(fib_template(), vec![(1, Key::from(4), true)]);
    let mut engine = engine(w);
    engine.initialise().unwrap();
    engine.start().unwrap();

    // Tick 1: key 4 looks up 3 and 2, which are created unranked below it.
    assert!(engine.evaluate_one_tick().unwrap());
    let ranking = mesh_state(&engine, mesh).ranking();
    assert_eq!(ranking.len(), 3);
    assert!(ranking.rank(&Key::from(4)) > ranking.rank(&Key::from(3)));

    // Tick 2: 3 and 2 pull in 1 and 0 after the sweep, so nothing resolves yet.
    assert!(engine.evaluate_one_tick().unwrap());
    assert_eq!(mesh_state(&engine, mesh).ranking().len(), 5);
    assert_eq!(entry(&engine, mesh, 4), None);

    // Tick 3: with the new ranks the whole chain settles in one sweep.
    assert!(engine.evaluate_one_tick().unwrap());
    assert_eq!(entry(&engine, mesh, 4), Some(3));
    engine.stop().unwrap();
}

#[test]
fn dropping_a_key_retires_what_only_it_needed() {
    let (w, mesh) = mesh_wiring(
        fib_template(),
        vec![(1, Key::from(4), true), (10, Key::from(4), false)],
    );
    let mut engine = engine(w);
    engine.run().unwrap();

    let state = mesh_state(&engine, mesh);
    assert_eq!(state.keys().count(), 0);
    assert!(state.ranking().is_empty());
    assert_eq!(entry(&engine, mesh, 4), None);
    assert!(engine.last_tick() > EngineTime::from_micros(10));
}

/// Key "a" reads "b" and "b" reads "a".
fn ping_pong_template() -> NestedGraphTemplate {
    let mut w = Wiring::new();
    let key = w.add_node(NodeBuilder::stub("key", TsShape::Scalar));
    let other = w.add_node(LiftNode::builder("other", &["key"], |v| {
        Ok(v[0].as_ref().and_then(Value::as_str).map(|k| {
            Value::from(if k == "a" { "b" } else { "a" })
        }))
    }));
    let lookup = w.add_node(MeshLookupNode::builder("lookup"));
    let echo = w.add_node(LiftNode::builder("echo", &["x"], |v| Ok(v[0].clone())));
    w.connect(key, other, "key").unwrap();
    w.connect(other, lookup, "key").unwrap();
    w.connect(lookup, echo, "x").unwrap();
    NestedGraphTemplate::from_wiring(w, &[], Some(echo), Some(key)).unwrap()
}

#[test]
fn mutual_lookups_are_a_cycle() {
    let (w, _) = mesh_wiring(ping_pong_template(), vec![(1, Key::from("a"), true)]);
    let mut engine = engine(w);
    let err = engine.run().unwrap_err();

    assert_eq!(err.code(), "E401");
    let message = err.to_string();
    assert!(message.contains('a'));
    assert!(message.contains('b'));
}
