//! Push sources, real-time pacing and record/replay.

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tickflow_engine::prelude::*;

const T0: EngineTime = EngineTime::from_secs(1_700_000_000);

fn after(micros: i64) -> EngineTime {
    T0 + EngineDelta::from_micros(micros)
}

fn times(ticks: &Ticks) -> Vec<EngineTime> {
    ticks.lock().iter().map(|(time, _)| *time).collect()
}

fn values(ticks: &Ticks) -> Vec<Value> {
    ticks.lock().iter().map(|(_, value)| value.clone()).collect()
}

/// `feed -> component(x * 2) -> sink`, with both feed and component recordable.
fn recorded_wiring(out: &Ticks) -> (Wiring, NodeRef) {
    let mut w = Wiring::new();
    let feed = w.add_node(feed("feed", Some("feed")));
    let descriptor = NodeDescriptor::new("doubled", NodeKind::Compute)
        .with_input("x", TsShape::Scalar)
        .with_output(TsShape::Scalar)
        .with_recordable_id("doubled");
    let doubled = w.add_node(ComponentNode::builder(descriptor, scale_template(2)));
    let sink = w.add_node(collect("sink", out));
    w.connect(feed, doubled, "x").unwrap();
    w.connect(doubled, sink, "ts").unwrap();
    (w, feed)
}

#[test]
fn simulation_delivers_queued_messages_one_tick_each() {
    let out = ticks();
    let (w, feed) = recorded_wiring(&out);
    let config = EngineConfig::default().with_start_time(t(100));
    let mut engine = engine(w, config);
    engine.initialise().unwrap();

    let sender = engine.push_sender(feed).unwrap();
    for value in [1, 2, 3] {
        sender.send(value).unwrap();
    }
    engine.run().unwrap();

    assert_eq!(
        seen(&out),
        vec![(100, Value::from(2)), (101, Value::from(4)), (102, Value::from(6))]
    );
}

#[test]
fn push_queue_rejects_when_full() {
    let out = ticks();
    let (w, feed) = recorded_wiring(&out);
    let config = EngineConfig::default().with_push_queue_capacity(2);
    let mut engine = engine(w, config);
    engine.initialise().unwrap();

    let sender = engine.push_sender(feed).unwrap();
    sender.try_send(1).unwrap();
    sender.try_send(2).unwrap();
    let err = sender.try_send(3).unwrap_err();
    assert_eq!(err.code(), "E204");

    engine.dispose().unwrap();
    assert_eq!(sender.try_send(4).unwrap_err().code(), "E205");
}

#[test]
fn real_time_waits_for_the_clock() {
    let out = ticks();
    let mut w = Wiring::new();
    let source = w.add_node(script(
        "source",
        vec![
            (after(1_000).as_micros(), Value::from(1)),
            (after(5_000).as_micros(), Value::from(2)),
        ],
    ));
    let sink = w.add_node(collect("sink", &out));
    w.connect(source, sink, "ts").unwrap();

    let clock = Arc::new(MockClock::new(T0));
    let config = EngineConfig::default()
        .with_mode(EvaluationMode::RealTime)
        .with_start_time(T0)
        .with_end_time(after(10_000))
        .with_max_wait_ms(1);
    let mut engine = engine(w, config).with_wall_clock(clock.clone());
    engine.run().unwrap();

    assert_eq!(times(&out), vec![after(1_000), after(5_000)]);
    assert_eq!(values(&out), vec![Value::from(1), Value::from(2)]);
    assert!(clock.now() > after(10_000));
}

#[test]
fn real_time_never_starts_in_the_past() {
    let out = ticks();
    let (w, feed) = recorded_wiring(&out);
    let clock = Arc::new(MockClock::new(T0));
    let config = EngineConfig::default()
        .with_mode(EvaluationMode::RealTime)
        .with_start_time(T0 - EngineDelta::from_secs(60));
    let mut engine = engine(w, config).with_wall_clock(clock);
    engine.initialise().unwrap();

    let sender = engine.push_sender(feed).unwrap();
    sender.send(5).unwrap();
    engine.runtime().push_queue().close();
    engine.run().unwrap();

    assert_eq!(seen(&out), vec![(T0.as_micros(), Value::from(10))]);
}

#[test]
fn real_time_takes_messages_from_other_threads() {
    let out = ticks();
    let (w, feed) = recorded_wiring(&out);
    let clock = Arc::new(MockClock::new(T0));
    let config = EngineConfig::default()
        .with_mode(EvaluationMode::RealTime)
        .with_start_time(T0)
        .with_max_wait_ms(1);
    let mut engine = engine(w, config).with_wall_clock(clock);
    engine.initialise().unwrap();

    let sender = engine.push_sender(feed).unwrap();
    let queue = Arc::clone(engine.runtime().push_queue());
    let producer = thread::spawn(move || {
        for value in [1, 2, 3] {
            sender.send(value).unwrap();
            thread::sleep(Duration::from_millis(3));
        }
        queue.close();
    });
    engine.run().unwrap();
    producer.join().unwrap();

    assert_eq!(values(&out), vec![Value::from(2), Value::from(4), Value::from(6)]);
    let times = times(&out);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn record_then_replay_reproduces_the_run() {
    let store = Arc::new(Mutex::new(ReplayStore::new()));

    let recorded = ticks();
    let (w, feed) = recorded_wiring(&recorded);
    let clock = Arc::new(MockClock::new(T0));
    let config = EngineConfig::default()
        .with_mode(EvaluationMode::Record)
        .with_start_time(T0)
        .with_max_wait_ms(1);
    let mut recorder = engine(w, config)
        .with_wall_clock(clock)
        .with_replay_store(Arc::clone(&store));
    recorder.initialise().unwrap();
    let sender = recorder.push_sender(feed).unwrap();
    for value in [1, 2, 3] {
        sender.send(value).unwrap();
    }
    recorder.runtime().push_queue().close();
    recorder.run().unwrap();

    assert_eq!(times(&recorded), vec![T0, after(1), after(2)]);
    {
        let store = store.lock();
        let feed_values: Vec<Value> = store
            .series("feed")
            .unwrap()
            .iter()
            .map(|entry| entry.value.clone())
            .collect();
        assert_eq!(feed_values, vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(store.series("doubled").map(<[_]>::len), Some(3));
        assert_eq!(store.series("doubled.x").map(<[_]>::len), Some(3));
    }

    let replayed = ticks();
    let (w, _) = recorded_wiring(&replayed);
    let config = EngineConfig::default()
        .with_mode(EvaluationMode::Replay)
        .with_start_time(T0);
    let mut replayer = engine(w, config).with_replay_store(Arc::clone(&store));
    replayer.run().unwrap();

    assert_eq!(*replayed.lock(), *recorded.lock());
}

#[test]
fn replay_store_survives_a_file_round_trip() {
    let mut store = ReplayStore::new();
    store.append("feed", after(0), Value::from(1)).unwrap();
    store.append("feed", after(7), Value::from("two")).unwrap();
    let err = store.append("feed", after(3), Value::from(3)).unwrap_err();
    assert_eq!(err.code(), "E601");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    store.save(&path).unwrap();
    let loaded = ReplayStore::load(&path).unwrap();
    assert_eq!(loaded, store);
    assert_eq!(loaded.entries_before("feed", after(7)).len(), 1);
}
