//! Component: a single embedded graph, optionally recorded.

use super::{
    evaluate_due, host_input, nested_error, reschedule_host, restart_graphs, NestedGraphTemplate,
    NestedNode, NestedStrategy,
};
use crate::node::{NodeBody, NodeBuilder};
use crate::replay::ReplayEntry;
use crate::runtime::Runtime;
use crate::timeseries::TsRef;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tickflow_core::{
    ArgKind, EngineTime, EvaluationMode, GraphId, NodeDescriptor, NodeHandle, OutputId, Result,
    TsShape,
};

/// Host of one graph that reads the host's inputs and writes its output.
///
/// With a `recordable_id` on the host descriptor, record mode appends the
/// output under that id and each input under `<id>.<input>`. When the
/// component first starts, the inputs recorded before the start time are
/// fed back through the graph at their original times, so its nodes
/// rebuild their state before live evaluation begins.
#[derive(Debug)]
pub struct ComponentNode {
    template: Arc<NestedGraphTemplate>,
    graph: Option<GraphId>,
    recovered: bool,
}

/// Recorded ticks of one host input.
struct InputHistory {
    name: String,
    entries: Vec<ReplayEntry>,
    next: usize,
    feed: OutputId,
}

impl InputHistory {
    fn peek_time(&self) -> Option<EngineTime> {
        self.entries.get(self.next).map(|entry| entry.time)
    }
}

fn input_series(id: &str, input: &str) -> String {
    format!("{}.{}", id, input)
}

impl ComponentNode {
    /// Node embedding `template`.
    pub fn builder(descriptor: NodeDescriptor, template: NestedGraphTemplate) -> NodeBuilder {
        let template = Arc::new(template);
        NodeBuilder::from_fn(descriptor.with_nested_graphs(true), move |_, _| {
            Ok(NodeBody::Nested(Box::new(NestedNode::Component(ComponentNode {
                template: Arc::clone(&template),
                graph: None,
                recovered: false,
            }))))
        })
    }

    fn recordable_id(rt: &Runtime, host: NodeHandle) -> Result<Option<String>> {
        let node = rt.node(host)?;
        Ok(node
            .descriptor
            .recordable_id
            .as_deref()
            .map(|id| rt.config.qualify_recordable_id(id)))
    }

    /// Load the inputs recorded before now. Only scalar inputs can be fed
    /// back, so any other recorded input is an error.
    fn load_history(&self, rt: &mut Runtime, host: NodeHandle, id: &str) -> Result<Vec<InputHistory>> {
        let now = rt.evaluation_time;
        let recorded: Vec<(String, Vec<ReplayEntry>)> = {
            let store = rt.replay.lock();
            self.template
                .input_names()
                .map(|name| (name.to_string(), store.entries_before(&input_series(id, name), now).to_vec()))
                .filter(|(_, entries)| !entries.is_empty())
                .collect()
        };

        let descriptor = Arc::clone(&rt.node(host)?.descriptor);
        for (name, _) in &recorded {
            let scalar = descriptor
                .args
                .iter()
                .find(|arg| arg.name == *name)
                .is_some_and(|arg| matches!(arg.kind, ArgKind::TimeSeries(TsShape::Scalar)));
            if !scalar {
                return Err(nested_error(
                    rt,
                    host,
                    format!("cannot recover recorded input '{}': only scalar inputs replay", name),
                ));
            }
        }

        Ok(recorded
            .into_iter()
            .map(|(name, entries)| InputHistory {
                name,
                entries,
                next: 0,
                feed: rt.create_output(&TsShape::Scalar, Some(host), None),
            })
            .collect())
    }

    /// Feed the recorded inputs into `graph` at their original times,
    /// together with any times the graph schedules for itself in between.
    /// Returns the number of instants evaluated.
    fn replay(rt: &mut Runtime, graph: GraphId, history: &mut [InputHistory], now: EngineTime) -> Result<usize> {
        let mut last: Option<EngineTime> = None;
        let mut instants = 0;
        loop {
            let recorded = history.iter().filter_map(InputHistory::peek_time).min();
            let scheduled = Some(rt.graph(graph)?.next_scheduled)
                .filter(|time| last.map_or(true, |last| *time > last));
            let time = match (recorded, scheduled) {
                (Some(a), Some(b)) => a.min(b),
                (a, b) => match a.or(b) {
                    Some(time) => time,
                    None => return Ok(instants),
                },
            };
            if time >= now {
                return Ok(instants);
            }

            rt.evaluation_time = time;
            for input in history.iter_mut() {
                if let Some(entry) = input.entries.get(input.next).filter(|e| e.time == time) {
                    rt.set_value(input.feed, entry.value.clone())?;
                    input.next += 1;
                }
            }
            evaluate_due(rt, graph)?;
            last = Some(time);
            instants += 1;
        }
    }

    fn recover(&mut self, rt: &mut Runtime, host: NodeHandle, graph: GraphId) -> Result<()> {
        self.recovered = true;
        let Some(id) = Self::recordable_id(rt, host)? else {
            return Ok(());
        };
        let mut history = self.load_history(rt, host, &id)?;
        if history.is_empty() {
            return Ok(());
        }

        let now = rt.evaluation_time;
        let mut refs = self.template.host_refs(rt, host, &BTreeSet::new(), None)?;
        let feeds: BTreeMap<String, TsRef> = history
            .iter()
            .map(|input| (input.name.clone(), TsRef::Bound(input.feed)))
            .collect();
        let live = refs.clone();
        refs.extend(feeds);

        // The host counts as evaluating so historical requests stay inside
        // the nested graph instead of reaching the host's schedule.
        let previous = rt.graph_mut(host.graph)?.evaluating.replace(host.ordinal);
        let replayed = match self.template.sync_inputs(rt, graph, &refs) {
            Ok(()) => Self::replay(rt, graph, &mut history, now),
            Err(err) => Err(err),
        };
        rt.evaluation_time = now;
        if let Ok(g) = rt.graph_mut(host.graph) {
            g.evaluating = previous;
        }

        let resynced = self.template.sync_inputs(rt, graph, &live);
        for input in &history {
            rt.free_output(input.feed);
        }
        let instants = replayed?;
        resynced?;
        tracing::info!(host = %host, recordable_id = %id, instants, "Component recovered");
        reschedule_host(rt, host, [&graph])
    }

    fn record(&self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        if rt.config.mode != EvaluationMode::Record {
            return Ok(());
        }
        let Some(id) = Self::recordable_id(rt, host)? else {
            return Ok(());
        };
        let mut entries = Vec::new();
        for name in self.template.input_names() {
            let input = host_input(rt, host, name)?;
            if rt.input_modified(input) {
                if let Some(value) = rt.input_snapshot(input) {
                    entries.push((input_series(&id, name), value));
                }
            }
        }
        if let Some(output) = rt.node(host)?.output.filter(|o| rt.output_modified(*o)) {
            if let Some(value) = rt.snapshot(output) {
                entries.push((id, value));
            }
        }

        let now = rt.evaluation_time;
        let mut store = rt.replay.lock();
        for (series, value) in entries {
            store.append(&series, now, value)?;
        }
        Ok(())
    }
}

impl NestedStrategy for ComponentNode {
    fn wire(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        if let Some(graph) = &self.graph {
            return restart_graphs(rt, [graph]);
        }
        let output = rt.node(host)?.output;
        let refs = self.template.host_refs(rt, host, &BTreeSet::new(), None)?;
        let graph = self.template.instantiate(rt, host, &refs, output, None)?;
        self.graph = Some(graph);
        if !self.recovered {
            self.recover(rt, host, graph)?;
        }
        Ok(())
    }

    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let Some(graph) = self.graph else {
            return Ok(());
        };
        let refs = self.template.host_refs(rt, host, &BTreeSet::new(), None)?;
        self.template.sync_inputs(rt, graph, &refs)?;
        evaluate_due(rt, graph)?;
        self.record(rt, host)?;
        reschedule_host(rt, host, [&graph])
    }

    fn graphs(&self) -> Vec<GraphId> {
        self.graph.into_iter().collect()
    }

    fn release(&mut self, _rt: &mut Runtime) {
        self.graph = None;
    }
}
