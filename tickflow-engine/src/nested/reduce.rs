//! Reduce: a balanced tree of binary reductions over the entries of a dict.

use super::{
    evaluate_due, host_input, nested_error, reschedule_host, restart_graphs, retire_graph,
    NestedGraphTemplate, NestedNode, NestedStrategy,
};
use crate::node::{NodeBody, NodeBuilder};
use crate::runtime::Runtime;
use crate::timeseries::TsRef;
use std::collections::BTreeMap;
use std::sync::Arc;
use tickflow_core::{GraphId, Key, NodeDescriptor, NodeHandle, OutputId, Result, TsShape, Value};

#[derive(Debug)]
struct ReduceConfig {
    template: NestedGraphTemplate,
    input: String,
    zero: Value,
}

/// Host folding the entries of a dict input with a binary graph.
///
/// The template reads two inputs (left and right operand, in declaration
/// order). Entries are paired in key order and padded with the zero value
/// to a power of two, then combined level by level; the last level writes
/// the host's output. The tree is rebuilt whenever the key set changes.
/// An empty dict yields the zero value.
#[derive(Debug)]
pub struct ReduceNode {
    config: Arc<ReduceConfig>,
    zero: Option<OutputId>,
    built: bool,
    keys: Vec<Key>,
    levels: Vec<Vec<GraphId>>,
    intermediates: Vec<OutputId>,
}

impl ReduceNode {
    /// Node reducing the dict input `input` with `template`.
    pub fn builder(
        descriptor: NodeDescriptor,
        template: NestedGraphTemplate,
        input: impl Into<String>,
        zero: impl Into<Value>,
    ) -> NodeBuilder {
        let config = Arc::new(ReduceConfig {
            template,
            input: input.into(),
            zero: zero.into(),
        });
        NodeBuilder::from_fn(descriptor.with_nested_graphs(true), move |_, _| {
            Ok(NodeBody::Nested(Box::new(NestedNode::Reduce(ReduceNode {
                config: Arc::clone(&config),
                zero: None,
                built: false,
                keys: Vec::new(),
                levels: Vec::new(),
                intermediates: Vec::new(),
            }))))
        })
    }

    /// Number of levels in the current tree.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    fn operands(&self, rt: &Runtime, host: NodeHandle) -> Result<(String, String)> {
        let names: Vec<&str> = self.config.template.input_names().collect();
        match names.as_slice() {
            [lhs, rhs] => Ok((lhs.to_string(), rhs.to_string())),
            _ => Err(nested_error(
                rt,
                host,
                format!("reduce template needs two inputs, found {}", names.len()),
            )),
        }
    }

    fn teardown(&mut self, rt: &mut Runtime) -> Result<()> {
        for graph in std::mem::take(&mut self.levels).into_iter().flatten() {
            retire_graph(rt, graph)?;
        }
        let outputs = std::mem::take(&mut self.intermediates);
        if !outputs.is_empty() {
            rt.before_notifications.push(Box::new(move |rt: &mut Runtime| {
                for output in outputs {
                    rt.free_output(output);
                }
                Ok(())
            }));
        }
        Ok(())
    }

    fn build_tree(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let (lhs, rhs) = self.operands(rt, host)?;
        let zero = self
            .zero
            .ok_or_else(|| nested_error(rt, host, "reduce zero output missing"))?;
        let input = host_input(rt, host, &self.config.input)?;
        let host_output = rt.node(host)?.output;
        let shape = self
            .config
            .template
            .output_shape()
            .cloned()
            .unwrap_or(TsShape::Scalar);

        let mut operands: Vec<TsRef> = self
            .keys
            .iter()
            .map(|key| TsRef::from(rt.input_dict_child(input, key)))
            .collect();
        let width = operands.len().max(2).next_power_of_two();
        operands.resize(width, TsRef::Bound(zero));

        while operands.len() > 1 {
            let root = operands.len() == 2;
            let mut level = Vec::with_capacity(operands.len() / 2);
            let mut next = Vec::with_capacity(operands.len() / 2);
            for pair in operands.chunks(2) {
                let output = if root {
                    host_output
                } else {
                    let output = rt.create_output(&shape, Some(host), None);
                    self.intermediates.push(output);
                    Some(output)
                };
                let refs = BTreeMap::from([
                    (lhs.clone(), pair[0].clone()),
                    (rhs.clone(), pair[1].clone()),
                ]);
                level.push(self.config.template.instantiate(rt, host, &refs, output, None)?);
                next.push(TsRef::from(output));
            }
            self.levels.push(level);
            operands = next;
        }
        tracing::debug!(host = %host, keys = self.keys.len(), depth = self.levels.len(), "Reduce tree built");
        Ok(())
    }
}

impl NestedStrategy for ReduceNode {
    fn wire(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        if self.zero.is_none() {
            let zero = rt.create_output(&TsShape::Scalar, Some(host), None);
            rt.set_value(zero, self.config.zero.clone())?;
            self.zero = Some(zero);
        }
        restart_graphs(rt, self.levels.iter().flatten())
    }

    fn eval(&mut self, rt: &mut Runtime, host: NodeHandle) -> Result<()> {
        let input = host_input(rt, host, &self.config.input)?;
        let keys: Vec<Key> = rt.input_keys(input).into_iter().collect();

        if !self.built || keys != self.keys {
            self.built = true;
            self.teardown(rt)?;
            self.keys = keys;
            if self.keys.is_empty() {
                if let Some(output) = rt.node(host)?.output {
                    rt.set_value(output, self.config.zero.clone())?;
                }
            } else {
                self.build_tree(rt, host)?;
            }
        }

        for graph in self.levels.iter().flatten() {
            evaluate_due(rt, *graph)?;
        }
        reschedule_host(rt, host, self.levels.iter().flatten())
    }

    fn graphs(&self) -> Vec<GraphId> {
        self.levels.iter().flatten().copied().collect()
    }

    fn release(&mut self, rt: &mut Runtime) {
        self.levels.clear();
        for output in self.intermediates.drain(..).chain(self.zero.take()) {
            rt.free_output(output);
        }
        self.built = false;
        self.keys.clear();
    }
}
