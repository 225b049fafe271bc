//! Undoing the output writes of a node that failed.
//!
//! While a node with an error output evaluates, modifications of outputs
//! are held back instead of reaching subscribers. When the node succeeds
//! the held notices are delivered in order. When it fails, its primary
//! output (with everything below it and the parents its writes bubbled
//! into) is put back as it was, and the notices about it are dropped.

use super::Runtime;
use crate::timeseries::OutputValue;
use std::collections::BTreeSet;
use tickflow_core::{EngineTime, NodeHandle, OutputId, Result};

struct SavedSlot {
    id: OutputId,
    value: OutputValue,
    last_modified: EngineTime,
}

/// A node's primary output as it was before the node evaluated.
pub(crate) struct OutputCheckpoint {
    root: OutputId,
    slots: Vec<SavedSlot>,
}

impl Runtime {
    /// `root` and every output it owns, depth first.
    fn output_tree(&self, root: OutputId) -> Vec<OutputId> {
        let mut tree = Vec::new();
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if let Some(slot) = self.outputs.get(id) {
                tree.push(id);
                pending.extend(slot.owned_children());
            }
        }
        tree
    }

    /// Save the primary output of `node` and start holding notices.
    /// Returns `None` for nodes without an output, or when notices are
    /// already held.
    pub(crate) fn checkpoint_output(&mut self, node: NodeHandle) -> Result<Option<OutputCheckpoint>> {
        match self.node(node)?.output {
            Some(root) if self.held.is_none() => Ok(Some(self.checkpoint_tree(root))),
            _ => Ok(None),
        }
    }

    fn checkpoint_tree(&mut self, root: OutputId) -> OutputCheckpoint {
        let mut ids = self.output_tree(root);
        let mut parent = self.outputs.get(root).and_then(|slot| slot.parent);
        while let Some(id) = parent {
            ids.push(id);
            parent = self.outputs.get(id).and_then(|slot| slot.parent);
        }
        let slots = ids
            .into_iter()
            .filter_map(|id| {
                self.outputs.get(id).map(|slot| SavedSlot {
                    id,
                    value: slot.value.clone(),
                    last_modified: slot.last_modified,
                })
            })
            .collect();
        self.held = Some(Vec::new());
        OutputCheckpoint { root, slots }
    }

    /// Keep the writes and deliver the held notices.
    pub(crate) fn commit_output(&mut self, _checkpoint: OutputCheckpoint) -> Result<()> {
        for (input, source) in self.held.take().unwrap_or_default() {
            self.notify_input(input, source)?;
        }
        Ok(())
    }

    /// Put the saved output back. Entries created since the checkpoint are
    /// freed; held notices about the restored outputs are dropped and the
    /// rest delivered.
    pub(crate) fn rollback_output(&mut self, checkpoint: OutputCheckpoint) -> Result<()> {
        let notices = self.held.take().unwrap_or_default();
        let saved: BTreeSet<OutputId> = checkpoint.slots.iter().map(|slot| slot.id).collect();
        let current = self.output_tree(checkpoint.root);
        let mut touched = saved.clone();
        touched.extend(current.iter().copied());

        for id in current.into_iter().filter(|id| !saved.contains(id)) {
            self.free_output(id);
        }
        let restored = checkpoint.slots.len();
        for saved in checkpoint.slots {
            if let Some(slot) = self.outputs.get_mut(saved.id) {
                slot.value = saved.value;
                slot.last_modified = saved.last_modified;
            }
        }

        let mut dropped = 0usize;
        for (input, source) in notices {
            if touched.contains(&source) || !self.outputs.contains(source) {
                dropped += 1;
                continue;
            }
            self.notify_input(input, source)?;
        }
        tracing::debug!(output = %checkpoint.root, restored, dropped, "Output rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tickflow_core::{EngineConfig, Key, RealClock, TsShape, Value};

    fn runtime() -> Runtime {
        let mut rt = Runtime::new(EngineConfig::default(), Arc::new(RealClock::new()));
        rt.evaluation_time = EngineTime::from_micros(10);
        rt
    }

    #[test]
    fn failed_dict_writes_are_undone() {
        let mut rt = runtime();
        let dict = rt.create_output(&TsShape::dict(TsShape::Scalar), None, None);
        rt.dict_set(dict, Key::from("a"), Value::from(1)).unwrap();
        rt.evaluation_time = EngineTime::from_micros(11);

        let checkpoint = rt.checkpoint_tree(dict);
        rt.dict_set(dict, Key::from("a"), Value::from(2)).unwrap();
        rt.dict_set(dict, Key::from("b"), Value::from(3)).unwrap();
        let b = rt.dict_child(dict, &Key::from("b")).unwrap();
        assert!(rt.output_modified(dict));

        rt.rollback_output(checkpoint).unwrap();
        let a = rt.dict_child(dict, &Key::from("a")).unwrap();
        assert_eq!(rt.output_value(a), Some(Value::from(1)));
        assert_eq!(rt.dict_child(dict, &Key::from("b")), None);
        assert!(!rt.outputs.contains(b));
        assert!(!rt.output_modified(dict));
        assert!(rt.held.is_none());
    }

    #[test]
    fn removal_undone_keeps_the_entry_alive() {
        let mut rt = runtime();
        let dict = rt.create_output(&TsShape::dict(TsShape::Scalar), None, None);
        rt.dict_set(dict, Key::from("a"), Value::from(1)).unwrap();
        let a = rt.dict_child(dict, &Key::from("a")).unwrap();
        rt.run_after_notifications().unwrap();
        rt.evaluation_time = EngineTime::from_micros(11);

        let checkpoint = rt.checkpoint_tree(dict);
        assert!(rt.dict_remove(dict, &Key::from("a")).unwrap());
        rt.rollback_output(checkpoint).unwrap();
        rt.run_after_notifications().unwrap();

        assert_eq!(rt.dict_child(dict, &Key::from("a")), Some(a));
        assert_eq!(rt.output_value(a), Some(Value::from(1)));
    }
}
