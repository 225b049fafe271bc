//! Writing outputs and propagating modifications.

use super::Runtime;
use crate::timeseries::{OutputSlot, OutputValue, RefEntry, TsRef};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use tickflow_core::{FlowError, Key, NodeHandle, OutputId, Result, TsShape, Value};

impl Runtime {
    /// Create an output of `shape`, including the children of fixed-size
    /// composites.
    pub(crate) fn create_output(
        &mut self,
        shape: &TsShape,
        owner: Option<NodeHandle>,
        parent: Option<OutputId>,
    ) -> OutputId {
        let id = self
            .outputs
            .insert(OutputSlot::new(shape.clone(), owner, parent));
        let children: Vec<OutputId> = match shape {
            TsShape::List { element, size } => (0..*size)
                .map(|_| self.create_output(element, owner, Some(id)))
                .collect(),
            TsShape::Bundle(fields) => fields
                .iter()
                .map(|(_, field)| self.create_output(field, owner, Some(id)))
                .collect(),
            _ => return id,
        };
        if let Some(slot) = self.outputs.get_mut(id) {
            match &mut slot.value {
                OutputValue::List(c) | OutputValue::Bundle(c) => *c = children,
                _ => {}
            }
        }
        id
    }

    /// Free an output and everything it owns. Subscribed inputs are detached.
    pub(crate) fn free_output(&mut self, id: OutputId) {
        let Some(slot) = self.outputs.get(id) else {
            return;
        };
        let children = slot.owned_children();
        let subscribers: Vec<_> = slot.subscribers().collect();
        for child in children {
            self.free_output(child);
        }
        for input in subscribers {
            self.detach_input(input, id);
        }
        self.outputs.remove(id);
    }

    /// Current scalar value of an output.
    pub fn output_value(&self, id: OutputId) -> Option<Value> {
        match &self.outputs.get(id)?.value {
            OutputValue::Scalar(value) => value.clone(),
            _ => None,
        }
    }

    /// Whether the output was modified in the current tick.
    pub fn output_modified(&self, id: OutputId) -> bool {
        self.outputs
            .get(id)
            .is_some_and(|slot| slot.modified_at(self.evaluation_time))
    }

    /// Whether the output holds a value.
    pub fn output_valid(&self, id: OutputId) -> bool {
        match self.outputs.get(id) {
            Some(slot) => match &slot.value {
                OutputValue::Scalar(value) => value.is_some(),
                _ => !slot.last_modified.is_never(),
            },
            None => false,
        }
    }

    /// Whether the output and every element below it hold values.
    pub fn output_all_valid(&self, id: OutputId) -> bool {
        let Some(slot) = self.outputs.get(id) else {
            return false;
        };
        match &slot.value {
            OutputValue::List(children) | OutputValue::Bundle(children) => {
                children.iter().all(|c| self.output_all_valid(*c))
            }
            OutputValue::Dict(dict) => {
                self.output_valid(id) && dict.items.values().all(|c| self.output_all_valid(*c))
            }
            _ => self.output_valid(id),
        }
    }

    /// Child `index` of a list or bundle output.
    pub fn output_child(&self, id: OutputId, index: usize) -> Result<OutputId> {
        self.output(id)?
            .child(index)
            .ok_or_else(|| FlowError::Binding {
                input: format!("{}[{}]", id, index),
                cause: "output has no such child".into(),
            })
    }

    /// Render an output as plain JSON: scalars as-is, sets and lists as
    /// arrays, bundles and dicts as objects, references as strings.
    pub fn snapshot(&self, id: OutputId) -> Option<Value> {
        self.snapshot_json(id).map(Value)
    }

    fn snapshot_json(&self, id: OutputId) -> Option<JsonValue> {
        let slot = self.outputs.get(id)?;
        match &slot.value {
            OutputValue::Scalar(value) => value.as_ref().map(|v| v.0.clone()),
            OutputValue::Set(set) => Some(JsonValue::Array(
                set.items.iter().map(|k| Value::from(k.clone()).0).collect(),
            )),
            OutputValue::List(children) => Some(JsonValue::Array(
                children
                    .iter()
                    .map(|c| self.snapshot_json(*c).unwrap_or(JsonValue::Null))
                    .collect(),
            )),
            OutputValue::Bundle(children) => {
                let TsShape::Bundle(fields) = &slot.shape else {
                    return None;
                };
                let mut object = Map::new();
                for ((name, _), child) in fields.iter().zip(children) {
                    if let Some(value) = self.snapshot_json(*child) {
                        object.insert(name.clone(), value);
                    }
                }
                Some(JsonValue::Object(object))
            }
            OutputValue::Dict(dict) => {
                let mut object = Map::new();
                for (key, child) in &dict.items {
                    if let Some(value) = self.snapshot_json(*child) {
                        object.insert(key.to_string(), value);
                    }
                }
                Some(JsonValue::Object(object))
            }
            OutputValue::Reference(reference) => Some(JsonValue::String(reference.to_string())),
        }
    }

    // ---- modification -----------------------------------------------------

    /// Stamp an output as modified now, notify its subscribers and bubble
    /// the modification to its parent. REF outputs always notify so that
    /// a re-pointed reference reaches its followers.
    pub(crate) fn mark_modified(&mut self, id: OutputId) -> Result<()> {
        let now = self.evaluation_time;
        let Some(slot) = self.outputs.get_mut(id) else {
            return Ok(());
        };
        if slot.last_modified == now && !slot.is_reference() {
            return Ok(());
        }
        slot.last_modified = now;
        let subscribers: Vec<_> = slot.subscribers().collect();
        let parent = slot.parent;
        for input in subscribers {
            match &mut self.held {
                Some(held) => held.push((input, id)),
                None => self.notify_input(input, id)?,
            }
        }
        if let Some(parent) = parent {
            self.mark_modified(parent)?;
        }
        Ok(())
    }

    fn shape_mismatch(&self, id: OutputId, expected: &str) -> FlowError {
        FlowError::ShapeMismatch {
            output: id,
            expected: expected.to_string(),
            actual: self
                .outputs
                .get(id)
                .map_or("freed", |s| s.shape.kind_name())
                .to_string(),
        }
    }

    /// Write a scalar output.
    pub fn set_value(&mut self, id: OutputId, value: Value) -> Result<()> {
        match &mut self.output_mut(id)?.value {
            OutputValue::Scalar(slot) => *slot = Some(value),
            _ => return Err(self.shape_mismatch(id, "TS")),
        }
        self.mark_modified(id)
    }

    /// Point a REF output at `reference`. Re-setting an equal reference is
    /// a no-op once the output has ticked.
    pub fn set_reference(&mut self, id: OutputId, reference: TsRef) -> Result<()> {
        let slot = self.output_mut(id)?;
        let ticked = !slot.last_modified.is_never();
        match &mut slot.value {
            OutputValue::Reference(current) => {
                if ticked && *current == reference {
                    return Ok(());
                }
                *current = reference;
            }
            _ => return Err(self.shape_mismatch(id, "REF")),
        }
        self.mark_modified(id)
    }

    // ---- sets -------------------------------------------------------------

    /// Add a member to a set output.
    pub fn set_add(&mut self, id: OutputId, key: Key) -> Result<bool> {
        let now = self.evaluation_time;
        let added = match &mut self.output_mut(id)?.value {
            OutputValue::Set(set) => {
                set.roll(now);
                if set.items.insert(key.clone()) {
                    if !set.removed.remove(&key) {
                        set.added.insert(key);
                    }
                    true
                } else {
                    false
                }
            }
            _ => return Err(self.shape_mismatch(id, "TSS")),
        };
        if added {
            self.mark_modified(id)?;
        }
        Ok(added)
    }

    /// Remove a member from a set output.
    pub fn set_remove(&mut self, id: OutputId, key: &Key) -> Result<bool> {
        let now = self.evaluation_time;
        let removed = match &mut self.output_mut(id)?.value {
            OutputValue::Set(set) => {
                set.roll(now);
                if set.items.remove(key) {
                    if !set.added.remove(key) {
                        set.removed.insert(key.clone());
                    }
                    true
                } else {
                    false
                }
            }
            _ => return Err(self.shape_mismatch(id, "TSS")),
        };
        if removed {
            self.mark_modified(id)?;
        }
        Ok(removed)
    }

    // ---- dicts ------------------------------------------------------------

    /// Entry `key` of a dict output, if present.
    pub fn dict_child(&self, id: OutputId, key: &Key) -> Option<OutputId> {
        match &self.outputs.get(id)?.value {
            OutputValue::Dict(dict) => dict.items.get(key).copied(),
            _ => None,
        }
    }

    /// Entry `key` of a dict output, created when missing. A reference
    /// already handed out for `key` is re-pointed at the new entry.
    pub fn dict_get_or_create(&mut self, id: OutputId, key: &Key) -> Result<OutputId> {
        let slot = self.output(id)?;
        let (element, owner) = match (&slot.shape, &slot.value) {
            (TsShape::Dict(element), OutputValue::Dict(dict)) => {
                if let Some(child) = dict.items.get(key) {
                    return Ok(*child);
                }
                ((**element).clone(), slot.owner)
            }
            _ => return Err(self.shape_mismatch(id, "TSD")),
        };

        let child = self.create_output(&element, owner, Some(id));
        let now = self.evaluation_time;
        let mut reference = None;
        if let OutputValue::Dict(dict) = &mut self.output_mut(id)?.value {
            dict.roll(now);
            dict.items.insert(key.clone(), child);
            if !dict.removed.remove(key) {
                dict.added.insert(key.clone());
            }
            reference = dict.refs.get(key).map(|e| e.output);
        }
        if let Some(reference) = reference {
            self.set_reference(reference, TsRef::Bound(child))?;
        }
        self.mark_modified(id)?;
        Ok(child)
    }

    /// Write the scalar entry `key` of a dict output.
    pub fn dict_set(&mut self, id: OutputId, key: Key, value: Value) -> Result<()> {
        let child = self.dict_get_or_create(id, &key)?;
        self.set_value(child, value)
    }

    /// Remove entry `key` of a dict output. The entry is freed after the
    /// tick so readers in this tick still see its last value; references
    /// to it turn empty immediately.
    pub fn dict_remove(&mut self, id: OutputId, key: &Key) -> Result<bool> {
        let now = self.evaluation_time;
        let (child, reference) = match &mut self.output_mut(id)?.value {
            OutputValue::Dict(dict) => {
                dict.roll(now);
                let Some(child) = dict.items.remove(key) else {
                    return Ok(false);
                };
                if !dict.added.remove(key) {
                    dict.removed.insert(key.clone());
                }
                (child, dict.refs.get(key).map(|e| e.output))
            }
            _ => return Err(self.shape_mismatch(id, "TSD")),
        };
        if let Some(reference) = reference {
            self.set_reference(reference, TsRef::Empty)?;
        }
        let key = key.clone();
        self.after_notifications.push(Box::new(move |rt: &mut Runtime| {
            // a rolled-back removal puts the entry back
            if rt.dict_child(id, &key) != Some(child) {
                rt.free_output(child);
            }
            Ok(())
        }));
        self.mark_modified(id)?;
        Ok(true)
    }

    // ---- references -------------------------------------------------------

    /// Take a reference to entry `key` of a dict output on behalf of
    /// `requester`. The returned REF output tracks the entry as it is
    /// created and removed, and lives until every requester released it.
    pub fn get_ref(&mut self, dict: OutputId, key: &Key, requester: NodeHandle) -> Result<OutputId> {
        let slot = self.output(dict)?;
        let (element, owner, existing) = match (&slot.shape, &slot.value) {
            (TsShape::Dict(element), OutputValue::Dict(state)) => (
                (**element).clone(),
                slot.owner,
                state.refs.get(key).map(|e| e.output),
            ),
            _ => return Err(self.shape_mismatch(dict, "TSD")),
        };

        if let Some(reference) = existing {
            if let OutputValue::Dict(state) = &mut self.output_mut(dict)?.value {
                if let Some(entry) = state.refs.get_mut(key) {
                    entry.requesters.insert(requester);
                }
            }
            return Ok(reference);
        }

        let reference = self.create_output(&TsShape::reference(element), owner, None);
        if let OutputValue::Dict(state) = &mut self.output_mut(dict)?.value {
            state.refs.insert(
                key.clone(),
                RefEntry {
                    output: reference,
                    requesters: BTreeSet::from([requester]),
                },
            );
        }
        let target = TsRef::from(self.dict_child(dict, key));
        self.set_reference(reference, target)?;
        tracing::trace!(dict = %dict, key = %key, requester = %requester, "Reference created");
        Ok(reference)
    }

    /// Release a reference taken with [`get_ref`](Self::get_ref). Returns
    /// whether this was the last requester and the reference was freed.
    ///
    /// Only the REF output goes away: the dict entry itself belongs to the
    /// dict's writer and outlives its last reference.
    pub fn release_ref(&mut self, dict: OutputId, key: &Key, requester: NodeHandle) -> Result<bool> {
        let Some(slot) = self.outputs.get_mut(dict) else {
            return Ok(false);
        };
        let freed = match &mut slot.value {
            OutputValue::Dict(state) => match state.refs.get_mut(key) {
                Some(entry) => {
                    entry.requesters.remove(&requester);
                    if entry.requesters.is_empty() {
                        state.refs.remove(key).map(|e| e.output)
                    } else {
                        None
                    }
                }
                None => None,
            },
            _ => None,
        };
        match freed {
            Some(reference) => {
                self.free_output(reference);
                tracing::trace!(dict = %dict, key = %key, "Reference released");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
