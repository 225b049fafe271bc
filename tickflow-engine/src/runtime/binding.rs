//! Binding inputs to outputs.
//!
//! A non-REF input bound to a REF output does not read the REF output
//! itself: it follows the reference (and any reference it points to) down
//! to a concrete target and re-binds whenever a link in that chain ticks.

use super::Runtime;
use crate::graph::LifecycleState;
use crate::timeseries::{Binding, InputSlot, OutputValue, TsRef};
use std::collections::BTreeSet;
use tickflow_core::{FlowError, InputId, Key, NodeHandle, OutputId, Result, TsShape, Value};

impl Runtime {
    /// Create an input tree for `shape`. Lists and bundles get one child
    /// input per element.
    pub(crate) fn create_input(
        &mut self,
        owner: NodeHandle,
        name: &str,
        shape: &TsShape,
        parent: Option<InputId>,
        active: bool,
    ) -> InputId {
        let id = self
            .inputs
            .insert(InputSlot::new(owner, name, shape.clone(), parent, active));
        let children: Vec<InputId> = match shape {
            TsShape::List { element, size } => (0..*size)
                .map(|i| self.create_input(owner, &format!("{}[{}]", name, i), element, Some(id), active))
                .collect(),
            TsShape::Bundle(fields) => fields
                .iter()
                .map(|(field, s)| self.create_input(owner, &format!("{}.{}", name, field), s, Some(id), active))
                .collect(),
            _ => return id,
        };
        if let Some(slot) = self.inputs.get_mut(id) {
            slot.children = children;
        }
        id
    }

    /// Unbind and release an input tree.
    pub(crate) fn free_input(&mut self, id: InputId) {
        self.unbind_input(id);
        let children = self
            .inputs
            .get(id)
            .map(|s| s.children.clone())
            .unwrap_or_default();
        for child in children {
            self.free_input(child);
        }
        self.inputs.remove(id);
    }

    fn subscribe(&mut self, input: InputId, output: OutputId) {
        if let Some(slot) = self.outputs.get_mut(output) {
            slot.subscribers.insert(input);
        }
    }

    fn unsubscribe(&mut self, input: InputId, output: OutputId) {
        if let Some(slot) = self.outputs.get_mut(output) {
            slot.subscribers.remove(&input);
        }
    }

    fn set_binding(&mut self, input: InputId, binding: Binding) {
        for output in binding.subscriptions() {
            self.subscribe(input, output);
        }
        if let Some(slot) = self.inputs.get_mut(input) {
            slot.binding = binding;
        }
    }

    /// Clear an input's binding, and those of its children.
    pub(crate) fn unbind_input(&mut self, input: InputId) {
        let Some(slot) = self.inputs.get_mut(input) else {
            return;
        };
        let previous = std::mem::take(&mut slot.binding);
        let children = slot.children.clone();
        for output in previous.subscriptions() {
            self.unsubscribe(input, output);
        }
        for child in children {
            self.unbind_input(child);
        }
    }

    /// Drop every link from `input` to the output being freed.
    pub(crate) fn detach_input(&mut self, input: InputId, output: OutputId) {
        let Some(slot) = self.inputs.get(input) else {
            return;
        };
        let linked = match &slot.binding {
            Binding::Peer(o) => *o == output,
            Binding::Reference { chain, target } => {
                chain.contains(&output) || *target == Some(output)
            }
            _ => false,
        };
        if linked {
            tracing::trace!(input = %input, output = %output, "Input detached from freed output");
            self.unbind_input(input);
        }
    }

    fn owner_started(&self, input: InputId) -> bool {
        self.inputs
            .get(input)
            .and_then(|slot| self.node(slot.owner).ok())
            .is_some_and(|node| node.state == LifecycleState::Started)
    }

    fn sample(&mut self, input: InputId) {
        let now = self.evaluation_time;
        let Some(slot) = self.inputs.get_mut(input) else {
            return;
        };
        slot.sample_time = now;
        let children = slot.children.clone();
        for child in children {
            self.sample(child);
        }
    }

    /// Bind `input` to `output`.
    ///
    /// - REF input, REF output: peer.
    /// - REF input, plain output: the input's value is a reference to the output.
    /// - plain input, REF output: follow the reference.
    /// - otherwise: peer, with list/bundle children shadowing the output's children.
    pub fn bind_input(&mut self, input: InputId, output: OutputId) -> Result<()> {
        self.unbind_input(input);
        let input_is_ref = self.input(input)?.shape.is_reference();
        let output_is_ref = self.output(output)?.is_reference();

        match (input_is_ref, output_is_ref) {
            (true, true) => self.set_binding(input, Binding::Peer(output)),
            (true, false) => self.set_binding(input, Binding::Wrapped(output)),
            (false, true) => self.follow_reference(input, output),
            (false, false) => {
                self.set_binding(input, Binding::Peer(output));
                self.shadow_children(input, output);
            }
        }

        if self.owner_started(input) {
            self.sample(input);
            self.schedule_owner(input)?;
        }
        Ok(())
    }

    /// Bind the children of a composite input one by one, e.g. from an
    /// unbound reference.
    pub(crate) fn bind_input_unpeered(&mut self, input: InputId) {
        if let Some(slot) = self.inputs.get_mut(input) {
            if matches!(slot.binding, Binding::Unbound) {
                slot.binding = Binding::Unpeered;
            }
        }
    }

    /// Bind an input from a reference value.
    pub(crate) fn bind_from_ref(&mut self, input: InputId, reference: &TsRef) -> Result<()> {
        match reference {
            TsRef::Empty => {
                self.unbind_input(input);
                Ok(())
            }
            TsRef::Bound(output) if self.outputs.contains(*output) => self.bind_input(input, *output),
            TsRef::Bound(_) => {
                self.unbind_input(input);
                Ok(())
            }
            TsRef::Unbound(items) => {
                self.unbind_input(input);
                self.bind_input_unpeered(input);
                let children = self.input(input)?.children.clone();
                for (child, item) in children.into_iter().zip(items) {
                    self.bind_from_ref(child, item)?;
                }
                Ok(())
            }
        }
    }

    fn shadow_children(&mut self, input: InputId, output: OutputId) {
        let children = self
            .inputs
            .get(input)
            .map(|s| s.children.clone())
            .unwrap_or_default();
        for (index, child) in children.into_iter().enumerate() {
            match self.outputs.get(output).and_then(|o| o.child(index)) {
                Some(target) => {
                    self.set_binding(child, Binding::Shadow(target));
                    self.shadow_children(child, target);
                }
                None => self.unbind_input(child),
            }
        }
    }

    /// Resolve the reference chain starting at `head` and bind `input` to
    /// its end. A chain that loops back on itself resolves to nothing.
    fn follow_reference(&mut self, input: InputId, head: OutputId) {
        let mut chain = vec![head];
        let mut current = self.ref_of(head);
        let mut unbound_items = None;
        let target = loop {
            match current {
                TsRef::Bound(next) if self.outputs.get(next).is_some_and(|o| o.is_reference()) => {
                    if chain.contains(&next) {
                        tracing::warn!(input = %input, output = %next, "Reference chain loops; treating as empty");
                        break None;
                    }
                    chain.push(next);
                    current = self.ref_of(next);
                }
                TsRef::Bound(next) if self.outputs.contains(next) => break Some(next),
                TsRef::Bound(_) | TsRef::Empty => break None,
                TsRef::Unbound(items) => {
                    unbound_items = Some(items);
                    break None;
                }
            }
        };

        self.set_binding(input, Binding::Reference { chain, target });
        if let Some(target) = target {
            self.shadow_children(input, target);
        }
        if let Some(items) = unbound_items {
            let children = self
                .inputs
                .get(input)
                .map(|s| s.children.clone())
                .unwrap_or_default();
            for (child, item) in children.into_iter().zip(&items) {
                if let Err(err) = self.bind_from_ref(child, item) {
                    tracing::warn!(input = %child, error = %err, "Failed to bind reference item");
                }
            }
        }
    }

    fn ref_of(&self, output: OutputId) -> TsRef {
        self.outputs
            .get(output)
            .and_then(|o| o.reference().cloned())
            .unwrap_or_default()
    }

    fn rebind_reference(&mut self, input: InputId) {
        let head = match self.inputs.get(input).map(|s| &s.binding) {
            Some(Binding::Reference { chain, .. }) => chain.first().copied(),
            _ => None,
        };
        if let Some(head) = head {
            self.unbind_input(input);
            if self.outputs.contains(head) {
                self.follow_reference(input, head);
            }
        }
    }

    /// React to `source` ticking for a subscribed input.
    pub(crate) fn notify_input(&mut self, input: InputId, source: OutputId) -> Result<()> {
        let Some(slot) = self.inputs.get(input) else {
            return Ok(());
        };
        if slot.binding.follows(source) {
            self.rebind_reference(input);
            self.sample(input);
        }
        self.schedule_owner(input)
    }

    fn schedule_owner(&mut self, input: InputId) -> Result<()> {
        let Some(slot) = self.inputs.get(input) else {
            return Ok(());
        };
        if slot.active {
            let owner = slot.owner;
            self.schedule_internal(owner, self.evaluation_time)?;
        }
        Ok(())
    }

    /// Make an input (and its children) active or passive.
    pub fn set_input_active(&mut self, input: InputId, active: bool) -> Result<()> {
        let slot = self.inputs.get_mut(input).ok_or_else(|| FlowError::Binding {
            input: input.to_string(),
            cause: "input has been released".into(),
        })?;
        slot.active = active;
        let children = slot.children.clone();
        for child in children {
            self.set_input_active(child, active)?;
        }
        Ok(())
    }

    // ---- reads ------------------------------------------------------------

    /// Output an input currently reads from.
    pub fn input_output(&self, input: InputId) -> Option<OutputId> {
        self.inputs
            .get(input)?
            .binding
            .output()
            .filter(|o| self.outputs.contains(*o))
    }

    fn is_unpeered(&self, slot: &InputSlot) -> bool {
        !slot.children.is_empty() && slot.binding.output().is_none() && slot.binding.is_bound()
    }

    /// Scalar value read by an input.
    pub fn input_value(&self, input: InputId) -> Option<Value> {
        let slot = self.inputs.get(input)?;
        if slot.shape.is_reference() {
            return None;
        }
        self.output_value(self.input_output(input)?)
    }

    /// Whether an input ticked (or was re-bound) this evaluation.
    pub fn input_modified(&self, input: InputId) -> bool {
        let Some(slot) = self.inputs.get(input) else {
            return false;
        };
        if slot.sample_time == self.evaluation_time {
            return true;
        }
        if self.is_unpeered(slot) {
            return slot.children.iter().any(|c| self.input_modified(*c));
        }
        self.input_output(input)
            .is_some_and(|o| self.output_modified(o))
    }

    /// Whether an input holds a value.
    pub fn input_valid(&self, input: InputId) -> bool {
        let Some(slot) = self.inputs.get(input) else {
            return false;
        };
        if self.is_unpeered(slot) {
            return slot.children.iter().any(|c| self.input_valid(*c));
        }
        match &slot.binding {
            Binding::Wrapped(o) => self.outputs.contains(*o),
            binding => binding
                .output()
                .is_some_and(|o| self.output_valid(o)),
        }
    }

    /// Whether an input and every element below it hold values.
    pub fn input_all_valid(&self, input: InputId) -> bool {
        let Some(slot) = self.inputs.get(input) else {
            return false;
        };
        if self.is_unpeered(slot) {
            return slot.children.iter().all(|c| self.input_all_valid(*c));
        }
        match &slot.binding {
            Binding::Wrapped(o) => self.outputs.contains(*o),
            binding => binding
                .output()
                .is_some_and(|o| self.output_all_valid(o)),
        }
    }

    /// Reference describing what an input observes.
    ///
    /// A REF input yields the reference it carries; any other input yields
    /// a reference to the output it reads, or to the head of the reference
    /// chain it follows so that re-pointing stays visible downstream.
    pub fn input_ref(&self, input: InputId) -> TsRef {
        let Some(slot) = self.inputs.get(input) else {
            return TsRef::Empty;
        };
        let live = |o: &OutputId| self.outputs.contains(*o);
        match &slot.binding {
            Binding::Unbound => TsRef::Empty,
            Binding::Peer(o) => match self.outputs.get(*o) {
                Some(output) if output.is_reference() => self.ref_of(*o),
                Some(_) => TsRef::Bound(*o),
                None => TsRef::Empty,
            },
            Binding::Shadow(o) | Binding::Wrapped(o) if live(o) => TsRef::Bound(*o),
            Binding::Shadow(_) | Binding::Wrapped(_) => TsRef::Empty,
            Binding::Reference { chain, .. } => chain
                .first()
                .filter(|o| live(o))
                .map_or(TsRef::Empty, |o| TsRef::Bound(*o)),
            Binding::Unpeered => {
                TsRef::Unbound(slot.children.iter().map(|c| self.input_ref(*c)).collect())
            }
        }
    }

    /// Keys of the set or dict an input reads.
    pub fn input_keys(&self, input: InputId) -> BTreeSet<Key> {
        let Some(output) = self.input_output(input).and_then(|o| self.outputs.get(o)) else {
            return BTreeSet::new();
        };
        match &output.value {
            OutputValue::Set(set) => set.items.clone(),
            OutputValue::Dict(dict) => dict.items.keys().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Entry `key` of the dict an input reads.
    pub fn input_dict_child(&self, input: InputId, key: &Key) -> Option<OutputId> {
        self.dict_child(self.input_output(input)?, key)
    }

    /// Dict keys whose entry ticked this evaluation.
    pub fn input_modified_keys(&self, input: InputId) -> Vec<Key> {
        let Some(output) = self.input_output(input).and_then(|o| self.outputs.get(o)) else {
            return Vec::new();
        };
        match &output.value {
            OutputValue::Dict(dict) => dict
                .items
                .iter()
                .filter(|(_, child)| self.output_modified(**child))
                .map(|(key, _)| key.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Keys added this evaluation to the set or dict an input reads.
    pub fn input_added_keys(&self, input: InputId) -> Vec<Key> {
        let now = self.evaluation_time;
        match self.input_output(input).and_then(|o| self.outputs.get(o)).map(|o| &o.value) {
            Some(OutputValue::Set(set)) => set.added(now),
            Some(OutputValue::Dict(dict)) => dict.added(now),
            _ => Vec::new(),
        }
    }

    /// Keys removed this evaluation from the set or dict an input reads.
    pub fn input_removed_keys(&self, input: InputId) -> Vec<Key> {
        let now = self.evaluation_time;
        match self.input_output(input).and_then(|o| self.outputs.get(o)).map(|o| &o.value) {
            Some(OutputValue::Set(set)) => set.removed(now),
            Some(OutputValue::Dict(dict)) => dict.removed(now),
            _ => Vec::new(),
        }
    }

    /// Render the value an input reads, for diagnostics and recording.
    pub fn input_snapshot(&self, input: InputId) -> Option<Value> {
        let slot = self.inputs.get(input)?;
        if self.is_unpeered(slot) {
            let items: Vec<_> = slot
                .children
                .iter()
                .map(|c| self.input_snapshot(*c).map_or(serde_json::Value::Null, |v| v.0))
                .collect();
            return Some(Value(serde_json::Value::Array(items)));
        }
        if slot.shape.is_reference() {
            return Some(Value::string(self.input_ref(input).to_string()));
        }
        self.snapshot(self.input_output(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tickflow_core::{EngineConfig, EngineTime, GraphId, RealClock};

    fn runtime() -> Runtime {
        let mut rt = Runtime::new(EngineConfig::default(), Arc::new(RealClock::new()));
        rt.evaluation_time = EngineTime::from_micros(100);
        rt
    }

    fn owner() -> NodeHandle {
        NodeHandle::new(GraphId::new(0), 0)
    }

    #[test]
    fn peer_binding_reads_output() {
        let mut rt = runtime();
        let output = rt.create_output(&TsShape::Scalar, None, None);
        let input = rt.create_input(owner(), "x", &TsShape::Scalar, None, true);
        rt.bind_input(input, output).unwrap();

        assert!(!rt.input_valid(input));
        rt.set_value(output, Value::int(3)).unwrap();
        assert_eq!(rt.input_value(input), Some(Value::int(3)));
        assert!(rt.input_modified(input));
        assert_eq!(rt.input_ref(input), TsRef::Bound(output));
    }

    #[test]
    fn plain_input_follows_reference_chain() {
        let mut rt = runtime();
        let a = rt.create_output(&TsShape::Scalar, None, None);
        let b = rt.create_output(&TsShape::Scalar, None, None);
        let inner = rt.create_output(&TsShape::reference(TsShape::Scalar), None, None);
        let outer = rt.create_output(&TsShape::reference(TsShape::Scalar), None, None);
        rt.set_value(a, Value::int(1)).unwrap();
        rt.set_value(b, Value::int(2)).unwrap();
        rt.set_reference(inner, TsRef::Bound(a)).unwrap();
        rt.set_reference(outer, TsRef::Bound(inner)).unwrap();

        let input = rt.create_input(owner(), "x", &TsShape::Scalar, None, true);
        rt.bind_input(input, outer).unwrap();
        assert_eq!(rt.input_output(input), Some(a));
        assert_eq!(rt.input_value(input), Some(Value::int(1)));

        rt.evaluation_time = EngineTime::from_micros(101);
        rt.set_reference(inner, TsRef::Bound(b)).unwrap();
        assert_eq!(rt.input_value(input), Some(Value::int(2)));
        assert!(rt.input_modified(input));
        assert_eq!(rt.input_ref(input), TsRef::Bound(outer));
    }

    #[test]
    fn empty_reference_leaves_input_invalid() {
        let mut rt = runtime();
        let reference = rt.create_output(&TsShape::reference(TsShape::Scalar), None, None);
        rt.set_reference(reference, TsRef::Empty).unwrap();
        let input = rt.create_input(owner(), "x", &TsShape::Scalar, None, true);
        rt.bind_input(input, reference).unwrap();
        assert_eq!(rt.input_output(input), None);
        assert!(!rt.input_valid(input));
    }

    #[test]
    fn looping_reference_chain_resolves_to_nothing() {
        let mut rt = runtime();
        let a = rt.create_output(&TsShape::reference(TsShape::Scalar), None, None);
        let b = rt.create_output(&TsShape::reference(TsShape::Scalar), None, None);
        rt.set_reference(a, TsRef::Bound(b)).unwrap();
        rt.set_reference(b, TsRef::Bound(a)).unwrap();
        let input = rt.create_input(owner(), "x", &TsShape::Scalar, None, true);
        rt.bind_input(input, a).unwrap();
        assert_eq!(rt.input_output(input), None);
    }

    #[test]
    fn ref_input_wraps_plain_output() {
        let mut rt = runtime();
        let output = rt.create_output(&TsShape::Scalar, None, None);
        let input = rt.create_input(owner(), "r", &TsShape::reference(TsShape::Scalar), None, true);
        rt.bind_input(input, output).unwrap();
        assert_eq!(rt.input_ref(input), TsRef::Bound(output));
        assert!(rt.input_valid(input));
        assert!(rt.output(output).unwrap().subscribers().next().is_none());
    }

    #[test]
    fn unbound_reference_binds_children_individually() {
        let mut rt = runtime();
        let a = rt.create_output(&TsShape::Scalar, None, None);
        let b = rt.create_output(&TsShape::Scalar, None, None);
        rt.set_value(b, Value::int(9)).unwrap();
        let reference = rt.create_output(&TsShape::reference(TsShape::list(TsShape::Scalar, 2)), None, None);
        rt.set_reference(reference, TsRef::Unbound(vec![TsRef::Bound(a), TsRef::Bound(b)]))
            .unwrap();

        let input = rt.create_input(owner(), "xs", &TsShape::list(TsShape::Scalar, 2), None, true);
        rt.bind_input(input, reference).unwrap();
        let children = rt.input(input).unwrap().children().to_vec();
        assert_eq!(rt.input_output(children[0]), Some(a));
        assert_eq!(rt.input_value(children[1]), Some(Value::int(9)));
        assert!(rt.input_valid(input));
        assert!(!rt.input_all_valid(input));
    }

    #[test]
    fn freeing_an_output_unbinds_subscribers() {
        let mut rt = runtime();
        let output = rt.create_output(&TsShape::Scalar, None, None);
        let input = rt.create_input(owner(), "x", &TsShape::Scalar, None, true);
        rt.bind_input(input, output).unwrap();
        rt.free_output(output);
        assert_eq!(rt.input(input).unwrap().binding(), &Binding::Unbound);
        assert_eq!(rt.input_ref(input), TsRef::Empty);
    }

    #[test]
    fn composite_peer_shadows_children() {
        let mut rt = runtime();
        let shape = TsShape::bundle([("a", TsShape::Scalar), ("b", TsShape::Scalar)]);
        let output = rt.create_output(&shape, None, None);
        let input = rt.create_input(owner(), "x", &shape, None, true);
        rt.bind_input(input, output).unwrap();

        let b_out = rt.output_child(output, 1).unwrap();
        rt.set_value(b_out, Value::from("hi")).unwrap();
        let b_in = rt.input(input).unwrap().children()[1];
        assert_eq!(rt.input_value(b_in), Some(Value::from("hi")));
        assert_eq!(rt.input(b_in).unwrap().name(), "x.b");
        assert!(rt.input_modified(input));
    }
}
