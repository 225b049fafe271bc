//! Output slots.
//!
//! An output is owned by exactly one producer (a node, a host node or a
//! dictionary). Composite outputs hold their children by id; the children
//! point back through `parent` so a child modification bubbles up.

use super::reference::TsRef;
use std::collections::{BTreeMap, BTreeSet};
use tickflow_core::{EngineTime, InputId, Key, NodeHandle, OutputId, TsShape, Value};

/// Per-tick set delta.
#[derive(Debug, Clone)]
pub struct SetState {
    pub(crate) items: BTreeSet<Key>,
    pub(crate) added: BTreeSet<Key>,
    pub(crate) removed: BTreeSet<Key>,
    pub(crate) delta_time: EngineTime,
}

impl Default for SetState {
    fn default() -> Self {
        Self {
            items: BTreeSet::new(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            delta_time: EngineTime::NEVER,
        }
    }
}

impl SetState {
    pub(crate) fn roll(&mut self, now: EngineTime) {
        if self.delta_time != now {
            self.added.clear();
            self.removed.clear();
            self.delta_time = now;
        }
    }

    /// Current members.
    pub fn items(&self) -> &BTreeSet<Key> {
        &self.items
    }

    /// Keys added at `now`.
    pub fn added(&self, now: EngineTime) -> Vec<Key> {
        if self.delta_time == now {
            self.added.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// Keys removed at `now`.
    pub fn removed(&self, now: EngineTime) -> Vec<Key> {
        if self.delta_time == now {
            self.removed.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }
}

/// A reference handed out by [`get_ref`](crate::Runtime::get_ref), with the
/// nodes still holding it.
#[derive(Debug, Clone)]
pub struct RefEntry {
    pub(crate) output: OutputId,
    pub(crate) requesters: BTreeSet<NodeHandle>,
}

impl RefEntry {
    /// The REF output handed to requesters.
    pub fn output(&self) -> OutputId {
        self.output
    }

    /// Nodes holding the reference.
    pub fn requesters(&self) -> &BTreeSet<NodeHandle> {
        &self.requesters
    }
}

/// Keyed children plus reference bookkeeping.
#[derive(Debug, Clone)]
pub struct DictState {
    pub(crate) items: BTreeMap<Key, OutputId>,
    pub(crate) added: BTreeSet<Key>,
    pub(crate) removed: BTreeSet<Key>,
    pub(crate) delta_time: EngineTime,
    pub(crate) refs: BTreeMap<Key, RefEntry>,
}

impl Default for DictState {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            delta_time: EngineTime::NEVER,
            refs: BTreeMap::new(),
        }
    }
}

impl DictState {
    pub(crate) fn roll(&mut self, now: EngineTime) {
        if self.delta_time != now {
            self.added.clear();
            self.removed.clear();
            self.delta_time = now;
        }
    }

    /// Live children by key.
    pub fn items(&self) -> &BTreeMap<Key, OutputId> {
        &self.items
    }

    /// Keys added at `now`.
    pub fn added(&self, now: EngineTime) -> Vec<Key> {
        if self.delta_time == now {
            self.added.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// Keys removed at `now`.
    pub fn removed(&self, now: EngineTime) -> Vec<Key> {
        if self.delta_time == now {
            self.removed.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// Outstanding references by key.
    pub fn refs(&self) -> &BTreeMap<Key, RefEntry> {
        &self.refs
    }
}

/// Current payload of an output.
#[derive(Debug, Clone)]
pub enum OutputValue {
    /// Single value, `None` until first set.
    Scalar(Option<Value>),
    /// Key set.
    Set(SetState),
    /// Fixed-size list of children.
    List(Vec<OutputId>),
    /// Named fields, in declaration order.
    Bundle(Vec<OutputId>),
    /// Dynamically keyed children.
    Dict(DictState),
    /// Reference to another output.
    Reference(TsRef),
}

impl OutputValue {
    /// Empty payload for a freshly created output of `shape`.
    ///
    /// Children of lists and bundles are filled in by the runtime.
    pub(crate) fn empty(shape: &TsShape) -> Self {
        match shape {
            TsShape::Scalar => Self::Scalar(None),
            TsShape::Set => Self::Set(SetState::default()),
            TsShape::List { .. } => Self::List(Vec::new()),
            TsShape::Bundle(_) => Self::Bundle(Vec::new()),
            TsShape::Dict(_) => Self::Dict(DictState::default()),
            TsShape::Reference(_) => Self::Reference(TsRef::Empty),
        }
    }
}

/// A time-series output in the runtime arena.
#[derive(Debug)]
pub struct OutputSlot {
    pub(crate) shape: TsShape,
    pub(crate) owner: Option<NodeHandle>,
    pub(crate) parent: Option<OutputId>,
    pub(crate) value: OutputValue,
    pub(crate) last_modified: EngineTime,
    pub(crate) subscribers: BTreeSet<InputId>,
}

impl OutputSlot {
    pub(crate) fn new(shape: TsShape, owner: Option<NodeHandle>, parent: Option<OutputId>) -> Self {
        let value = OutputValue::empty(&shape);
        Self {
            shape,
            owner,
            parent,
            value,
            last_modified: EngineTime::NEVER,
            subscribers: BTreeSet::new(),
        }
    }

    /// Declared shape.
    pub fn shape(&self) -> &TsShape {
        &self.shape
    }

    /// Producing node, if any.
    pub fn owner(&self) -> Option<NodeHandle> {
        self.owner
    }

    /// Enclosing composite output.
    pub fn parent(&self) -> Option<OutputId> {
        self.parent
    }

    /// Current payload.
    pub fn value(&self) -> &OutputValue {
        &self.value
    }

    /// Time of the last modification, [`EngineTime::NEVER`] if none.
    pub fn last_modified(&self) -> EngineTime {
        self.last_modified
    }

    /// Whether the output ticked at `now`.
    pub fn modified_at(&self, now: EngineTime) -> bool {
        self.last_modified == now
    }

    /// Inputs notified when this output ticks.
    pub fn subscribers(&self) -> impl Iterator<Item = InputId> + '_ {
        self.subscribers.iter().copied()
    }

    /// Whether this output carries a reference.
    pub fn is_reference(&self) -> bool {
        matches!(self.value, OutputValue::Reference(_))
    }

    /// The reference value, for REF outputs.
    pub fn reference(&self) -> Option<&TsRef> {
        match &self.value {
            OutputValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Owned children: list and bundle elements, dict items and handed-out
    /// dict references.
    pub(crate) fn owned_children(&self) -> Vec<OutputId> {
        match &self.value {
            OutputValue::List(children) | OutputValue::Bundle(children) => children.clone(),
            OutputValue::Dict(dict) => dict
                .items
                .values()
                .copied()
                .chain(dict.refs.values().map(|e| e.output))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Positional child of a list or bundle.
    pub fn child(&self, index: usize) -> Option<OutputId> {
        match &self.value {
            OutputValue::List(children) | OutputValue::Bundle(children) => {
                children.get(index).copied()
            }
            _ => None,
        }
    }
}
