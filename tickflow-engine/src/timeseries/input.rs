//! Input slots.
//!
//! An input observes at most one output and never owns it. Composite
//! inputs always carry child inputs so that they can be bound either as a
//! whole (peered) or item by item (unpeered).

use std::collections::BTreeSet;
use tickflow_core::{EngineTime, InputId, NodeHandle, OutputId, TsShape};

/// How an input is attached to the output graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Binding {
    /// Not attached.
    #[default]
    Unbound,
    /// Bound to an output of the same kind and subscribed to it.
    Peer(OutputId),
    /// Child of a peered composite; follows the parent's child output
    /// without its own subscription.
    Shadow(OutputId),
    /// REF input bound to a non-REF output. Not subscribed: the reference
    /// only changes when the input is rebound.
    Wrapped(OutputId),
    /// Non-REF input bound through one or more REF outputs.
    ///
    /// `chain` lists every REF output followed, outermost first; the input
    /// is subscribed to all of them plus `target`.
    Reference {
        /// REF outputs followed to reach the target.
        chain: Vec<OutputId>,
        /// The resolved output, `None` for an empty or item-wise reference.
        target: Option<OutputId>,
    },
    /// Children are bound individually.
    Unpeered,
}

impl Binding {
    /// The output whose value this input reads.
    #[must_use]
    pub fn output(&self) -> Option<OutputId> {
        match self {
            Self::Peer(o) | Self::Shadow(o) | Self::Wrapped(o) => Some(*o),
            Self::Reference { target, .. } => *target,
            Self::Unbound | Self::Unpeered => None,
        }
    }

    /// Outputs this input is subscribed to.
    pub(crate) fn subscriptions(&self) -> BTreeSet<OutputId> {
        match self {
            Self::Peer(o) => BTreeSet::from([*o]),
            Self::Reference { chain, target } => {
                chain.iter().copied().chain(target.iter().copied()).collect()
            }
            _ => BTreeSet::new(),
        }
    }

    /// Whether `output` is one of the REF outputs followed by this input.
    pub(crate) fn follows(&self, output: OutputId) -> bool {
        matches!(self, Self::Reference { chain, .. } if chain.contains(&output))
    }

    /// Whether the binding is attached at all.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !matches!(self, Self::Unbound)
    }
}

/// A time-series input in the runtime arena.
#[derive(Debug)]
pub struct InputSlot {
    pub(crate) owner: NodeHandle,
    pub(crate) name: String,
    pub(crate) shape: TsShape,
    pub(crate) parent: Option<InputId>,
    pub(crate) children: Vec<InputId>,
    pub(crate) binding: Binding,
    pub(crate) active: bool,
    pub(crate) sample_time: EngineTime,
}

impl InputSlot {
    pub(crate) fn new(
        owner: NodeHandle,
        name: impl Into<String>,
        shape: TsShape,
        parent: Option<InputId>,
        active: bool,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            shape,
            parent,
            children: Vec::new(),
            binding: Binding::Unbound,
            active,
            sample_time: EngineTime::NEVER,
        }
    }

    /// Node that owns this input.
    pub fn owner(&self) -> NodeHandle {
        self.owner
    }

    /// Argument name, with the child index appended for children.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared shape.
    pub fn shape(&self) -> &TsShape {
        &self.shape
    }

    /// Current binding.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Whether modifications schedule the owner.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Child inputs of a composite.
    pub fn children(&self) -> &[InputId] {
        &self.children
    }

    /// Enclosing composite input.
    pub fn parent(&self) -> Option<InputId> {
        self.parent
    }

    /// Last time the binding changed.
    pub fn sample_time(&self) -> EngineTime {
        self.sample_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_accessors() {
        let a = OutputId::new(1);
        let b = OutputId::new(2);
        let binding = Binding::Reference {
            chain: vec![a],
            target: Some(b),
        };
        assert_eq!(binding.output(), Some(b));
        assert!(binding.follows(a));
        assert!(!binding.follows(b));
        assert_eq!(binding.subscriptions(), BTreeSet::from([a, b]));

        assert!(Binding::Wrapped(a).subscriptions().is_empty());
        assert!(!Binding::Unbound.is_bound());
        assert_eq!(Binding::Unpeered.output(), None);
    }
}
