//! Time-series references.

use std::fmt;
use tickflow_core::OutputId;

/// A handle to "the output living here", carried by REF-shaped outputs.
///
/// References never own what they point at. A reference whose referent is
/// not available is [`TsRef::Empty`], never a dangling id: readers treat an
/// id that no longer resolves the same way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TsRef {
    /// Points at nothing.
    #[default]
    Empty,
    /// Points at a single output.
    Bound(OutputId),
    /// A composite assembled from per-item references (unpeered).
    Unbound(Vec<TsRef>),
}

impl TsRef {
    /// Whether this reference points at nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The referenced output, for a bound reference.
    #[must_use]
    pub fn output(&self) -> Option<OutputId> {
        match self {
            Self::Bound(output) => Some(*output),
            _ => None,
        }
    }

    /// Item references of an unbound reference.
    #[must_use]
    pub fn items(&self) -> &[TsRef] {
        match self {
            Self::Unbound(items) => items,
            _ => &[],
        }
    }
}

impl From<OutputId> for TsRef {
    fn from(output: OutputId) -> Self {
        Self::Bound(output)
    }
}

impl From<Option<OutputId>> for TsRef {
    fn from(output: Option<OutputId>) -> Self {
        output.map_or(Self::Empty, Self::Bound)
    }
}

impl fmt::Display for TsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "REF[]"),
            Self::Bound(output) => write!(f, "REF[{}]", output),
            Self::Unbound(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "REF[({})]", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let out = OutputId::new(4);
        assert_eq!(TsRef::from(out).output(), Some(out));
        assert!(TsRef::from(None).is_empty());
        assert_eq!(TsRef::default(), TsRef::Empty);
    }

    #[test]
    fn display() {
        let r = TsRef::Unbound(vec![TsRef::Bound(OutputId::new(1)), TsRef::Empty]);
        assert_eq!(r.to_string(), "REF[(REF[output_1], REF[])]");
        assert_eq!(r.items().len(), 2);
        assert!(TsRef::Empty.items().is_empty());
    }
}
