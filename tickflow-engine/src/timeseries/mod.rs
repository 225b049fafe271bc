//! Time-series outputs, inputs and references.
//!
//! These are plain data held in the runtime arenas. All behaviour that
//! spans more than one slot (binding, modification, reference counting)
//! lives on [`Runtime`](crate::Runtime).

mod input;
mod output;
mod reference;

pub use input::{Binding, InputSlot};
pub use output::{DictState, OutputSlot, OutputValue, RefEntry, SetState};
pub use reference::TsRef;
