//! Data nodes.
//!
//! - [`ConstNode`] - Fixed value, ticked once after an optional delay
//! - [`LiftNode`] - Function over the current values of scalar inputs
//! - [`GetItemNode`] - Reference to a single dict entry

mod constant;
mod get_item;
mod lift;

pub use constant::ConstNode;
pub use get_item::GetItemNode;
pub use lift::LiftNode;
