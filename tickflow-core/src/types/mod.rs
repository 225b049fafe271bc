//! Core types for tickflow.
//!
//! - `GraphId`, `OutputId`, `InputId`: stable arena indices
//! - `NodeHandle`: identity of a node (owning graph + ordinal)
//! - `EngineTime` / `EngineDelta`: logical time in microseconds

mod ids;
mod time;

pub use ids::{GraphId, InputId, NodeHandle, OutputId};
pub use time::{EngineDelta, EngineTime, MAX_DT, MAX_ET, MIN_DT, MIN_ST};
