//! Queryable record of engine lifecycle events.
//!
//! `tracing` carries the live log stream. The engine's logging observer
//! also turns graph starts, ticks and node failures into [`LogEvent`]s,
//! each tied to a graph or node and the evaluation time, and hands them to
//! a [`LogCollector`]. [`BufferedCollector`] keeps the recent ones.

mod collector;
mod event;

pub use collector::{BufferedCollector, LogCollector};
pub use event::{EventScope, LogCategory, LogEvent, LogLevel};
