//! Prelude for convenient imports.
//!
//! ```ignore
//! use tickflow_core::prelude::*;
//! ```

pub use crate::clock::{MockClock, RealClock, WallClock};
pub use crate::config::{EngineConfig, EvaluationMode};
pub use crate::descriptor::{ArgKind, ArgSpec, Injectable, NodeDescriptor, NodeKind, TsShape};
pub use crate::error::{FlowError, Result};
pub use crate::logging::{
    BufferedCollector, EventScope, LogCategory, LogCollector, LogEvent, LogLevel,
};
pub use crate::node_error::{BackTrace, InputTrace, NodeError};
pub use crate::types::{
    EngineDelta, EngineTime, GraphId, InputId, NodeHandle, OutputId, MAX_DT, MAX_ET, MIN_DT,
    MIN_ST,
};
pub use crate::value::{Key, Value};
