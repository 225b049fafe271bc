//! tickflow core library
//!
//! Foundational types shared by the tickflow graph engine and its node library.
//!
//! # Overview
//!
//! tickflow compiles computations over discretely ticking time-series into a
//! ranked graph of nodes and evaluates them tick by tick under a logical clock.
//! This crate holds everything that does not need the runtime itself:
//!
//! - **Types**: strongly-typed arena ids and engine time
//! - **Values**: scalar payloads and hashable dictionary keys
//! - **Descriptors**: the resolved shape of a node handed over by the wiring layer
//! - **Errors**: coded error enum plus the structured `NodeError` payload
//! - **Logging**: structured log events with graph/node correlation
//! - **Config**: engine configuration from YAML or the environment
//! - **Clock**: wall-clock providers used by real-time mode

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod node_error;
pub mod prelude;
pub mod types;
pub mod value;

pub use clock::{MockClock, RealClock, WallClock};
pub use config::{EngineConfig, EvaluationMode};
pub use descriptor::{ArgKind, ArgSpec, Injectable, NodeDescriptor, NodeKind, TsShape};
pub use error::{FlowError, Result};
pub use node_error::{BackTrace, InputTrace, NodeError};
pub use types::{
    EngineDelta, EngineTime, GraphId, InputId, NodeHandle, OutputId, MAX_DT, MAX_ET, MIN_DT, MIN_ST,
};
pub use value::{Key, Value};

#[cfg(test)]
mod tests {
    use crate::{EngineTime, MAX_DT, MAX_ET, MIN_DT, MIN_ST};

    #[test]
    fn time_bounds_are_importable_from_the_root() {
        assert!(MIN_ST < MAX_ET);
        assert_eq!(MAX_ET + MIN_DT, MAX_DT);
        assert!(EngineTime::from_micros(0) < MIN_ST);
    }
}
