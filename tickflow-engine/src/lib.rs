//! tickflow engine
//!
//! Builds ranked graphs from node descriptors and evaluates them tick by
//! tick:
//! - Wiring and topological ranking with cycle diagnostics
//! - Runtime arenas for graphs, outputs and inputs
//! - Output/input binding and the REF protocol
//! - The evaluation engine in simulation, real-time, record and replay modes
//! - Nested graphs: map, reduce, switch, try-except, component and mesh
//! - Node error capture with activation back-traces

#![warn(missing_docs)]

mod arena;
mod backtrace;
pub mod builder;
pub mod engine;
pub mod graph;
pub mod nested;
pub mod node;
pub mod observability;
pub mod observer;
pub mod replay;
pub mod runtime;
pub mod timeseries;

pub use builder::{BuildContext, Edge, GraphBuilder, NodeRef, Wiring};
pub use engine::{EvaluationEngine, EvaluationEngineApi, Notification, PushQueue, PushSender};
pub use graph::{Graph, LifecycleState, NodeSlot};
pub use nested::{
    ComponentNode, MapNode, MeshNode, MeshRanking, NestedGraphTemplate, NestedNode, ReduceNode,
    SwitchBuilder, SwitchNode, TryExceptNode,
};
pub use node::{NodeBody, NodeBuilder, NodeContext, NodeFactory, NodeLogic};
pub use observability::{init_tracing, LogFormat, TracingConfig};
pub use observer::{GraphInfo, LifecycleObserver, LoggingObserver, NodeInfo};
pub use replay::{ReplayCursor, ReplayEntry, ReplayStore};
pub use runtime::{GraphWiring, Runtime};
pub use timeseries::TsRef;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::{BuildContext, GraphBuilder, NodeRef, Wiring};
    pub use crate::engine::{EvaluationEngine, EvaluationEngineApi, PushSender};
    pub use crate::graph::LifecycleState;
    pub use crate::nested::{
        ComponentNode, MapNode, MeshNode, NestedGraphTemplate, ReduceNode, SwitchNode,
        TryExceptNode,
    };
    pub use crate::node::{NodeBody, NodeBuilder, NodeContext, NodeLogic};
    pub use crate::replay::ReplayStore;
    pub use crate::timeseries::TsRef;
    pub use tickflow_core::prelude::*;
}
