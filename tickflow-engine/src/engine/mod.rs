//! The evaluation engine and its clock.
//!
//! [`EvaluationEngine`] owns the runtime and the root graph and advances
//! logical time tick by tick. Each tick:
//!
//! 1. runs before-evaluation notifications (deferred disposals and the like)
//! 2. delivers push messages, or recorded entries in replay mode
//! 3. sweeps the root graph in rank order
//! 4. runs after-evaluation notifications
//! 5. records push-node outputs in record mode
//!
//! Simulation and replay jump straight to the next scheduled time.
//! Real-time and record modes wait for the wall clock to reach it, waking
//! early when a push producer queues a message.

mod api;
mod push;

pub use api::{EvaluationEngineApi, Notification};
pub use push::{PushQueue, PushSender};

use crate::builder::{GraphBuilder, NodeRef};
use crate::graph::LifecycleState;
use crate::observer::LifecycleObserver;
use crate::replay::{ReplayCursor, ReplayStore};
use crate::runtime::{GraphWiring, Runtime};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tickflow_core::{
    EngineConfig, EngineDelta, EngineTime, EvaluationMode, FlowError, GraphId, NodeHandle,
    OutputId, RealClock, Result, Value, WallClock, MAX_DT, MIN_DT,
};
use tracing::instrument;

/// Drives one root graph through its lifecycle and the tick loop.
pub struct EvaluationEngine {
    runtime: Runtime,
    builder: Arc<GraphBuilder>,
    root: Option<GraphId>,
    state: LifecycleState,
    start_time: EngineTime,
    last_tick: EngineTime,
    /// Messages declined by their node, retried next tick.
    pending: VecDeque<(NodeHandle, Value)>,
    cursors: Vec<(NodeHandle, ReplayCursor)>,
}

impl EvaluationEngine {
    /// Create an engine over `builder` using the real wall clock.
    pub fn new(builder: impl Into<Arc<GraphBuilder>>, config: EngineConfig) -> Self {
        Self {
            runtime: Runtime::new(config, Arc::new(RealClock::new())),
            builder: builder.into(),
            root: None,
            state: LifecycleState::Uninitialised,
            start_time: EngineTime::NEVER,
            last_tick: EngineTime::NEVER,
            pending: VecDeque::new(),
            cursors: Vec::new(),
        }
    }

    /// Use `clock` as the wall clock.
    pub fn with_wall_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.runtime.wall = clock;
        self
    }

    /// Register a lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.runtime.add_observer(observer);
        self
    }

    /// Share `store` for recording or replaying.
    pub fn with_replay_store(mut self, store: Arc<Mutex<ReplayStore>>) -> Self {
        self.runtime.set_replay_store(store);
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        self.runtime.config()
    }

    /// The runtime holding every graph, output and input.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Mutable access to the runtime.
    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Lifecycle state of the engine.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Time of the current (or last) tick.
    pub fn evaluation_time(&self) -> EngineTime {
        self.runtime.evaluation_time()
    }

    /// Time of the last completed tick, [`EngineTime::NEVER`] before the first.
    pub fn last_tick(&self) -> EngineTime {
        self.last_tick
    }

    /// The root graph.
    pub fn root(&self) -> Result<GraphId> {
        self.root.ok_or_else(|| self.lifecycle_error("access root"))
    }

    /// Runtime handle of a node declared in the root wiring.
    pub fn handle(&self, node: NodeRef) -> Result<NodeHandle> {
        let root = self.root()?;
        let ordinal = self.builder.ordinal_of(node).ok_or_else(|| FlowError::Binding {
            input: format!("node {}", node.index()),
            cause: "node is not part of the root wiring".into(),
        })?;
        Ok(NodeHandle::new(root, ordinal))
    }

    /// Primary output of a root node.
    pub fn output_of(&self, node: NodeRef) -> Result<OutputId> {
        let handle = self.handle(node)?;
        self.runtime.node(handle)?.output.ok_or_else(|| FlowError::Binding {
            input: self.runtime.node_path(handle),
            cause: "node declares no output".into(),
        })
    }

    /// Current scalar value of a root node's output.
    pub fn value_of(&self, node: NodeRef) -> Result<Option<Value>> {
        Ok(self.runtime.output_value(self.output_of(node)?))
    }

    /// Sender for messages addressed to push node `node`.
    pub fn push_sender(&self, node: NodeRef) -> Result<PushSender> {
        let handle = self.handle(node)?;
        if !self.runtime.node(handle)?.descriptor.is_push_source() {
            return Err(FlowError::Binding {
                input: self.runtime.node_path(handle),
                cause: "node is not a push source".into(),
            });
        }
        Ok(self.runtime.push_sender(handle))
    }

    /// Schedule root node `ordinal` at `when`.
    pub fn schedule_node(&mut self, ordinal: usize, when: EngineTime) -> Result<()> {
        let handle = NodeHandle::new(self.root()?, ordinal);
        self.runtime.schedule_node(handle, when)
    }

    /// Ask the loop to stop at the next tick boundary.
    pub fn request_stop(&mut self) {
        EvaluationEngineApi::request_stop(&mut self.runtime);
    }

    fn lifecycle_error(&self, operation: &str) -> FlowError {
        FlowError::InvalidLifecycle {
            target: "engine".into(),
            operation: operation.to_string(),
            state: self.state.as_str().to_string(),
        }
    }

    // ---- lifecycle --------------------------------------------------------

    /// Instantiate the root graph and its node instances.
    #[instrument(skip(self), fields(mode = %self.runtime.config.mode))]
    pub fn initialise(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialised {
            return Err(self.lifecycle_error("initialise"));
        }
        self.runtime.config.validate()?;
        let root = self.runtime.make_graph(
            Arc::clone(&self.builder),
            None,
            GraphWiring::default(),
            None,
            Some("root".into()),
        )?;
        self.root = Some(root);
        self.runtime.initialise_graph(root)?;
        self.state = LifecycleState::Initialised;
        tracing::info!(graph = %root, nodes = self.builder.len(), "Engine initialised");
        Ok(())
    }

    /// Start the root graph at the configured start time.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        if self.state != LifecycleState::Initialised {
            return Err(self.lifecycle_error("start"));
        }
        let root = self.root()?;
        let config = &self.runtime.config;
        // Real-time runs never start in the past.
        let start = if config.mode.is_real_time() {
            config.start_time.max(self.runtime.wall.now())
        } else {
            config.start_time
        };
        self.start_time = start;
        self.runtime.evaluation_time = start;
        self.runtime.stop_requested = false;
        if self.runtime.config.mode == EvaluationMode::Replay {
            self.open_cursors(root, start)?;
        }
        self.runtime.start_graph(root)?;
        self.state = LifecycleState::Started;
        tracing::info!(time = %start, "Engine started");
        Ok(())
    }

    fn open_cursors(&mut self, root: GraphId, start: EngineTime) -> Result<()> {
        let store = Arc::clone(self.runtime.replay_store());
        let store = store.lock();
        for ordinal in self.builder.push_nodes() {
            let Some(id) = self.builder.nodes()[ordinal].descriptor.recordable_id.as_deref() else {
                continue;
            };
            let qualified = self.runtime.config.qualify_recordable_id(id);
            let cursor = store.cursor(&qualified, start)?;
            tracing::debug!(recordable_id = %qualified, "Replay cursor opened");
            self.cursors.push((NodeHandle::new(root, ordinal), cursor));
        }
        Ok(())
    }

    /// Stop the root graph.
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> Result<()> {
        if self.state != LifecycleState::Started {
            return Err(self.lifecycle_error("stop"));
        }
        let root = self.root()?;
        self.state = LifecycleState::Stopped;
        let result = self.runtime.stop_graph(root);
        tracing::info!(last_tick = %self.last_tick, "Engine stopped");
        result
    }

    /// Release the root graph and close the push queue.
    #[instrument(skip(self))]
    pub fn dispose(&mut self) -> Result<()> {
        if self.state == LifecycleState::Disposed {
            return Ok(());
        }
        let mut result = self.runtime.run_before_notifications();
        if let Some(root) = self.root.take() {
            let disposed = self.runtime.dispose_graph(root);
            if result.is_ok() {
                result = disposed;
            }
        }
        let drained = self.runtime.run_before_notifications();
        if result.is_ok() {
            result = drained;
        }
        self.runtime.push_queue().close();
        self.pending.clear();
        self.cursors.clear();
        self.state = LifecycleState::Disposed;
        tracing::debug!(outputs = self.runtime.output_count(), "Engine disposed");
        result
    }

    /// Initialise (if needed), start, tick until done, then stop.
    ///
    /// The root graph is stopped even when a tick fails; the tick error
    /// wins over a stop error.
    pub fn run(&mut self) -> Result<()> {
        if self.state == LifecycleState::Uninitialised {
            self.initialise()?;
        }
        self.start()?;
        let mut ticks = 0u64;
        let outcome = loop {
            match self.evaluate_one_tick() {
                Ok(true) => ticks += 1,
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        tracing::info!(ticks, last_tick = %self.last_tick, "Run finished");
        let stopped = self.stop();
        outcome.and(stopped)
    }

    // ---- the tick loop ----------------------------------------------------

    /// Advance to the next tick and evaluate it. Returns `false` once the
    /// run is over: nothing left to do, the end time has passed, or a stop
    /// was requested.
    pub fn evaluate_one_tick(&mut self) -> Result<bool> {
        if self.state != LifecycleState::Started {
            return Err(self.lifecycle_error("evaluate"));
        }
        if self.runtime.stop_requested {
            return Ok(false);
        }
        let next = match self.runtime.config.mode {
            mode if mode.is_real_time() => self.next_real_time()?,
            EvaluationMode::Replay => self.next_simulation_time()?,
            _ => {
                // Messages queued before the run count as pending work.
                let arrived = self.runtime.push_queue().drain();
                self.pending.extend(arrived);
                self.next_simulation_time()?
            }
        };
        match next {
            Some(time) => {
                self.tick(time)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn root_next(&self) -> Result<EngineTime> {
        Ok(self.runtime.graph(self.root()?)?.next_scheduled)
    }

    fn earliest_allowed(&self) -> EngineTime {
        if self.last_tick.is_never() {
            self.start_time
        } else {
            self.last_tick + MIN_DT
        }
    }

    fn next_simulation_time(&self) -> Result<Option<EngineTime>> {
        let mut candidate = self.root_next()?;
        for (_, cursor) in &self.cursors {
            if let Some(time) = cursor.peek_time() {
                candidate = candidate.min(time);
            }
        }
        if !self.pending.is_empty() {
            candidate = candidate.min(self.earliest_allowed());
        }
        if candidate >= MAX_DT {
            return Ok(None);
        }
        let time = candidate.max(self.earliest_allowed());
        if time > self.runtime.config.end_time {
            return Ok(None);
        }
        Ok(Some(time))
    }

    fn next_real_time(&mut self) -> Result<Option<EngineTime>> {
        let end = self.runtime.config.end_time;
        let wait = self.runtime.config.max_wait();
        loop {
            if self.runtime.stop_requested {
                return Ok(None);
            }
            let next = self.root_next()?;
            let wall = self.runtime.wall.now();
            let earliest = self.earliest_allowed();

            if !self.pending.is_empty() || !self.runtime.push_queue().is_empty() {
                let time = next.min(wall).max(earliest);
                return Ok((time <= end).then_some(time));
            }
            if next < MAX_DT && wall >= next {
                let time = next.max(earliest);
                return Ok((time <= end).then_some(time));
            }
            if wall > end {
                return Ok(None);
            }
            if self.runtime.push_queue().is_closed() && next >= MAX_DT {
                return Ok(None);
            }

            if self.runtime.wall.is_mock() {
                // A mock clock never moves by itself: jump to the next event,
                // or give producers one wait slice and then move by it.
                if next < MAX_DT {
                    self.runtime.wall.advance_to(next);
                } else if !self.runtime.push_queue().wait(wait) {
                    self.runtime.wall.advance_to(wall + EngineDelta::from(wait));
                }
            } else {
                let until_next = if next < MAX_DT {
                    (next - wall).to_std().min(wait)
                } else {
                    wait
                };
                self.runtime.push_queue().wait(until_next);
            }
        }
    }

    #[instrument(skip(self), level = "trace")]
    fn tick(&mut self, time: EngineTime) -> Result<()> {
        let root = self.root()?;
        self.runtime.evaluation_time = time;
        self.runtime.run_before_notifications()?;
        if self.runtime.config.mode == EvaluationMode::Replay {
            self.deliver_replay(time)?;
        } else {
            self.deliver_push_messages()?;
        }
        self.runtime.evaluate_graph(root)?;
        self.runtime.run_after_notifications()?;
        if self.runtime.config.mode == EvaluationMode::Record {
            self.record(root, time)?;
        }
        self.last_tick = time;
        Ok(())
    }

    fn deliver_push_messages(&mut self) -> Result<()> {
        let arrived = self.runtime.push_queue().drain();
        self.pending.extend(arrived);
        self.offer_pending()
    }

    fn deliver_replay(&mut self, time: EngineTime) -> Result<()> {
        let dropped = self.runtime.push_queue().drain().len();
        if dropped > 0 {
            tracing::debug!(dropped, "Live push messages ignored in replay mode");
        }
        for (node, cursor) in &mut self.cursors {
            while let Some(value) = cursor.next_due(time) {
                self.pending.push_back((*node, value));
            }
        }
        self.offer_pending()
    }

    /// Offer pending messages to their nodes in arrival order. Once a node
    /// declines a message, its later messages wait behind it.
    fn offer_pending(&mut self) -> Result<()> {
        let messages = std::mem::take(&mut self.pending);
        let mut declined = BTreeSet::new();
        for (node, message) in messages {
            if declined.contains(&node) {
                self.pending.push_back((node, message));
                continue;
            }
            if !self.runtime.apply_push_message(node, message.clone())? {
                tracing::trace!(node = %node, "Push message declined; retrying next tick");
                declined.insert(node);
                self.pending.push_back((node, message));
            }
        }
        Ok(())
    }

    fn record(&mut self, root: GraphId, time: EngineTime) -> Result<()> {
        let mut entries = Vec::new();
        for ordinal in self.builder.push_nodes() {
            let Some(id) = self.builder.nodes()[ordinal].descriptor.recordable_id.as_deref() else {
                continue;
            };
            let node = self.runtime.node(NodeHandle::new(root, ordinal))?;
            let Some(output) = node.output.filter(|o| self.runtime.output_modified(*o)) else {
                continue;
            };
            if let Some(value) = self.runtime.snapshot(output) {
                entries.push((self.runtime.config.qualify_recordable_id(id), value));
            }
        }
        if entries.is_empty() {
            return Ok(());
        }
        let mut store = self.runtime.replay_store().lock();
        for (id, value) in entries {
            store.append(&id, time, value)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EvaluationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationEngine")
            .field("state", &self.state)
            .field("root", &self.root)
            .field("last_tick", &self.last_tick)
            .field("pending", &self.pending.len())
            .field("runtime", &self.runtime)
            .finish()
    }
}
