//! Per-graph schedule tables.
//!
//! Each graph keeps one requested time per ordinal. An entry is pending
//! while it is later than the node's last evaluation, so a stale entry never
//! needs clearing. A nested graph that gains an earlier request tells its
//! host, which in turn schedules itself in its own graph.

use super::Runtime;
use crate::graph::LifecycleState;
use tickflow_core::{EngineTime, FlowError, NodeHandle, Result, MIN_DT};

impl Runtime {
    /// Request an evaluation of `handle` at `when`.
    ///
    /// Requests at or before the node's last evaluation move to the next
    /// instant after it. Stopped and disposed nodes ignore requests.
    pub(crate) fn schedule_internal(&mut self, handle: NodeHandle, when: EngineTime) -> Result<()> {
        let now = self.evaluation_time;
        let Some(graph) = self.graphs.get_mut(handle.graph) else {
            return Ok(());
        };
        let Some(node) = graph.nodes.get(handle.ordinal) else {
            return Err(FlowError::UnknownNode { node: handle });
        };
        if node.state != LifecycleState::Started {
            return Ok(());
        }

        let last = node.last_evaluated;
        let when = if when <= last { last + MIN_DT } else { when };
        let current = graph.schedule[handle.ordinal];
        if current <= last || current > when {
            graph.schedule[handle.ordinal] = when;
        }
        let effective = graph.schedule[handle.ordinal];
        if effective < graph.next_scheduled {
            graph.next_scheduled = effective;
        }

        let Some(host) = graph.parent else {
            return Ok(());
        };
        let host_evaluating = self
            .graphs
            .get(host.graph)
            .is_some_and(|g| g.evaluating == Some(host.ordinal));
        if effective == now && host_evaluating {
            // the host is sweeping this graph right now
            return Ok(());
        }
        self.schedule_internal(host, effective)
    }

    /// Schedule `handle` at `when` on behalf of the node itself.
    ///
    /// Fails when `when` is in the past, or is the current time and the
    /// node's rank has already been reached in this tick.
    pub fn request_node_schedule(&mut self, handle: NodeHandle, when: EngineTime) -> Result<()> {
        let now = self.evaluation_time;
        let graph = self.graph(handle.graph)?;
        let reached = graph.evaluating.is_some_and(|e| e >= handle.ordinal);
        if when < now || (when == now && reached) {
            return Err(FlowError::ScheduleInPast {
                node: handle,
                requested: when,
                now,
            });
        }
        self.node_mut(handle)?.scheduler.insert(when);
        tracing::trace!(node = %handle, time = %when, "Node scheduled");
        self.schedule_internal(handle, when)
    }

    /// Schedule `handle` at `when` from outside the node, e.g. from a host
    /// process. Times before the current evaluation time are rejected.
    pub fn schedule_node(&mut self, handle: NodeHandle, when: EngineTime) -> Result<()> {
        let now = self.evaluation_time;
        if when < now {
            return Err(FlowError::ScheduleInPast {
                node: handle,
                requested: when,
                now,
            });
        }
        self.node(handle)?;
        self.schedule_internal(handle, when)
    }

    /// Drop scheduler requests that have been served and re-arm the next one.
    pub(crate) fn pop_scheduler(&mut self, handle: NodeHandle) -> Result<()> {
        let now = self.evaluation_time;
        let next = match self.graphs.get_mut(handle.graph).and_then(|g| g.nodes.get_mut(handle.ordinal)) {
            Some(node) => {
                node.scheduler.retain(|t| *t > now);
                node.scheduler.first().copied()
            }
            None => None,
        };
        match next {
            Some(next) => self.schedule_internal(handle, next),
            None => Ok(()),
        }
    }
}
