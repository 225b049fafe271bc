//! Event sinks.

use super::event::{LogCategory, LogEvent};
use crate::types::{GraphId, NodeHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Receives engine events as they happen.
pub trait LogCollector: Send + Sync {
    /// Accept one event.
    fn collect(&self, event: LogEvent);
}

#[derive(Debug, Default)]
struct Ring {
    events: VecDeque<LogEvent>,
    next_seq: u64,
    evicted: u64,
}

/// Keeps the last `capacity` events of a run for inspection.
///
/// Events are numbered from 1 in arrival order; the oldest is evicted once
/// the buffer is full.
#[derive(Debug)]
pub struct BufferedCollector {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl BufferedCollector {
    /// Empty collector holding at most `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::default()),
            capacity: capacity.max(1),
        }
    }

    fn matching(&self, keep: impl Fn(&LogEvent) -> bool) -> Vec<LogEvent> {
        self.ring
            .lock()
            .events
            .iter()
            .filter(|event| keep(event))
            .cloned()
            .collect()
    }

    /// Every buffered event, oldest first.
    pub fn events(&self) -> Vec<LogEvent> {
        self.matching(|_| true)
    }

    /// Events of one category.
    pub fn by_category(&self, category: LogCategory) -> Vec<LogEvent> {
        self.matching(|event| event.category == category)
    }

    /// Events about `graph` or any of its nodes.
    pub fn by_graph(&self, graph: GraphId) -> Vec<LogEvent> {
        self.matching(|event| event.scope.graph() == graph)
    }

    /// Events about one node.
    pub fn by_node(&self, node: NodeHandle) -> Vec<LogEvent> {
        self.matching(|event| event.scope.node() == Some(node))
    }

    /// Number of events pushed out by newer ones.
    pub fn evicted(&self) -> u64 {
        self.ring.lock().evicted
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.ring.lock().events.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogCollector for BufferedCollector {
    fn collect(&self, mut event: LogEvent) {
        let mut ring = self.ring.lock();
        ring.next_seq += 1;
        event.seq = ring.next_seq;
        if ring.events.len() == self.capacity {
            ring.events.pop_front();
            ring.evicted += 1;
        }
        ring.events.push_back(event);
    }
}
