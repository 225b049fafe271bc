//! Push-source message queue.
//!
//! Producer threads hand messages to the evaluation loop through a bounded
//! queue. The loop drains it only at the top of a tick; nothing else in the
//! engine is shared across threads.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tickflow_core::{FlowError, NodeHandle, Result, Value};

struct QueueState {
    messages: VecDeque<(NodeHandle, Value)>,
    closed: bool,
}

/// Bounded multi-producer queue consumed by the evaluation loop.
pub struct PushQueue {
    state: Mutex<QueueState>,
    /// Signalled when a message arrives or the queue closes.
    arrived: Condvar,
    /// Signalled when the loop drains messages.
    drained: Condvar,
    capacity: usize,
}

impl PushQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                closed: false,
            }),
            arrived: Condvar::new(),
            drained: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Whether no message is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn push(&self, node: NodeHandle, value: Value, block: bool) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(FlowError::PushQueueClosed);
            }
            if state.messages.len() < self.capacity {
                break;
            }
            if !block {
                return Err(FlowError::PushQueueFull {
                    capacity: self.capacity,
                });
            }
            self.drained.wait(&mut state);
        }
        state.messages.push_back((node, value));
        self.arrived.notify_all();
        Ok(())
    }

    /// Take every queued message.
    pub fn drain(&self) -> Vec<(NodeHandle, Value)> {
        let mut state = self.state.lock();
        let messages: Vec<_> = state.messages.drain(..).collect();
        if !messages.is_empty() {
            self.drained.notify_all();
        }
        messages
    }

    /// Block until a message is queued, the queue closes or `timeout`
    /// elapses. Returns whether messages are waiting.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.messages.is_empty() && !state.closed {
            let _ = self.arrived.wait_for(&mut state, timeout);
        }
        !state.messages.is_empty()
    }

    /// Refuse further messages and wake every waiter.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.arrived.notify_all();
        self.drained.notify_all();
    }
}

/// Producer handle addressing one push node.
#[derive(Clone)]
pub struct PushSender {
    queue: Arc<PushQueue>,
    node: NodeHandle,
}

impl PushSender {
    pub(crate) fn new(queue: Arc<PushQueue>, node: NodeHandle) -> Self {
        Self { queue, node }
    }

    /// Target node.
    pub fn node(&self) -> NodeHandle {
        self.node
    }

    /// Queue a message, waiting for room if the queue is full.
    pub fn send(&self, value: impl Into<Value>) -> Result<()> {
        self.queue.push(self.node, value.into(), true)
    }

    /// Queue a message, failing if the queue is full.
    pub fn try_send(&self, value: impl Into<Value>) -> Result<()> {
        self.queue.push(self.node, value.into(), false)
    }
}

impl std::fmt::Debug for PushSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSender").field("node", &self.node).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tickflow_core::GraphId;

    fn node() -> NodeHandle {
        NodeHandle::new(GraphId::new(0), 0)
    }

    #[test]
    fn try_send_respects_capacity() {
        let queue = Arc::new(PushQueue::new(2));
        let sender = PushSender::new(Arc::clone(&queue), node());
        sender.try_send(1).unwrap();
        sender.try_send(2).unwrap();
        assert_eq!(sender.try_send(3).unwrap_err().code(), "E204");

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].1, Value::int(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn closed_queue_rejects() {
        let queue = Arc::new(PushQueue::new(4));
        let sender = PushSender::new(Arc::clone(&queue), node());
        queue.close();
        assert_eq!(sender.send(1).unwrap_err().code(), "E205");
        assert!(!queue.wait(Duration::from_millis(1)));
    }

    #[test]
    fn producer_thread_wakes_waiter() {
        let queue = Arc::new(PushQueue::new(4));
        let sender = PushSender::new(Arc::clone(&queue), node());
        let producer = thread::spawn(move || sender.send("hello"));

        let mut seen = false;
        for _ in 0..100 {
            if queue.wait(Duration::from_millis(50)) {
                seen = true;
                break;
            }
        }
        producer.join().unwrap().unwrap();
        assert!(seen);
        assert_eq!(queue.drain()[0].1, Value::from("hello"));
    }

    #[test]
    fn blocking_send_waits_for_drain() {
        let queue = Arc::new(PushQueue::new(1));
        let sender = PushSender::new(Arc::clone(&queue), node());
        sender.send(1).unwrap();

        let blocked = sender.clone();
        let producer = thread::spawn(move || blocked.send(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.drain().len(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.drain()[0].1, Value::int(2));
    }
}
