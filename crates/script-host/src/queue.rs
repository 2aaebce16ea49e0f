//! Ordered queue of pending worker events

use std::collections::VecDeque;
use std::sync::Mutex;

use cubescript_protocol::{EventEnvelope, ExecutionFault, WorkerEvent};
use thiserror::Error;
use tokio::sync::Notify;

use crate::MutexExt;

/// The queue no longer accepts events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Event queue is sealed")]
pub struct QueueSealed;

#[derive(Default)]
struct QueueInner {
    events: VecDeque<EventEnvelope>,
    next_seq: u64,
    sealed: bool,
    fault: Option<ExecutionFault>,
}

/// FIFO of events produced by a script, with a single waiter
///
/// Producers call [`EventQueue::enqueue`] from the sandbox thread; the pull
/// handler awaits [`EventQueue::next`]. A terminal event seals the queue, after
/// which every later enqueue is refused.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and wake the waiter, if any. Returns its sequence number.
    pub fn enqueue(&self, event: WorkerEvent) -> Result<u64, QueueSealed> {
        let seq = {
            let mut inner = self.inner.lock_or_recover();
            if inner.sealed {
                return Err(QueueSealed);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            if event.is_terminal() {
                inner.sealed = true;
            }
            inner.events.push_back(EventEnvelope::new(seq, event));
            seq
        };
        self.available.notify_one();
        Ok(seq)
    }

    /// Refuse all further events without appending a terminal one
    pub fn seal(&self) {
        self.inner.lock_or_recover().sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.lock_or_recover().sealed
    }

    /// Record that the worker died. Delivered after the already queued events.
    pub fn poison(&self, fault: ExecutionFault) {
        {
            let mut inner = self.inner.lock_or_recover();
            inner.sealed = true;
            inner.fault.get_or_insert(fault);
        }
        self.available.notify_one();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock_or_recover().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the oldest event without waiting
    pub fn try_next(&self) -> Option<Result<EventEnvelope, ExecutionFault>> {
        let mut inner = self.inner.lock_or_recover();
        match inner.events.pop_front() {
            Some(envelope) => Some(Ok(envelope)),
            None => inner.fault.clone().map(Err),
        }
    }

    /// Pop the oldest event, waiting until one is enqueued
    ///
    /// Cancel safe: an event is only removed from the queue when this
    /// future completes.
    pub async fn next(&self) -> Result<EventEnvelope, ExecutionFault> {
        loop {
            let available = self.available.notified();
            if let Some(next) = self.try_next() {
                return next;
            }
            available.await;
        }
    }
}
