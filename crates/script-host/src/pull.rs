//! Pull side of the host/worker protocol

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cubescript_protocol::{EventEnvelope, ExecutionFault};
use thiserror::Error;

use crate::{EventQueue, ProtocolViolation};

/// Why a pull produced no event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PullError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Fault(#[from] ExecutionFault),
}

/// Releases queued events to the host, exactly one per request
///
/// At most one request may be outstanding. Once a terminal event has been
/// delivered every further request is refused.
pub struct PullHandler {
    queue: Arc<EventQueue>,
    outstanding: AtomicBool,
    finished: AtomicBool,
}

impl PullHandler {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self {
            queue,
            outstanding: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Register a host request for the next event
    pub fn request(&self) -> Result<(), ProtocolViolation> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(ProtocolViolation::AfterTerminal);
        }
        if self.outstanding.swap(true, Ordering::SeqCst) {
            return Err(ProtocolViolation::DuplicateRequest);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Answer the outstanding request, waiting for an event if none is queued
    ///
    /// Cancel safe: dropping the future leaves the request outstanding and
    /// the queue untouched.
    pub async fn deliver(&self) -> Result<EventEnvelope, ExecutionFault> {
        let next = self.queue.next().await;
        self.outstanding.store(false, Ordering::SeqCst);
        match &next {
            Ok(envelope) if envelope.event.is_terminal() => {
                self.finished.store(true, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(_) => self.finished.store(true, Ordering::SeqCst),
        }
        next
    }

    /// Request and await the next event in one step
    pub async fn next_event(&self) -> Result<EventEnvelope, PullError> {
        self.request()?;
        Ok(self.deliver().await?)
    }
}
