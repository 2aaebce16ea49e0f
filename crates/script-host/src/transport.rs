//! Transport layer between the host and a worker
//!
//! Two in-memory channels: host messages one way, deliveries the other. A
//! delivery is either a protocol event or the out-of-band fault raised when
//! the worker dies.

use cubescript_protocol::{EventEnvelope, ExecutionFault, HostMessage};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::worker::join_error_message;
use crate::{CancellationToken, ScriptConfig, Worker};

/// Something the host receives from a worker
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(EventEnvelope),
    /// The worker died; no further deliveries follow
    Fault(ExecutionFault),
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Channel disconnected")]
    Disconnected,
}

/// Host-side handle for sending to and terminating a worker
#[derive(Debug, Clone)]
pub struct WorkerLink {
    commands: mpsc::UnboundedSender<HostMessage>,
    cancellation: CancellationToken,
    worker: AbortHandle,
}

impl WorkerLink {
    pub fn send(&self, message: HostMessage) -> Result<(), TransportError> {
        self.commands
            .send(message)
            .map_err(|_| TransportError::Disconnected)
    }

    pub fn request_next_event(&self) -> Result<(), TransportError> {
        self.send(HostMessage::RequestNextEvent)
    }

    /// Kill the worker immediately; queued and in-flight events are dropped
    pub fn terminate(&self) {
        self.cancellation.cancel();
        self.worker.abort();
    }
}

/// Host-side receiving end
#[derive(Debug)]
pub struct Deliveries {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Deliveries {
    /// Next delivery, `None` once the worker is gone and everything was read
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// Spawn a worker on the current tokio runtime
///
/// A supervisor task watches the worker and turns an error or panic into a
/// [`Delivery::Fault`]. Termination through [`WorkerLink::terminate`] is
/// not a fault.
pub fn spawn_worker(config: ScriptConfig) -> (WorkerLink, Deliveries) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    let cancellation = CancellationToken::new();

    let worker = Worker::new(config, cancellation.clone(), delivery_tx.clone());
    let task = tokio::spawn(worker.run(command_rx));
    let link = WorkerLink {
        commands: command_tx,
        cancellation: cancellation.clone(),
        worker: task.abort_handle(),
    };

    tokio::spawn(async move {
        let fault = match task.await {
            Ok(Ok(())) => return,
            Ok(Err(fault)) => fault,
            Err(e) if e.is_cancelled() => return,
            Err(e) => ExecutionFault::new(join_error_message(e)),
        };
        cancellation.cancel();
        tracing::warn!(%fault, "Worker crashed");
        let _ = delivery_tx.send(Delivery::Fault(fault));
    });

    (link, Deliveries { rx: delivery_rx })
}
