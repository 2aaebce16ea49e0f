//! Worker loop: answers host messages for one run

use std::sync::Arc;

use cubescript_cube::CubeState;
use cubescript_protocol::{ExecutionFault, HostMessage, RunId};
use tokio::sync::mpsc;
use tokio::task::JoinError;

use crate::{CancellationToken, Delivery, EventQueue, ProtocolViolation, PullHandler, Sandbox, ScriptConfig};

/// The isolated execution context of one run
///
/// Owns the event queue and the pull handler. The script itself runs on a
/// blocking thread; this loop only moves events from the queue to the host,
/// one per `RequestNextEvent`.
pub struct Worker {
    config: ScriptConfig,
    cancellation: CancellationToken,
    queue: Arc<EventQueue>,
    pull: PullHandler,
    outbox: mpsc::UnboundedSender<Delivery>,
    started: bool,
}

impl Worker {
    pub fn new(
        config: ScriptConfig,
        cancellation: CancellationToken,
        outbox: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        let queue = Arc::new(EventQueue::new());
        Self {
            config,
            cancellation,
            pull: PullHandler::new(queue.clone()),
            queue,
            outbox,
            started: false,
        }
    }

    /// Serve host messages until the final event is delivered or the host goes away
    ///
    /// Returns an error only when the worker itself failed; the caller reports
    /// it to the host out of band.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<HostMessage>) -> Result<(), ExecutionFault> {
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    let Some(message) = message else {
                        tracing::debug!("Host closed the channel");
                        self.cancellation.cancel();
                        return Ok(());
                    };
                    self.handle_message(message);
                }
                delivered = self.pull.deliver(), if self.pull.is_outstanding() => {
                    let envelope = delivered?;
                    let terminal = envelope.event.is_terminal();
                    tracing::debug!(seq = envelope.seq, event = envelope.event.kind(), "Delivering event");
                    if self.outbox.send(Delivery::Event(envelope)).is_err() {
                        tracing::debug!("Host dropped its receiver");
                        self.cancellation.cancel();
                        return Ok(());
                    }
                    if terminal {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_message(&mut self, message: HostMessage) {
        tracing::debug!(kind = message.kind(), "Host message");
        match message {
            HostMessage::Start {
                run_id,
                initial_state,
                script,
            } => {
                if self.started {
                    tracing::warn!(%run_id, "{}", ProtocolViolation::DuplicateStart);
                } else {
                    self.started = true;
                    self.launch(run_id, initial_state, script);
                }
            }
            HostMessage::RequestNextEvent => {
                if let Err(violation) = self.pull.request() {
                    tracing::warn!(%violation, "Rejected pull request");
                }
            }
        }
    }

    /// Run the script on a blocking thread; a panic there poisons the queue
    fn launch(&self, run_id: RunId, initial_state: CubeState, script: String) {
        let sandbox = Sandbox::new(self.config.clone(), self.cancellation.clone());
        let queue = self.queue.clone();
        let handle = tokio::task::spawn_blocking(move || {
            sandbox.run(run_id, initial_state, &script, &queue)
        });

        let queue = self.queue.clone();
        tokio::spawn(async move {
            let fault = match handle.await {
                Ok(Ok(())) => return,
                Ok(Err(fault)) => fault,
                Err(e) => ExecutionFault::new(join_error_message(e)),
            };
            tracing::warn!(%run_id, %fault, "Script thread failed");
            queue.poison(fault);
        });
    }
}

/// Best-effort description of why a task ended abnormally
pub(crate) fn join_error_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                format!("panicked: {message}")
            } else if let Some(message) = payload.downcast_ref::<String>() {
                format!("panicked: {message}")
            } else {
                "panicked".to_string()
            }
        }
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cubescript_protocol::{EventEnvelope, LogLevel, WorkerEvent};

    struct Harness {
        commands: mpsc::UnboundedSender<HostMessage>,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        task: tokio::task::JoinHandle<Result<(), ExecutionFault>>,
    }

    fn start(script: &str) -> Harness {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (outbox, deliveries) = mpsc::unbounded_channel();
        let worker = Worker::new(ScriptConfig::default(), CancellationToken::new(), outbox);
        let task = tokio::spawn(worker.run(inbox));
        commands
            .send(HostMessage::Start {
                run_id: RunId::new(),
                initial_state: CubeState::solved(3).unwrap(),
                script: script.to_string(),
            })
            .unwrap();
        Harness {
            commands,
            deliveries,
            task,
        }
    }

    impl Harness {
        async fn pull(&mut self) -> EventEnvelope {
            self.commands.send(HostMessage::RequestNextEvent).unwrap();
            match self.deliveries.recv().await {
                Some(Delivery::Event(envelope)) => envelope,
                other => panic!("unexpected delivery: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn nothing_is_sent_without_a_request() {
        let mut harness = start("log('a'); log('b');");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.deliveries.try_recv().is_err());

        assert_eq!(harness.pull().await.seq, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(harness.deliveries.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivers_events_in_order_then_stops() {
        let mut harness = start("log('a'); front(); log('b');");

        let kinds: Vec<_> = [
            harness.pull().await,
            harness.pull().await,
            harness.pull().await,
            harness.pull().await,
        ]
        .iter()
        .map(|envelope| envelope.event.kind())
        .collect();
        assert_eq!(kinds, vec!["log", "state_changed", "log", "done"]);

        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn duplicate_request_is_ignored() {
        let mut harness = start("log('only');");
        harness.commands.send(HostMessage::RequestNextEvent).unwrap();
        harness.commands.send(HostMessage::RequestNextEvent).unwrap();

        match harness.deliveries.recv().await {
            Some(Delivery::Event(envelope)) => assert_eq!(
                envelope.event,
                WorkerEvent::Log {
                    level: LogLevel::Info,
                    text: "only".into()
                }
            ),
            other => panic!("unexpected delivery: {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.deliveries.try_recv().is_err());

        assert_eq!(harness.pull().await.event, WorkerEvent::Done);
    }

    #[tokio::test]
    async fn waits_for_slow_scripts() {
        let mut harness = start("const until = Date.now() + 100; while (Date.now() < until) {} log('late');");
        let envelope = harness.pull().await;
        assert_eq!(envelope.event.kind(), "log");
    }

    #[tokio::test]
    async fn closing_the_channel_stops_the_worker() {
        let harness = start("while (true) {}");
        drop(harness.commands);
        let result = tokio::time::timeout(Duration::from_secs(5), harness.task).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
