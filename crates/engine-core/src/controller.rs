//! Run controller - host side of one script execution

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cubescript_cube::{Cube, CubeMove, CubeState};
use cubescript_protocol::{
    EventEnvelope, ExecutionFault, HostMessage, RunFailure, RunId, RunState, StateTransition,
    WorkerEvent,
};
use cubescript_script_host::{
    spawn_worker, Deliveries, Delivery, MutexExt, ScriptConfig, WorkerLink,
};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::{DisplayNotice, ListenerId, ListenerRegistry, Presenter, RunnerError};

struct Lifecycle {
    state: RunState,
    failure: Option<RunFailure>,
}

/// State shared between the controller and its driver task
struct Shared {
    run_id: RunId,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<RunState>,
    cube: Mutex<Cube>,
    listeners: ListenerRegistry,
    presenter: Arc<dyn Presenter>,
}

/// What the driver does after handling one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Ask for the next event right away
    Pull,
    /// Wait out the pacing delay, then ask for the next event
    PullAfterDelay,
    /// The run is over
    Stop,
}

impl Shared {
    fn state(&self) -> RunState {
        self.lifecycle.lock_or_recover().state
    }

    /// Move from one of `allowed` to `to`, then notify listeners
    fn transition(
        &self,
        operation: &'static str,
        allowed: &[RunState],
        to: RunState,
        failure: Option<RunFailure>,
    ) -> Result<(), RunnerError> {
        let transition = {
            let mut lifecycle = self.lifecycle.lock_or_recover();
            if !allowed.contains(&lifecycle.state) {
                return Err(RunnerError::InvalidState {
                    operation,
                    state: lifecycle.state,
                });
            }
            let old_state = std::mem::replace(&mut lifecycle.state, to);
            if failure.is_some() {
                lifecycle.failure = failure.clone();
            }
            StateTransition {
                run_id: self.run_id,
                old_state,
                new_state: to,
                failure,
            }
        };

        tracing::info!(
            run_id = %self.run_id,
            from = %transition.old_state,
            to = %transition.new_state,
            "Run state changed"
        );
        self.state_tx.send_replace(to);
        self.listeners.emit(&transition);
        Ok(())
    }

    /// End a running run; a no-op if it already ended another way
    fn finish(&self, to: RunState, failure: Option<RunFailure>) {
        if let Err(e) = self.transition("finish", &[RunState::Running], to, failure) {
            tracing::debug!(run_id = %self.run_id, error = %e, "Run already ended");
        }
    }

    /// Apply a worker state change to the host cube
    ///
    /// Returns `false` without touching the cube if the run is no longer
    /// running. Holding the lifecycle lock keeps `abort` from interleaving.
    fn apply_change(&self, old_state: CubeState, new_state: CubeState, mv: Option<CubeMove>) -> bool {
        let lifecycle = self.lifecycle.lock_or_recover();
        if lifecycle.state != RunState::Running {
            return false;
        }

        let change = {
            let mut cube = self.cube.lock_or_recover();
            if cube.state() != &old_state {
                tracing::warn!(run_id = %self.run_id, "Host cube diverged before the change");
            }
            let applied = match &mv {
                Some(mv) => cube.apply(mv),
                None => cube.set_state(new_state.clone()),
            };
            match applied {
                Ok(change) if change.new_state == new_state => change,
                Ok(_) => {
                    tracing::warn!(run_id = %self.run_id, "Host cube diverged; adopting worker state");
                    adopt(&mut cube, old_state, new_state, mv)
                }
                Err(e) => {
                    tracing::warn!(run_id = %self.run_id, error = %e, "Could not apply change; adopting worker state");
                    adopt(&mut cube, old_state, new_state, mv)
                }
            }
        };
        drop(lifecycle);

        self.presenter.state_changed(&change);
        true
    }

    /// Handle one delivery from the worker
    fn on_delivery(&self, delivery: Delivery) -> Step {
        let envelope = match delivery {
            Delivery::Event(envelope) => envelope,
            Delivery::Fault(fault) => {
                self.finish(RunState::Crashed, Some(RunFailure::Crash(fault)));
                return Step::Stop;
            }
        };
        if self.state() != RunState::Running {
            return Step::Stop;
        }

        let EventEnvelope { seq, event } = envelope;
        tracing::debug!(run_id = %self.run_id, seq, event = event.kind(), "Event received");
        match event {
            WorkerEvent::StateChanged {
                old_state,
                new_state,
                mv,
            } => {
                if self.apply_change(old_state, new_state, mv) {
                    Step::PullAfterDelay
                } else {
                    Step::Stop
                }
            }
            WorkerEvent::Log { level, text } => {
                self.presenter.log(level, &text);
                Step::Pull
            }
            WorkerEvent::Display {
                level,
                title,
                text,
                delay_ms,
            } => {
                self.presenter.display(&DisplayNotice {
                    level,
                    title,
                    text,
                    delay: Duration::from_millis(delay_ms),
                });
                Step::Pull
            }
            WorkerEvent::Done => {
                self.finish(RunState::Done, None);
                Step::Stop
            }
            WorkerEvent::Failed { error } => {
                tracing::info!(run_id = %self.run_id, %error, "Script failed");
                self.finish(RunState::Failed, Some(RunFailure::Script(error)));
                Step::Stop
            }
        }
    }
}

/// Replace the host cube with the worker's snapshot
fn adopt(
    cube: &mut Cube,
    old_state: CubeState,
    new_state: CubeState,
    mv: Option<CubeMove>,
) -> cubescript_cube::StateChange {
    match Cube::from_state(new_state.clone()) {
        Ok(replacement) => *cube = replacement,
        Err(e) => tracing::warn!(error = %e, "Worker state is not a valid cube"),
    }
    cubescript_cube::StateChange {
        old_state,
        new_state,
        mv,
    }
}

/// Drive the pull protocol until the run ends
async fn drive(shared: Arc<Shared>, link: WorkerLink, mut deliveries: Deliveries, step_delay: Duration) {
    let mut expected_seq = 0;
    while let Some(delivery) = deliveries.recv().await {
        if let Delivery::Event(envelope) = &delivery {
            if envelope.seq != expected_seq {
                tracing::warn!(
                    run_id = %shared.run_id,
                    expected = expected_seq,
                    actual = envelope.seq,
                    "Event out of sequence"
                );
            }
            expected_seq = envelope.seq + 1;
        }

        match shared.on_delivery(delivery) {
            Step::Stop => return,
            Step::PullAfterDelay => tokio::time::sleep(step_delay).await,
            Step::Pull => {}
        }
        if shared.state() != RunState::Running {
            return;
        }
        if let Err(e) = link.request_next_event() {
            // The worker is gone; its fault, if any, is still queued
            tracing::debug!(run_id = %shared.run_id, error = %e, "Pull request not sent");
        }
    }

    shared.finish(
        RunState::Crashed,
        Some(RunFailure::Crash(ExecutionFault::new(
            "Worker exited without a final event",
        ))),
    );
}

/// Host-side controller for a single script run
///
/// One-shot: `start` is accepted once, from `Init`. Events are pulled one at
/// a time; after a state change the controller waits the step delay before
/// asking for the next one.
pub struct RunController {
    shared: Arc<Shared>,
    config: ScriptConfig,
    link: Mutex<Option<WorkerLink>>,
    driver: Mutex<Option<AbortHandle>>,
}

impl RunController {
    pub fn new(cube: Cube, presenter: Arc<dyn Presenter>, config: ScriptConfig) -> Self {
        let (state_tx, _) = watch::channel(RunState::Init);
        Self {
            shared: Arc::new(Shared {
                run_id: RunId::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: RunState::Init,
                    failure: None,
                }),
                state_tx,
                cube: Mutex::new(cube),
                listeners: ListenerRegistry::new(),
                presenter,
            }),
            config,
            link: Mutex::new(None),
            driver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.shared.run_id
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    /// Why the run failed or crashed, if it did
    #[must_use]
    pub fn failure(&self) -> Option<RunFailure> {
        self.shared.lifecycle.lock_or_recover().failure.clone()
    }

    /// Snapshot of the host cube
    #[must_use]
    pub fn cube_state(&self) -> CubeState {
        self.shared.cube.lock_or_recover().state().clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Start executing `script` against a copy of the host cube
    ///
    /// Spawns the worker on the current tokio runtime and returns without
    /// waiting for any event.
    pub fn start(&self, script: &str, step_delay: Duration) -> Result<(), RunnerError> {
        let state = self.state();
        if state != RunState::Init {
            return Err(RunnerError::InvalidState {
                operation: "start",
                state,
            });
        }
        if script.len() > self.config.max_script_length {
            return Err(RunnerError::ScriptTooLong {
                len: script.len(),
                max: self.config.max_script_length,
            });
        }
        tokio::runtime::Handle::try_current().map_err(|_| RunnerError::NoRuntime)?;

        self.shared
            .transition("start", &[RunState::Init], RunState::Starting, None)?;

        let (link, deliveries) = spawn_worker(self.config.clone());
        let started = link
            .send(HostMessage::Start {
                run_id: self.shared.run_id,
                initial_state: self.cube_state(),
                script: script.to_string(),
            })
            .and_then(|()| link.request_next_event());
        if let Err(e) = started {
            link.terminate();
            let fault = ExecutionFault::new(format!("Worker did not accept the run: {e}"));
            self.shared.transition(
                "start",
                &[RunState::Starting],
                RunState::Crashed,
                Some(RunFailure::Crash(fault)),
            )?;
            return Err(e.into());
        }

        *self.link.lock_or_recover() = Some(link.clone());
        self.shared
            .transition("start", &[RunState::Starting], RunState::Running, None)?;

        let driver = tokio::spawn(drive(self.shared.clone(), link, deliveries, step_delay));
        *self.driver.lock_or_recover() = Some(driver.abort_handle());
        Ok(())
    }

    /// Kill the worker and stop the run immediately
    ///
    /// Events already sent by the worker but not yet handled are discarded.
    pub fn abort(&self) -> Result<(), RunnerError> {
        self.shared
            .transition("abort", &[RunState::Running], RunState::Stopped, None)?;
        self.teardown();
        Ok(())
    }

    /// Wait until the run reaches a terminal state
    ///
    /// Never resolves for a controller that is not started.
    pub async fn wait(&self) -> RunState {
        let mut rx = self.shared.state_tx.subscribe();
        let state = match rx.wait_for(RunState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    fn teardown(&self) {
        if let Some(link) = self.link.lock_or_recover().take() {
            link.terminate();
        }
        if let Some(driver) = self.driver.lock_or_recover().take() {
            driver.abort();
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use cubescript_cube::{CubeAngle, Face};
    use cubescript_protocol::{LogLevel, ScriptFailure};

    use crate::{Presented, RecordingPresenter};

    const STEP: Duration = Duration::from_millis(5);

    struct Fixture {
        controller: RunController,
        presenter: Arc<RecordingPresenter>,
        transitions: Arc<Mutex<Vec<StateTransition>>>,
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptConfig::default())
    }

    fn fixture_with(config: ScriptConfig) -> Fixture {
        let presenter = Arc::new(RecordingPresenter::new());
        let controller = RunController::new(Cube::default(), presenter.clone(), config);
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        controller.subscribe(move |t| sink.lock().unwrap().push(t.clone()));
        Fixture {
            controller,
            presenter,
            transitions,
        }
    }

    impl Fixture {
        async fn run(&self, script: &str) -> RunState {
            self.controller.start(script, STEP).unwrap();
            tokio::time::timeout(Duration::from_secs(10), self.controller.wait())
                .await
                .unwrap()
        }

        fn states(&self) -> Vec<(RunState, RunState)> {
            self.transitions
                .lock()
                .unwrap()
                .iter()
                .map(|t| (t.old_state, t.new_state))
                .collect()
        }
    }

    #[tokio::test]
    async fn empty_script_finishes_done() {
        let f = fixture();
        assert_eq!(f.run("").await, RunState::Done);

        assert!(f.presenter.items().is_empty());
        assert_eq!(
            f.states(),
            vec![
                (RunState::Init, RunState::Starting),
                (RunState::Starting, RunState::Running),
                (RunState::Running, RunState::Done),
            ]
        );
        assert!(f.controller.failure().is_none());
    }

    #[tokio::test]
    async fn thrown_error_ends_failed() {
        let f = fixture();
        assert_eq!(
            f.run(r#"throw new RangeError("boom");"#).await,
            RunState::Failed
        );

        match f.controller.failure() {
            Some(RunFailure::Script(error)) => assert_eq!(error.message, "boom"),
            other => panic!("unexpected failure: {other:?}"),
        }
        let last = f.transitions.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.new_state, RunState::Failed);
        assert!(matches!(last.failure, Some(RunFailure::Script(ScriptFailure { .. }))));
    }

    #[tokio::test]
    async fn state_changes_are_applied_in_order_with_pacing() {
        let f = fixture();
        let step = Duration::from_millis(40);
        let started = Instant::now();
        f.controller
            .start("front(); log('between'); cube.move('R', 2);", step)
            .unwrap();
        assert_eq!(f.controller.wait().await, RunState::Done);
        assert!(started.elapsed() >= step * 2);

        let items = f.presenter.items();
        assert_eq!(items.len(), 3);
        match (&items[0], &items[1], &items[2]) {
            (
                Presented::StateChanged(first),
                Presented::Log { level, text },
                Presented::StateChanged(second),
            ) => {
                assert_eq!(first.mv, Some(CubeMove::quarter(Face::Front)));
                assert_eq!(*level, LogLevel::Info);
                assert_eq!(text, "between");
                assert_eq!(second.mv, Some(CubeMove::new(Face::Right, 1, CubeAngle::Cw180)));
                assert_eq!(second.old_state, first.new_state);
            }
            other => panic!("unexpected items: {other:?}"),
        }

        let mut expected = Cube::default();
        expected.apply(&CubeMove::quarter(Face::Front)).unwrap();
        expected
            .apply(&CubeMove::new(Face::Right, 1, CubeAngle::Cw180))
            .unwrap();
        assert_eq!(&f.controller.cube_state(), expected.state());
    }

    #[tokio::test]
    async fn host_cube_tracks_worker_cube() {
        let f = fixture();
        let script = r#"
            for (let i = 0; i < 5; i++) { rightWide(2); upWide(3, -1); }
            rotateX(2);
            cube.reset();
            front(-1);
        "#;
        assert_eq!(f.run(script).await, RunState::Done);

        for item in f.presenter.items() {
            if let Presented::StateChanged(change) = item {
                let mut replay = Cube::from_state(change.old_state.clone()).unwrap();
                let replayed = match change.mv {
                    Some(mv) => replay.apply(&mv).unwrap(),
                    None => replay.set_state(change.new_state.clone()).unwrap(),
                };
                assert_eq!(replayed.new_state, change.new_state);
            }
        }
        let mut expected = Cube::default();
        expected
            .apply(&CubeMove::new(Face::Front, 1, CubeAngle::Ccw90))
            .unwrap();
        assert_eq!(&f.controller.cube_state(), expected.state());
        assert_eq!(f.presenter.state_changes(), 13);
    }

    #[tokio::test]
    async fn abort_mid_run_stops_delivery() {
        let f = fixture();
        f.controller
            .start("front(); while (true) {}", STEP)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while f.presenter.state_changes() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        f.controller.abort().unwrap();
        assert_eq!(f.controller.state(), RunState::Stopped);
        assert_eq!(f.controller.wait().await, RunState::Stopped);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.presenter.state_changes(), 1);
        assert_eq!(
            f.states().last(),
            Some(&(RunState::Running, RunState::Stopped))
        );
    }

    #[tokio::test]
    async fn abort_discards_queued_events() {
        let f = fixture();
        // Slow pacing so the worker queues far more than the host consumes
        f.controller
            .start("for (let i = 0; i < 100; i++) front();", Duration::from_millis(200))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            while f.presenter.state_changes() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        f.controller.abort().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(f.presenter.state_changes(), 1);
        assert_eq!(f.controller.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let f = fixture();
        f.controller.start("log('first');", STEP).unwrap();
        let err = f.controller.start("log('second');", STEP).unwrap_err();
        assert!(matches!(
            err,
            RunnerError::InvalidState {
                operation: "start",
                state: RunState::Running
            }
        ));

        assert_eq!(f.controller.wait().await, RunState::Done);
        assert_eq!(
            f.presenter.items(),
            vec![Presented::Log {
                level: LogLevel::Info,
                text: "first".into()
            }]
        );
    }

    #[tokio::test]
    async fn controller_is_one_shot() {
        let f = fixture();
        assert_eq!(f.run("").await, RunState::Done);
        assert!(matches!(
            f.controller.start("", STEP),
            Err(RunnerError::InvalidState {
                state: RunState::Done,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn abort_outside_running_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.controller.abort(),
            Err(RunnerError::InvalidState {
                operation: "abort",
                state: RunState::Init
            })
        ));
        assert_eq!(f.controller.state(), RunState::Init);

        assert_eq!(f.run("").await, RunState::Done);
        assert!(f.controller.abort().is_err());
        assert_eq!(f.controller.state(), RunState::Done);
    }

    #[tokio::test]
    async fn logs_and_displays_reach_the_presenter() {
        let f = fixture();
        let script = r#"
            logSuccess("ok");
            displayError("Oops", "details", 1200);
        "#;
        assert_eq!(f.run(script).await, RunState::Done);
        assert_eq!(
            f.presenter.items(),
            vec![
                Presented::Log {
                    level: LogLevel::Success,
                    text: "ok".into()
                },
                Presented::Display(DisplayNotice {
                    level: LogLevel::Error,
                    title: "Oops".into(),
                    text: "details".into(),
                    delay: Duration::from_millis(1200),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn timeout_is_a_script_failure() {
        let f = fixture_with(ScriptConfig {
            timeout_ms: Some(50),
            ..Default::default()
        });
        assert_eq!(f.run("while (true) {}").await, RunState::Failed);
        assert!(matches!(
            f.controller.failure(),
            Some(RunFailure::Script(ScriptFailure { name: Some(name), .. })) if name == "TimeoutError"
        ));
    }

    #[tokio::test]
    async fn memory_exhaustion_crashes_the_run() {
        let f = fixture_with(ScriptConfig {
            memory_limit: 8 * 1024 * 1024,
            ..Default::default()
        });
        let script = r#"
            log("filling");
            try {
                const hog = [];
                while (true) hog.push(new Array(100000).fill(1));
            } catch (e) {
                log("recovered");
            }
        "#;
        assert_eq!(f.run(script).await, RunState::Crashed);

        match f.controller.failure() {
            Some(RunFailure::Crash(fault)) => assert!(fault.message.contains("out of memory")),
            other => panic!("unexpected failure: {other:?}"),
        }
        let last = f.transitions.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            (last.old_state, last.new_state),
            (RunState::Running, RunState::Crashed)
        );
        assert!(matches!(last.failure, Some(RunFailure::Crash(_))));
    }

    #[tokio::test]
    async fn long_script_is_rejected_without_state_change() {
        let f = fixture_with(ScriptConfig {
            max_script_length: 8,
            ..Default::default()
        });
        assert!(matches!(
            f.controller.start("log('too long');", STEP),
            Err(RunnerError::ScriptTooLong { len: 16, max: 8 })
        ));
        assert_eq!(f.controller.state(), RunState::Init);
        assert!(f.states().is_empty());
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.controller.start("", STEP),
            Err(RunnerError::NoRuntime)
        ));
        assert_eq!(f.controller.state(), RunState::Init);
    }

    #[test]
    fn fault_delivery_crashes_the_run_and_keeps_detail() {
        let f = fixture();
        f.controller.shared.lifecycle.lock().unwrap().state = RunState::Running;

        let step = f
            .controller
            .shared
            .on_delivery(Delivery::Fault(ExecutionFault::new("panicked: out of stack")));
        assert_eq!(step, Step::Stop);
        assert_eq!(f.controller.state(), RunState::Crashed);
        assert_eq!(
            f.controller.failure(),
            Some(RunFailure::Crash(ExecutionFault::new("panicked: out of stack")))
        );
        let last = f.transitions.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.old_state, RunState::Running);
        assert!(matches!(last.failure, Some(RunFailure::Crash(_))));
    }

    #[test]
    fn events_after_the_end_are_ignored() {
        let f = fixture();
        f.controller.shared.lifecycle.lock().unwrap().state = RunState::Stopped;
        let mut worker = Cube::default();
        let change = worker.apply(&CubeMove::quarter(Face::Up)).unwrap();

        let step = f
            .controller
            .shared
            .on_delivery(Delivery::Event(EventEnvelope::new(0, change.into())));
        assert_eq!(step, Step::Stop);
        assert!(f.controller.cube_state().is_solved());
        assert!(f.presenter.items().is_empty());
    }

    #[test]
    fn diverged_host_adopts_worker_state() {
        let f = fixture();
        f.controller.shared.lifecycle.lock().unwrap().state = RunState::Running;

        // Worker started from a different state than the host holds
        let mut worker = Cube::default();
        worker.apply(&CubeMove::quarter(Face::Left)).unwrap();
        let change = worker.apply(&CubeMove::quarter(Face::Down)).unwrap();

        let step = f
            .controller
            .shared
            .on_delivery(Delivery::Event(EventEnvelope::new(0, change.into())));
        assert_eq!(step, Step::PullAfterDelay);
        assert_eq!(&f.controller.cube_state(), worker.state());
    }
}
