//! QuickJS runtime with sandbox limits

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cubescript_cube::{Cube, CubeState};
use cubescript_protocol::{ExecutionFault, RunId, ScriptFailure, WorkerEvent};
use rquickjs::{Coerced, Context, Ctx, Exception, FromJs, Runtime, Value};

use crate::bindings::{install_bindings, PRELUDE};
use crate::memory::{MemoryTracker, TrackingAllocator};
use crate::{EventQueue, ScriptConfig, ScriptError};

/// Thread-safe cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs one script against an instrumented cube
///
/// Everything the script does is appended to the [`EventQueue`]; nothing is
/// applied outside the worker's private cube.
pub struct Sandbox {
    config: ScriptConfig,
    cancellation: CancellationToken,
}

impl Sandbox {
    pub fn new(config: ScriptConfig, cancellation: CancellationToken) -> Self {
        Self {
            config,
            cancellation,
        }
    }

    /// Execute `source` once, synchronously, then append the terminal event
    ///
    /// `Done` follows a normal return and `Failed` a thrown error or timeout.
    /// A cancelled run appends nothing and seals the queue instead. An error
    /// is returned when the interpreter could not be set up or ran out of
    /// memory, even if the script caught the resulting exception.
    pub fn run(
        &self,
        run_id: RunId,
        initial_state: CubeState,
        source: &str,
        queue: &Arc<EventQueue>,
    ) -> Result<(), ExecutionFault> {
        tracing::debug!(%run_id, bytes = source.len(), "Executing script");
        let terminal = match execute_script_sync(
            initial_state,
            source,
            &self.config,
            &self.cancellation,
            queue,
        ) {
            Ok(()) => WorkerEvent::Done,
            Err(ScriptError::Js(error)) => WorkerEvent::Failed { error },
            Err(ScriptError::Timeout) => WorkerEvent::Failed {
                error: ScriptFailure::new(ScriptError::Timeout.to_string())
                    .with_name("TimeoutError"),
            },
            Err(ScriptError::Cancelled) => {
                tracing::debug!(%run_id, "Script cancelled");
                queue.seal();
                return Ok(());
            }
            Err(ScriptError::OutOfMemory { limit }) => {
                tracing::warn!(%run_id, limit, "Script exhausted its memory");
                return Err(ExecutionFault::new(format!(
                    "Script ran out of memory (limit {limit} bytes)"
                )));
            }
            Err(ScriptError::InitError(message)) => {
                return Err(ExecutionFault::new(format!(
                    "Runtime initialization failed: {message}"
                )));
            }
        };

        tracing::debug!(%run_id, event = terminal.kind(), "Script finished");
        if queue.enqueue(terminal).is_err() {
            tracing::debug!(%run_id, "Queue sealed before the final event");
        }
        Ok(())
    }
}

/// Synchronous script execution (runs in a blocking task)
fn execute_script_sync(
    initial_state: CubeState,
    source: &str,
    config: &ScriptConfig,
    cancellation: &CancellationToken,
    queue: &Arc<EventQueue>,
) -> Result<(), ScriptError> {
    if cancellation.is_cancelled() {
        return Err(ScriptError::Cancelled);
    }
    let cube = Cube::from_state(initial_state).map_err(|e| ScriptError::InitError(e.to_string()))?;

    let memory = MemoryTracker::new(config.memory_limit);
    let runtime = Runtime::new_with_alloc(TrackingAllocator::new(memory.clone()))
        .map_err(|e| ScriptError::InitError(e.to_string()))?;
    runtime.set_max_stack_size(config.max_stack_size);

    // Interrupt on cancellation, exhaustion or timeout
    let start_time = Instant::now();
    let timeout_ms = config.timeout_ms;
    let cancel_flag = cancellation.cancelled.clone();
    let handler_memory = memory.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || {
        if cancel_flag.load(Ordering::SeqCst) || handler_memory.is_exhausted() {
            return true;
        }
        timeout_ms.is_some_and(|limit| start_time.elapsed().as_millis() as u64 > limit)
    })));

    let context = Context::full(&runtime).map_err(|e| ScriptError::InitError(e.to_string()))?;
    let cube = Rc::new(RefCell::new(cube));
    let timed_out = || timeout_ms.is_some_and(|limit| start_time.elapsed().as_millis() as u64 > limit);

    let out_of_memory = || ScriptError::OutOfMemory {
        limit: memory.limit(),
    };

    let result = context.with(|ctx| {
        let init_error = |e: rquickjs::Error| {
            if cancellation.is_cancelled() {
                ScriptError::Cancelled
            } else {
                ScriptError::InitError(e.to_string())
            }
        };
        install_bindings(&ctx, cube.clone(), queue.clone()).map_err(init_error)?;
        ctx.eval::<(), _>(PRELUDE).map_err(init_error)?;

        match ctx.eval::<Value, _>(wrap_script(source)) {
            Ok(_) => Ok(()),
            Err(e) => {
                if cancellation.is_cancelled() {
                    Err(ScriptError::Cancelled)
                } else if memory.is_exhausted() {
                    Err(out_of_memory())
                } else if timed_out() {
                    Err(ScriptError::Timeout)
                } else if matches!(e, rquickjs::Error::Exception) {
                    Err(ScriptError::Js(failure_from_caught(&ctx, ctx.catch())))
                } else {
                    Err(ScriptError::Js(ScriptFailure::new(e.to_string())))
                }
            }
        }
    });

    // A caught allocation failure still ends the run
    if memory.is_exhausted() && !matches!(result, Err(ScriptError::Cancelled)) {
        return Err(out_of_memory());
    }
    result
}

/// Scripts are function bodies, so a top-level `return` ends them early
fn wrap_script(source: &str) -> String {
    format!("(function () {{\n{source}\n}}).call(undefined);")
}

/// Convert a thrown value into a failure, keeping name, message and stack
fn failure_from_caught<'js>(ctx: &Ctx<'js>, caught: Value<'js>) -> ScriptFailure {
    if let Ok(object) = caught.clone().try_into_object() {
        if let Some(exception) = Exception::from_object(object) {
            let name = exception
                .as_object()
                .get::<_, Option<String>>("name")
                .ok()
                .flatten();
            let mut failure = ScriptFailure::new(exception.message().unwrap_or_default());
            failure.name = name;
            if let Some(stack) = exception.stack().filter(|stack| !stack.is_empty()) {
                failure = failure.with_stack(stack);
            }
            return failure;
        }
    }

    match Coerced::<String>::from_js(ctx, caught) {
        Ok(text) => ScriptFailure::new(text.0),
        Err(e) => ScriptFailure::new(format!("Uncaught value that could not be displayed: {e}")),
    }
}
