//! Script API bindings for JavaScript
//!
//! Every binding turns a script action into a [`WorkerEvent`] on the run's
//! queue. Cube bindings also mutate the worker's private cube.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use cubescript_cube::{Cube, CubeAngle, CubeError, CubeMove, Face, StateChange};
use cubescript_protocol::{LogLevel, WorkerEvent, DEFAULT_DISPLAY_DELAY_MS};
use rquickjs::function::{Func, Opt};
use rquickjs::{Coerced, Ctx, Exception, Object};

use crate::EventQueue;

/// Append an event; events after the final one are dropped
fn emit(queue: &EventQueue, event: WorkerEvent) {
    let kind = event.kind();
    if queue.enqueue(event).is_err() {
        tracing::debug!(event = kind, "Dropped event after the run ended");
    }
}

/// Map a cube error onto the JavaScript error class a script would expect
fn throw_cube_error(ctx: &Ctx<'_>, err: &CubeError) -> rquickjs::Error {
    let message = err.to_string();
    match err {
        CubeError::UnknownFace(_) => Exception::throw_type(ctx, &message),
        _ => Exception::throw_range(ctx, &message),
    }
}

/// Parse `cube.move` arguments into a move
pub(crate) fn parse_move(face: &str, angle: Option<i32>, slices: Option<i32>) -> Result<CubeMove, CubeError> {
    let face = Face::parse(face)?;
    let angle = CubeAngle::from_turns(i64::from(angle.unwrap_or(1)))?;
    // Out of range counts become 0 so the cube rejects them with its own error
    let slices = u8::try_from(slices.unwrap_or(1)).unwrap_or(0);
    Ok(CubeMove::new(face, slices, angle))
}

/// Clamp a script-supplied display delay
pub(crate) fn display_delay(delay: Option<f64>) -> u64 {
    match delay {
        Some(ms) if ms.is_finite() && ms >= 0.0 => ms as u64,
        _ => DEFAULT_DISPLAY_DELAY_MS,
    }
}

/// Install the `cube`, log and display bindings into a context
pub(crate) fn install_bindings<'js>(
    ctx: &Ctx<'js>,
    cube: Rc<RefCell<Cube>>,
    queue: Arc<EventQueue>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    // Log functions
    for (name, level) in [
        ("log", LogLevel::Info),
        ("logSuccess", LogLevel::Success),
        ("logWarning", LogLevel::Warning),
        ("logError", LogLevel::Error),
    ] {
        let queue = queue.clone();
        let log_fn = Func::from(move |text: Coerced<String>| {
            emit(&queue, WorkerEvent::Log { level, text: text.0 });
        });
        globals.set(name, log_fn)?;
    }

    // Display functions
    for (name, level) in [
        ("display", LogLevel::Info),
        ("displaySuccess", LogLevel::Success),
        ("displayWarning", LogLevel::Warning),
        ("displayError", LogLevel::Error),
    ] {
        let queue = queue.clone();
        let display_fn = Func::from(
            move |title: Coerced<String>, text: Opt<Coerced<String>>, delay: Opt<f64>| {
                emit(
                    &queue,
                    WorkerEvent::Display {
                        level,
                        title: title.0,
                        text: text.0.map(|t| t.0).unwrap_or_default(),
                        delay_ms: display_delay(delay.0),
                    },
                );
            },
        );
        globals.set(name, display_fn)?;
    }

    // Cube namespace
    let cube_obj = Object::new(ctx.clone())?;
    cube_obj.set("edgeLength", i32::from(cube.borrow().edge_length()))?;

    let cube_clone = cube.clone();
    let queue_clone = queue.clone();
    let move_fn = Func::from(
        move |ctx: Ctx<'_>, face: String, angle: Opt<i32>, slices: Opt<i32>| -> rquickjs::Result<()> {
            let change = parse_move(&face, angle.0, slices.0)
                .and_then(|mv| cube_clone.borrow_mut().apply(&mv))
                .map_err(|e| throw_cube_error(&ctx, &e))?;
            emit_change(&queue_clone, change);
            Ok(())
        },
    );
    cube_obj.set("move", move_fn)?;

    let cube_clone = cube.clone();
    let queue_clone = queue.clone();
    let reset_fn = Func::from(move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
        let change = cube_clone
            .borrow_mut()
            .reset()
            .map_err(|e| throw_cube_error(&ctx, &e))?;
        emit_change(&queue_clone, change);
        Ok(())
    });
    cube_obj.set("reset", reset_fn)?;

    let cube_clone = cube.clone();
    let solved_fn = Func::from(move || cube_clone.borrow().state().is_solved());
    cube_obj.set("isSolved", solved_fn)?;

    globals.set("cube", cube_obj)?;

    Ok(())
}

fn emit_change(queue: &EventQueue, change: StateChange) {
    emit(queue, WorkerEvent::from(change));
}

/// Shorthands evaluated before every script, built on `cube.move`
pub const PRELUDE: &str = r#"
(function (g) {
    const faces = { front: 'F', back: 'B', left: 'L', right: 'R', up: 'U', down: 'D' };
    for (const name of Object.keys(faces)) {
        const face = faces[name];
        g[name] = (angle = 1) => cube.move(face, angle, 1);
        g[name + 'Wide'] = (slices = 2, angle = 1) => cube.move(face, angle, slices);
    }
    g.rotateX = (angle = 1) => cube.move('R', angle, cube.edgeLength);
    g.rotateY = (angle = 1) => cube.move('U', angle, cube.edgeLength);
    g.rotateZ = (angle = 1) => cube.move('F', angle, cube.edgeLength);
})(globalThis);
"#;

/// TypeScript definition for the script API
pub const TYPESCRIPT_DEFINITIONS: &str = r#"
/**
 * Cubescript API
 *
 * Angles: 1 = clockwise quarter turn, 2 = half turn, -1 (or 3) = counter-clockwise.
 */

type Face = 'F' | 'B' | 'L' | 'R' | 'U' | 'D';

declare namespace cube {
    /** Number of layers along one edge */
    const edgeLength: number;

    /**
     * Turn the `slices` outermost layers of a face.
     * @throws TypeError for an unknown face, RangeError for a bad angle or slice count
     */
    function move(face: Face, angle?: number, slices?: number): void;

    /** Replace the state with the solved one */
    function reset(): void;

    /** Whether the cube is currently solved */
    function isSolved(): boolean;
}

declare function front(angle?: number): void;
declare function back(angle?: number): void;
declare function left(angle?: number): void;
declare function right(angle?: number): void;
declare function up(angle?: number): void;
declare function down(angle?: number): void;

declare function frontWide(slices?: number, angle?: number): void;
declare function backWide(slices?: number, angle?: number): void;
declare function leftWide(slices?: number, angle?: number): void;
declare function rightWide(slices?: number, angle?: number): void;
declare function upWide(slices?: number, angle?: number): void;
declare function downWide(slices?: number, angle?: number): void;

declare function rotateX(angle?: number): void;
declare function rotateY(angle?: number): void;
declare function rotateZ(angle?: number): void;

declare function log(text: any): void;
declare function logSuccess(text: any): void;
declare function logWarning(text: any): void;
declare function logError(text: any): void;

/**
 * Show a transient notice.
 * @param delay Display duration in milliseconds (default: 3000)
 */
declare function display(title: string, text?: string, delay?: number): void;
declare function displaySuccess(title: string, text?: string, delay?: number): void;
declare function displayWarning(title: string, text?: string, delay?: number): void;
declare function displayError(title: string, text?: string, delay?: number): void;
"#;
