//! Cubescript Script Host
//!
//! Worker side of a script run: a QuickJS sandbox whose every observable
//! action is turned into an event, an ordered queue holding those events, and
//! a pull handler releasing them to the host one request at a time.
//!
//! ## Script API
//!
//! Scripts have access to the following bindings:
//!
//! - `cube.move(face, angle, slices)` - Turn the cube (emits a state change)
//! - `cube.reset()` - Replace the state with the solved one
//! - `cube.isSolved()` - Query the worker's copy of the cube
//! - `front(angle)`, `back`, `left`, `right`, `up`, `down` - Outer layer turns
//! - `frontWide(slices, angle)`, ... - Wide turns
//! - `rotateX(angle)`, `rotateY`, `rotateZ` - Whole cube rotations
//! - `log(text)`, `logSuccess`, `logWarning`, `logError` - Log lines
//! - `display(title, text, delay)`, `displaySuccess`, `displayWarning`,
//!   `displayError` - Transient notices

mod bindings;
mod memory;
mod pull;
mod queue;
mod runtime;
mod state;
mod transport;
mod worker;

pub use bindings::{PRELUDE, TYPESCRIPT_DEFINITIONS};
pub use pull::*;
pub use queue::*;
pub use runtime::*;
pub use state::MutexExt;
pub use transport::*;
pub use worker::*;

use cubescript_protocol::ScriptFailure;
use serde::Deserialize;
use thiserror::Error;

/// Errors from script execution
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script execution timed out")]
    Timeout,

    #[error("Script was cancelled")]
    Cancelled,

    #[error("Script ran out of memory (limit {limit} bytes)")]
    OutOfMemory { limit: usize },

    #[error("JavaScript error: {0}")]
    Js(ScriptFailure),

    #[error("Runtime initialization failed: {0}")]
    InitError(String),
}

/// Requests that break the pull protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("A pull request is already outstanding")]
    DuplicateRequest,

    #[error("The run has already delivered its final event")]
    AfterTerminal,

    #[error("The worker was already started")]
    DuplicateStart,
}

/// Configuration for script execution
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Maximum memory usage in bytes, unlimited when 0
    pub memory_limit: usize,
    /// Maximum interpreter stack size in bytes
    pub max_stack_size: usize,
    /// Maximum execution time in milliseconds, unlimited when `None`
    pub timeout_ms: Option<u64>,
    /// Maximum accepted script source length in bytes
    pub max_script_length: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024, // 64 MB
            max_stack_size: 1024 * 1024,    // 1 MB
            timeout_ms: None,
            max_script_length: 1024 * 1024,
        }
    }
}
