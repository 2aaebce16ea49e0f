//! Run controller errors

use cubescript_protocol::RunState;
use cubescript_script_host::TransportError;
use thiserror::Error;

/// Errors returned synchronously by [`crate::RunController`]
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    #[error("Script too long ({len} bytes, max {max})")]
    ScriptTooLong { len: usize, max: usize },

    #[error("No tokio runtime available to host the worker")]
    NoRuntime,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
