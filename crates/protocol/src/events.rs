//! Worker events (Worker → Host)

use cubescript_cube::{CubeMove, CubeState};
use serde::{Deserialize, Serialize};

use crate::{LogLevel, ScriptFailure};

/// Default display duration when a script does not pass one
pub const DEFAULT_DISPLAY_DELAY_MS: u64 = 3000;

/// Envelope carrying one event and its position in the run's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Zero-based enqueue position
    pub seq: u64,
    pub event: WorkerEvent,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(seq: u64, event: WorkerEvent) -> Self {
        Self { seq, event }
    }
}

/// All events a running script can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// The worker's cube changed. `mv` is absent for a full-state replacement.
    StateChanged {
        old_state: CubeState,
        new_state: CubeState,
        #[serde(rename = "move", skip_serializing_if = "Option::is_none", default)]
        mv: Option<CubeMove>,
    },

    /// Log line written by the script
    Log { level: LogLevel, text: String },

    /// Transient notice the script wants shown
    Display {
        level: LogLevel,
        title: String,
        text: String,
        delay_ms: u64,
    },

    /// Script returned normally
    Done,

    /// Script threw
    Failed { error: ScriptFailure },
}

impl WorkerEvent {
    /// `Done` and `Failed` end the run
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Log { .. } => "log",
            Self::Display { .. } => "display",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

impl From<cubescript_cube::StateChange> for WorkerEvent {
    fn from(change: cubescript_cube::StateChange) -> Self {
        Self::StateChanged {
            old_state: change.old_state,
            new_state: change.new_state,
            mv: change.mv,
        }
    }
}
