//! Host messages (Host → Worker)

use cubescript_cube::CubeState;
use serde::{Deserialize, Serialize};

use crate::RunId;

/// All messages the host can send to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Begin executing `script` against `initial_state`
    Start {
        run_id: RunId,
        initial_state: CubeState,
        script: String,
    },

    /// Deliver the next queued event, waiting for one if none is queued yet
    RequestNextEvent,
}

impl HostMessage {
    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::RequestNextEvent => "request_next_event",
        }
    }
}
