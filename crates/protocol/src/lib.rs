//! Cubescript Protocol
//!
//! Defines the message types exchanged between the host run controller and
//! the worker that executes a script. This crate is the source of truth for
//! everything that crosses the host/worker channel.

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;
