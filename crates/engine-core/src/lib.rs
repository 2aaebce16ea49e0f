//! Cubescript Engine
//!
//! Host side of a script run:
//! - Run controller owning the lifecycle state machine
//! - Lifecycle listeners
//! - Presenter seam for script logs, displays and cube changes

mod controller;
mod error;
mod listeners;
mod presenter;

pub use controller::*;
pub use error::*;
pub use listeners::*;
pub use presenter::*;
