//! Poison-tolerant locking for state shared across threads and callbacks

use std::panic::Location;
use std::sync::{Mutex, MutexGuard};

pub trait MutexExt<T> {
    /// Lock, taking the data back if a previous holder panicked
    ///
    /// The poison flag is cleared so the warning is logged once per panic.
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let location = Location::caller();
                tracing::warn!(%location, "Recovered from poisoned mutex");
                self.clear_poison();
                poisoned.into_inner()
            }
        }
    }
}
