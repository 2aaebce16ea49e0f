//! Presentation seam
//!
//! The controller never renders anything itself. Script logs, displays and
//! applied cube changes are handed to a [`Presenter`].

use std::sync::Mutex;
use std::time::Duration;

use cubescript_cube::StateChange;
use cubescript_protocol::LogLevel;
use cubescript_script_host::MutexExt;

/// A transient notice requested by a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayNotice {
    pub level: LogLevel,
    pub title: String,
    pub text: String,
    pub delay: Duration,
}

/// Receives everything a run wants shown
pub trait Presenter: Send + Sync {
    fn log(&self, level: LogLevel, text: &str);

    fn display(&self, notice: &DisplayNotice);

    /// Called after a change was applied to the host cube
    fn state_changed(&self, _change: &StateChange) {}
}

/// Presenter writing to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn log(&self, level: LogLevel, text: &str) {
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(%level, "Script: {text}"),
            LogLevel::Warning => tracing::warn!("Script: {text}"),
            LogLevel::Error => tracing::error!("Script: {text}"),
        }
    }

    fn display(&self, notice: &DisplayNotice) {
        tracing::info!(
            level = %notice.level,
            delay_ms = notice.delay.as_millis() as u64,
            "Script notification: {}: {}",
            notice.title,
            notice.text
        );
    }
}

/// One item handed to a [`RecordingPresenter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presented {
    Log { level: LogLevel, text: String },
    Display(DisplayNotice),
    StateChanged(StateChange),
}

/// Presenter buffering everything it receives, in order
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    items: Mutex<Vec<Presented>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn items(&self) -> Vec<Presented> {
        self.items.lock_or_recover().clone()
    }

    /// Number of cube changes presented so far
    #[must_use]
    pub fn state_changes(&self) -> usize {
        self.items
            .lock_or_recover()
            .iter()
            .filter(|item| matches!(item, Presented::StateChanged(_)))
            .count()
    }
}

impl Presenter for RecordingPresenter {
    fn log(&self, level: LogLevel, text: &str) {
        self.items.lock_or_recover().push(Presented::Log {
            level,
            text: text.to_string(),
        });
    }

    fn display(&self, notice: &DisplayNotice) {
        self.items
            .lock_or_recover()
            .push(Presented::Display(notice.clone()));
    }

    fn state_changed(&self, change: &StateChange) {
        self.items
            .lock_or_recover()
            .push(Presented::StateChanged(change.clone()));
    }
}
