//! Terminal presentation of a run

use std::io::Write;

use cubescript_cube::StateChange;
use cubescript_engine::{DisplayNotice, Presenter};
use cubescript_protocol::{LogLevel, RunFailure, RunState, StateTransition};

fn tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Success => " ok ",
        LogLevel::Warning => "warn",
        LogLevel::Error => "err ",
    }
}

/// Prints script output to stdout
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    /// Also print every cube change
    pub show_moves: bool,
}

impl ConsolePresenter {
    fn line(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
    }
}

impl Presenter for ConsolePresenter {
    fn log(&self, level: LogLevel, text: &str) {
        self.line(&format!("[{}] {text}", tag(level)));
    }

    fn display(&self, notice: &DisplayNotice) {
        let mut text = format!("[{}] == {} ==", tag(notice.level), notice.title);
        if !notice.text.is_empty() {
            text.push(' ');
            text.push_str(&notice.text);
        }
        self.line(&text);
    }

    fn state_changed(&self, change: &StateChange) {
        if !self.show_moves {
            return;
        }
        match &change.mv {
            Some(mv) => self.line(&format!("       {mv}")),
            None => self.line("       (state replaced)"),
        }
    }
}

/// Notice printed for a lifecycle transition, if any
pub fn lifecycle_notice(transition: &StateTransition) -> Option<String> {
    let notice = match (transition.new_state, &transition.failure) {
        (RunState::Running, _) => "Program started".to_string(),
        (RunState::Done, _) => "Program finished".to_string(),
        (RunState::Stopped, _) => "Program aborted".to_string(),
        (RunState::Failed | RunState::Crashed, Some(RunFailure::Script(error))) => {
            match &error.stack {
                Some(stack) => format!("Program crashed with an error: {error}\n{stack}"),
                None => format!("Program crashed with an error: {error}"),
            }
        }
        (RunState::Failed | RunState::Crashed, Some(RunFailure::Crash(fault))) => {
            format!("Program crashed with an error: {fault}")
        }
        (RunState::Failed | RunState::Crashed, None) => "Program crashed with an error".to_string(),
        (RunState::Init | RunState::Starting, _) => return None,
    };
    Some(notice)
}
