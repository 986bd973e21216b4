pub mod components;
pub mod inputs;
pub mod state;
pub mod ui;

use std::fmt;

use crossterm::event::KeyCode;

use self::state::RunMonitor;

#[derive(Debug, PartialEq, Eq)]
pub enum AppReturn {
    Exit,
    Stop,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Stop,
    Next,
}

impl Action {
    pub fn all() -> [Action; 3] {
        [Action::Quit, Action::Stop, Action::Next]
    }

    pub fn key(&self) -> char {
        match self {
            Action::Quit => 'q',
            Action::Stop => 's',
            Action::Next => 'n',
        }
    }

    fn find(code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Char(c) => Action::all().into_iter().find(|a| a.key() == c),
            KeyCode::Esc => Some(Action::Quit),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Action::Quit => "Quit",
            Action::Stop => "Stop the run",
            Action::Next => "Next tab",
        };
        write!(f, "{text}")
    }
}

/// The main application, containing the state
pub struct App {
    monitor: RunMonitor,
    tab_index: usize,
    tab_titles: Vec<&'static str>,
}

impl App {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            monitor: RunMonitor::new(),
            tab_index: 0,
            tab_titles: vec!["Logs", "Plot"],
        }
    }

    /// Handle a user action
    pub fn do_action(&mut self, code: KeyCode) -> AppReturn {
        let Some(action) = Action::find(code) else {
            tracing::trace!("The {:?} key has no associated action", code);
            return AppReturn::Continue;
        };
        tracing::debug!("Run action [{:?}]", action);
        match action {
            Action::Quit => AppReturn::Exit,
            Action::Stop => {
                if self.monitor.is_finished() {
                    AppReturn::Continue
                } else {
                    tracing::info!("Stop requested, the run ends at the next step");
                    AppReturn::Stop
                }
            }
            Action::Next => {
                self.tab_index = (self.tab_index + 1) % self.tab_titles.len();
                AppReturn::Continue
            }
        }
    }

    pub fn monitor(&self) -> &RunMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut RunMonitor {
        &mut self.monitor
    }

    pub fn into_monitor(self) -> RunMonitor {
        self.monitor
    }
}
