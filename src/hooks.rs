//! Annotating trims with where they came from.
//!
//! The control-system client calls into a [`TrimHooks`] implementation
//! whenever it writes a setting. [`GeoffHooks`] answers from the tracked
//! problem identity and [`ProblemState`]. It is created once by the
//! application and handed to every builder and job that reports state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::lifecycle::{ProblemInfo, ProblemState};
use crate::registry::ProblemRegistry;

/// Consulted by the control-system client for every trim.
pub trait TrimHooks: Send + Sync {
    fn trim_description(&self, desc: Option<&str>) -> String {
        desc.unwrap_or_default().to_owned()
    }

    fn trim_transient(&self, transient: Option<bool>) -> bool {
        transient.unwrap_or(true)
    }
}

/// Hooks that only pass explicit arguments through.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl TrimHooks for DefaultHooks {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl fmt::Display for AppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

#[derive(Debug, Default)]
struct Tracked {
    problem: ProblemInfo,
    problem_state: Option<ProblemState>,
}

/// Tracks the selected problem and its lifecycle state.
pub struct GeoffHooks {
    app_info: AppInfo,
    tracked: Mutex<Tracked>,
    registry: Option<Arc<ProblemRegistry>>,
}

impl GeoffHooks {
    pub fn new(app_name: &str, app_version: &str) -> Self {
        GeoffHooks {
            app_info: AppInfo {
                name: app_name.to_owned(),
                version: app_version.to_owned(),
            },
            tracked: Mutex::new(Tracked::default()),
            registry: None,
        }
    }

    /// Look up problem sources in `registry`.
    pub fn with_registry(mut self, registry: Arc<ProblemRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    pub fn problem(&self) -> ProblemInfo {
        self.lock().problem.clone()
    }

    pub fn problem_state(&self) -> Option<ProblemState> {
        self.lock().problem_state.clone()
    }

    /// Select a new problem and return to idle.
    pub fn update_problem(&self, name: &str) {
        self.update_problem_state(None, Some(name));
    }

    /// Replace the state. The identity is only touched if `problem` differs
    /// from the one already tracked.
    pub fn update_problem_state(&self, state: Option<ProblemState>, problem: Option<&str>) {
        self.modify_problem_state(problem, |_| state);
    }

    /// Derive the next state from the current one while holding the lock.
    pub fn modify_problem_state<F>(&self, problem: Option<&str>, transition: F)
    where
        F: FnOnce(Option<&ProblemState>) -> Option<ProblemState>,
    {
        let mut tracked = self.lock();
        if let Some(name) = problem {
            if name != tracked.problem.name {
                tracked.problem = self.find_problem(name);
            }
        }
        let next = transition(tracked.problem_state.as_ref());
        tracing::trace!(
            "problem state: {}",
            next.as_ref().map(ToString::to_string).unwrap_or_default()
        );
        tracked.problem_state = next;
    }

    fn find_problem(&self, name: &str) -> ProblemInfo {
        let source = self
            .registry
            .as_ref()
            .and_then(|registry| registry.spec(name).ok())
            .and_then(|spec| spec.source.clone());
        ProblemInfo {
            name: name.to_owned(),
            source,
        }
    }

    /// State, problem and application joined into one line.
    pub fn format_extra_info(&self) -> String {
        let tracked = self.lock();
        let state = tracked
            .problem_state
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let problem = tracked.problem.to_string();
        let app = format!("part of {}", self.app_info);
        [state, problem, app]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrimHooks for GeoffHooks {
    fn trim_description(&self, desc: Option<&str>) -> String {
        let prefix = DefaultHooks.trim_description(desc);
        let extra = self.format_extra_info();
        match (prefix.is_empty(), extra.is_empty()) {
            (false, false) => format!("{prefix}; {extra}"),
            (false, true) => prefix,
            _ => extra,
        }
    }

    fn trim_transient(&self, transient: Option<bool>) -> bool {
        if transient.is_none() {
            if let Some(state) = &self.lock().problem_state {
                return state.indicates_transient_trims();
            }
        }
        DefaultHooks.trim_transient(transient)
    }
}

impl fmt::Debug for GeoffHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoffHooks")
            .field("app_info", &self.app_info)
            .field("tracked", &*self.lock())
            .finish_non_exhaustive()
    }
}
