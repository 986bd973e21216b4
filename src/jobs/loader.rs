//! Lazy construction and eager closing of the selected problem.

use std::fmt;
use std::sync::{Arc, Mutex};

use eyre::Result;

use super::{lock, JobStatus};
use crate::cancellation::TokenSource;
use crate::error::CannotBuildJob;
use crate::hooks::GeoffHooks;
use crate::lifecycle::ProblemState;
use crate::problem::{AnyProblem, Env, FunctionOptimizable, SingleOptimizable};
use crate::registry::{ControlSystem, ProblemRegistry};

pub type SharedSingle = Arc<Mutex<Box<dyn SingleOptimizable>>>;
pub type SharedFunction = Arc<Mutex<Box<dyn FunctionOptimizable>>>;
pub type SharedEnv = Arc<Mutex<Box<dyn Env>>>;

/// A constructed problem, shared between its loader and the jobs using it.
#[derive(Clone)]
pub enum LoadedProblem {
    Single(SharedSingle),
    Function(SharedFunction),
    Env(SharedEnv),
}

impl From<AnyProblem> for LoadedProblem {
    fn from(problem: AnyProblem) -> Self {
        match problem {
            AnyProblem::Single(p) => LoadedProblem::Single(Arc::new(Mutex::new(p))),
            AnyProblem::Function(p) => LoadedProblem::Function(Arc::new(Mutex::new(p))),
            AnyProblem::Env(p) => LoadedProblem::Env(Arc::new(Mutex::new(p))),
        }
    }
}

impl LoadedProblem {
    /// Blocks until no job is using the problem anymore.
    fn close(&self) -> Result<()> {
        match self {
            LoadedProblem::Single(p) => lock(p).close(),
            LoadedProblem::Function(p) => lock(p).close(),
            LoadedProblem::Env(p) => lock(p).close(),
        }
    }
}

impl fmt::Debug for LoadedProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            LoadedProblem::Single(_) => "Single",
            LoadedProblem::Function(_) => "Function",
            LoadedProblem::Env(_) => "Env",
        };
        write!(f, "LoadedProblem::{kind}")
    }
}

/// Owns at most one live problem and the token source shared with every job
/// built on it.
pub struct ProblemLoader {
    registry: Arc<ProblemRegistry>,
    hooks: Arc<GeoffHooks>,
    token_source: TokenSource,
    problem_id: String,
    problem: Option<LoadedProblem>,
    pub control_system: Option<Arc<dyn ControlSystem>>,
}

impl ProblemLoader {
    pub fn new(registry: Arc<ProblemRegistry>, hooks: Arc<GeoffHooks>) -> Self {
        ProblemLoader {
            registry,
            hooks,
            token_source: TokenSource::new(),
            problem_id: String::new(),
            problem: None,
            control_system: None,
        }
    }

    pub fn problem_id(&self) -> &str {
        &self.problem_id
    }

    /// Select another problem. A loaded problem of a different id is closed
    /// right away.
    pub fn set_problem_id(&mut self, id: &str) {
        if id == self.problem_id {
            return;
        }
        self.unload_problem();
        self.problem_id = id.to_owned();
        self.hooks.update_problem(id);
    }

    pub fn problem(&self) -> Option<&LoadedProblem> {
        self.problem.as_ref()
    }

    pub fn hooks(&self) -> &Arc<GeoffHooks> {
        &self.hooks
    }

    pub fn token_source(&self) -> &TokenSource {
        &self.token_source
    }

    /// Construct the selected problem, closing any previous instance.
    pub fn make_problem(&mut self) -> Result<LoadedProblem> {
        if self.problem_id.is_empty() {
            return Err(CannotBuildJob::NoProblem.into());
        }
        self.unload_problem();
        let id = self.problem_id.clone();
        self.hooks
            .update_problem_state(Some(ProblemState::Constructing), Some(&id));
        tracing::debug!("Initializing new problem: {id}");
        let control_system = self.control_system.clone();
        let made = self.registry.make(
            &id,
            move || {
                let client = control_system.ok_or(CannotBuildJob::NoControlSystem)?;
                tracing::debug!("Using selector {}", client.selector());
                Ok(client)
            },
            self.token_source.token(),
        );
        match made {
            Ok(problem) => {
                let loaded = LoadedProblem::from(problem);
                self.problem = Some(loaded.clone());
                Ok(loaded)
            }
            Err(err) => {
                self.hooks.update_problem_state(None, Some(&id));
                Err(err)
            }
        }
    }

    pub fn get_or_make_problem(&mut self) -> Result<LoadedProblem> {
        match &self.problem {
            Some(problem) => Ok(problem.clone()),
            None => self.make_problem(),
        }
    }

    /// Close the loaded problem, if any.
    pub fn unload_problem(&mut self) {
        let Some(problem) = self.problem.take() else {
            return;
        };
        let id = self.problem_id.clone();
        self.hooks
            .update_problem_state(Some(ProblemState::Closing), Some(&id));
        tracing::debug!("Closing {id}");
        if let Err(err) = problem.close() {
            tracing::warn!("Failed to close {id}: {err:?}");
        }
        self.hooks.update_problem_state(None, Some(&id));
    }

    /// Let `configure` change the loaded problem while the state reads
    /// "configuring".
    pub fn configure<F>(&mut self, configure: F) -> Result<()>
    where
        F: FnOnce(&LoadedProblem) -> Result<()>,
    {
        let problem = self.get_or_make_problem()?;
        self.hooks
            .update_problem_state(Some(ProblemState::Configuring), Some(&self.problem_id));
        let result = configure(&problem);
        self.hooks.update_problem_state(None, Some(&self.problem_id));
        result
    }

    /// Make the shared token usable for the next job.
    ///
    /// A request that no job ever received, e.g. a stop after the previous
    /// job had already finished, is discarded. A cancellation the previous
    /// job's problem has not completed yet is still owned by the problem.
    pub(crate) fn prepare_token(&self, last_job: Option<&JobStatus>) -> Result<(), CannotBuildJob> {
        let token = self.token_source.token();
        if token.cancellation_requested() && !token.cancellation_completed() {
            if last_job.is_some_and(JobStatus::left_cancellation_pending) {
                return Err(CannotBuildJob::StaleCancellation);
            }
            tracing::warn!("Discarding a cancellation that no running job received");
            token.complete_cancellation();
        }
        self.token_source
            .reset_cancellation()
            .map_err(|_| CannotBuildJob::StaleCancellation)
    }
}

impl Drop for ProblemLoader {
    fn drop(&mut self) {
        self.unload_problem();
    }
}

impl fmt::Debug for ProblemLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemLoader")
            .field("problem_id", &self.problem_id)
            .field("problem", &self.problem)
            .field("control_system", &self.control_system.is_some())
            .finish_non_exhaustive()
    }
}
