use std::sync::Arc;

use eyre::Result;

use super::loader::{LoadedProblem, ProblemLoader};
use super::opt_job::{FunctionOptimizableJob, OptJob, SingleOptimizableJob};
use super::signals::Signals;
use super::{JobBuilder, JobContext, JobStatus, SharedJob};
use crate::cancellation::TokenSource;
use crate::error::CannotBuildJob;
use crate::hooks::GeoffHooks;
use crate::lifecycle::ProblemState;
use crate::optimizers::Optimizer;
use crate::registry::{ControlSystem, ProblemRegistry};

/// Builds numerical optimization jobs from the selected problem and
/// optimizer.
pub struct OptJobBuilder {
    loader: ProblemLoader,
    signals: Signals,
    /// Used for problems that are optimized per skeleton point.
    pub skeleton_points: Vec<f64>,
    pub optimizer: Option<Arc<dyn Optimizer>>,
    last_job: Option<JobStatus>,
}

impl OptJobBuilder {
    pub fn new(registry: Arc<ProblemRegistry>, hooks: Arc<GeoffHooks>, signals: Signals) -> Self {
        OptJobBuilder {
            loader: ProblemLoader::new(registry, hooks),
            signals,
            skeleton_points: Vec::new(),
            optimizer: None,
            last_job: None,
        }
    }

    pub fn problem_id(&self) -> &str {
        self.loader.problem_id()
    }

    pub fn set_problem_id(&mut self, id: &str) {
        self.loader.set_problem_id(id);
    }

    pub fn set_control_system(&mut self, client: Option<Arc<dyn ControlSystem>>) {
        self.loader.control_system = client;
    }

    pub fn loader(&self) -> &ProblemLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut ProblemLoader {
        &mut self.loader
    }

    pub fn make_problem(&mut self) -> Result<LoadedProblem> {
        self.loader.make_problem()
    }

    pub fn unload_problem(&mut self) {
        self.loader.unload_problem();
    }

    /// Stop whatever job this builder built last.
    pub fn cancel(&self) {
        self.loader.token_source().cancel();
    }

    pub fn token_source(&self) -> &TokenSource {
        self.loader.token_source()
    }

    fn construct_job(&mut self, optimizer: Arc<dyn Optimizer>) -> Result<(OptJob, JobContext)> {
        let problem = self.loader.get_or_make_problem()?;
        let problem_id = self.loader.problem_id().to_owned();
        let hooks = Arc::clone(self.loader.hooks());
        hooks.update_problem_state(
            Some(ProblemState::StartingOptimization { cycle_time: None }),
            Some(&problem_id),
        );
        let ctx = JobContext::new(
            self.loader.token_source().clone(),
            self.signals.clone(),
            hooks,
            &problem_id,
        );
        let job = match problem {
            LoadedProblem::Single(problem) => {
                OptJob::Single(SingleOptimizableJob::new(ctx.clone(), optimizer, problem)?)
            }
            LoadedProblem::Function(problem) => OptJob::Function(FunctionOptimizableJob::new(
                ctx.clone(),
                optimizer,
                problem,
                &self.skeleton_points,
            )?),
            LoadedProblem::Env(_) => return Err(CannotBuildJob::NotOptimizable(problem_id).into()),
        };
        Ok((job, ctx))
    }
}

impl JobBuilder for OptJobBuilder {
    type Job = OptJob;

    fn build_job(&mut self) -> Result<SharedJob<OptJob>> {
        let optimizer = self.optimizer.clone().ok_or(CannotBuildJob::NoOptimizer)?;
        if self.last_job.as_ref().is_some_and(JobStatus::is_running) {
            return Err(CannotBuildJob::JobStillRunning.into());
        }
        self.loader.prepare_token(self.last_job.as_ref())?;
        match self.construct_job(optimizer) {
            Ok((job, ctx)) => {
                let shared = SharedJob::new(job, &ctx);
                self.last_job = Some(shared.status());
                Ok(shared)
            }
            Err(err) => {
                self.loader
                    .hooks()
                    .update_problem_state(None, Some(self.loader.problem_id()));
                Err(err)
            }
        }
    }
}
