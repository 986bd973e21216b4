use std::path::Path;
use std::sync::Arc;

use eyre::Result;

use super::{load_env, starting_state, Agent, AgentFactory, MonitoredEnv, RlMode};
use crate::cancellation::TokenSource;
use crate::error::CannotBuildJob;
use crate::hooks::GeoffHooks;
use crate::jobs::loader::{ProblemLoader, SharedEnv};
use crate::jobs::signals::{JobEvent, PreRunMetadata, Signals};
use crate::jobs::{lock, Job, JobBuilder, JobContext, JobStatus, Outcome, SharedJob};
use crate::registry::{ControlSystem, ProblemRegistry};

/// Trains a freshly made agent on an environment.
pub struct TrainJob {
    ctx: JobContext,
    env: SharedEnv,
    agent: Box<dyn Agent>,
    agent_name: String,
    total_timesteps: u64,
    time_limit: Option<u64>,
    trained: bool,
}

impl TrainJob {
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Save the trained agent. Fails if training has not finished.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if !self.trained {
            eyre::bail!("cannot save {}: training has not finished", self.agent_name);
        }
        self.agent.save(path.as_ref())
    }

    fn train(&mut self, ctx: &JobContext) -> Result<()> {
        self.trained = false;
        let env = Arc::clone(&self.env);
        let mut guard = lock(&env);
        ctx.emit(JobEvent::RunStarted(PreRunMetadata::new(
            &**guard,
            &ctx.problem_id,
            self.time_limit,
            Some(self.total_timesteps),
        )));
        ctx.hooks.update_problem_state(
            Some(starting_state(None, self.time_limit, Some(self.total_timesteps))),
            Some(&ctx.problem_id),
        );
        tracing::info!("start training of {} on {}", self.agent_name, ctx.problem_id);
        let mut monitored =
            MonitoredEnv::new(&mut **guard, ctx, RlMode::Training, self.time_limit);
        self.agent.learn(&mut monitored, self.total_timesteps)?;
        self.trained = true;
        Ok(())
    }
}

impl Job for TrainJob {
    fn run(&mut self) -> Outcome {
        let ctx = self.ctx.clone();
        ctx.catching_exceptions("training", || self.train(&ctx))
    }
}

/// Builds [`TrainJob`]s from the selected environment and agent.
pub struct TrainJobBuilder {
    loader: ProblemLoader,
    signals: Signals,
    pub agent_factory: Option<Arc<dyn AgentFactory>>,
    /// Overrides the factory's own number of timesteps.
    pub total_timesteps: Option<u64>,
    /// Zero takes the limit from the environment.
    pub time_limit: u64,
    last_job: Option<JobStatus>,
}

impl TrainJobBuilder {
    pub fn new(registry: Arc<ProblemRegistry>, hooks: Arc<GeoffHooks>, signals: Signals) -> Self {
        TrainJobBuilder {
            loader: ProblemLoader::new(registry, hooks),
            signals,
            agent_factory: None,
            total_timesteps: None,
            time_limit: 0,
            last_job: None,
        }
    }

    pub fn set_problem_id(&mut self, id: &str) {
        self.loader.set_problem_id(id);
    }

    pub fn set_control_system(&mut self, client: Option<Arc<dyn ControlSystem>>) {
        self.loader.control_system = client;
    }

    pub fn loader_mut(&mut self) -> &mut ProblemLoader {
        &mut self.loader
    }

    pub fn cancel(&self) {
        self.loader.token_source().cancel();
    }

    pub fn token_source(&self) -> &TokenSource {
        self.loader.token_source()
    }

    fn construct_job(&mut self, factory: &dyn AgentFactory) -> Result<(TrainJob, JobContext)> {
        let (env, time_limit) = load_env(&mut self.loader, self.time_limit)?;
        let agent = factory.make_agent()?;
        let ctx = JobContext::new(
            self.loader.token_source().clone(),
            self.signals.clone(),
            Arc::clone(self.loader.hooks()),
            self.loader.problem_id(),
        );
        let job = TrainJob {
            ctx: ctx.clone(),
            env,
            agent,
            agent_name: factory.name().to_owned(),
            total_timesteps: self.total_timesteps.unwrap_or(factory.total_timesteps()),
            time_limit,
            trained: false,
        };
        Ok((job, ctx))
    }
}

impl JobBuilder for TrainJobBuilder {
    type Job = TrainJob;

    fn build_job(&mut self) -> Result<SharedJob<TrainJob>> {
        let factory = self.agent_factory.clone().ok_or(CannotBuildJob::NoAgent)?;
        if self.last_job.as_ref().is_some_and(JobStatus::is_running) {
            return Err(CannotBuildJob::JobStillRunning.into());
        }
        self.loader.prepare_token(self.last_job.as_ref())?;
        match self.construct_job(factory.as_ref()) {
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
