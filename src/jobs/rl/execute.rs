use std::sync::Arc;

use eyre::Result;

use super::{load_env, starting_state, MonitoredEnv, Policy, PolicyProvider, RlMode};
use crate::cancellation::TokenSource;
use crate::error::CannotBuildJob;
use crate::hooks::GeoffHooks;
use crate::jobs::loader::{ProblemLoader, SharedEnv};
use crate::jobs::signals::{JobEvent, PreRunMetadata, Signals};
use crate::jobs::{lock, Job, JobBuilder, JobContext, JobStatus, Outcome, SharedJob};
use crate::problem::Env;
use crate::registry::{ControlSystem, ProblemRegistry};

/// Runs a trained policy on an environment for a number of episodes.
pub struct ExecJob {
    ctx: JobContext,
    env: SharedEnv,
    policy: Box<dyn Policy>,
    policy_name: String,
    num_episodes: u64,
    time_limit: Option<u64>,
    reward_lists: Vec<Vec<f64>>,
}

impl ExecJob {
    /// Rewards of every executed episode, one list per episode.
    pub fn reward_lists(&self) -> &[Vec<f64>] {
        &self.reward_lists
    }

    fn execute(&mut self, ctx: &JobContext) -> Result<()> {
        let env = Arc::clone(&self.env);
        let mut guard = lock(&env);
        ctx.emit(JobEvent::RunStarted(PreRunMetadata::new(
            &**guard,
            &ctx.problem_id,
            self.time_limit,
            None,
        )));
        ctx.hooks.update_problem_state(
            Some(starting_state(Some(self.num_episodes), self.time_limit, None)),
            Some(&ctx.problem_id),
        );
        tracing::info!(
            "start execution of {} using {}",
            ctx.problem_id,
            self.policy_name
        );
        let mut monitored =
            MonitoredEnv::new(&mut **guard, ctx, RlMode::Execution, self.time_limit);
        let result = run_episodes(&mut monitored, self.policy.as_mut(), self.num_episodes);
        self.reward_lists = monitored.reward_lists().to_vec();
        result
    }
}

fn run_episodes(
    env: &mut MonitoredEnv<'_>,
    policy: &mut dyn Policy,
    num_episodes: u64,
) -> Result<()> {
    for _ in 0..num_episodes {
        let mut observation = env.reset()?;
        loop {
            let action = policy.predict(&observation)?;
            let transition = env.step(&action)?;
            if transition.done() {
                break;
            }
            observation = transition.observation;
        }
    }
    Ok(())
}

impl Job for ExecJob {
    fn run(&mut self) -> Outcome {
        let ctx = self.ctx.clone();
        ctx.catching_exceptions("execution", || self.execute(&ctx))
    }
}

/// Builds [`ExecJob`]s from the selected environment and policy.
pub struct ExecJobBuilder {
    loader: ProblemLoader,
    signals: Signals,
    pub policy_provider: Option<Arc<dyn PolicyProvider>>,
    pub policy_name: Option<String>,
    pub num_episodes: u64,
    /// Zero takes the limit from the environment.
    pub time_limit: u64,
    last_job: Option<JobStatus>,
}

impl ExecJobBuilder {
    pub fn new(registry: Arc<ProblemRegistry>, hooks: Arc<GeoffHooks>, signals: Signals) -> Self {
        ExecJobBuilder {
            loader: ProblemLoader::new(registry, hooks),
            signals,
            policy_provider: None,
            policy_name: None,
            num_episodes: 1,
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

    fn load_policy(&self, env: &SharedEnv, name: &str) -> Result<Box<dyn Policy>> {
        match &self.policy_provider {
            Some(provider) => provider.load_policy(name),
            None => lock(env).load_policy(name),
        }
    }

    fn construct_job(&mut self, policy_name: String) -> Result<(ExecJob, JobContext)> {
        let (env, time_limit) = load_env(&mut self.loader, self.time_limit)?;
        let policy = self.load_policy(&env, &policy_name)?;
        let ctx = JobContext::new(
            self.loader.token_source().clone(),
            self.signals.clone(),
            Arc::clone(self.loader.hooks()),
            self.loader.problem_id(),
        );
        let job = ExecJob {
            ctx: ctx.clone(),
            env,
            policy,
            policy_name,
            num_episodes: self.num_episodes,
            time_limit,
            reward_lists: Vec::new(),
        };
        Ok((job, ctx))
    }
}

impl JobBuilder for ExecJobBuilder {
    type Job = ExecJob;

    fn build_job(&mut self) -> Result<SharedJob<ExecJob>> {
        let policy_name = self.policy_name.clone().ok_or(CannotBuildJob::NoPolicy)?;
        if self.last_job.as_ref().is_some_and(JobStatus::is_running) {
            return Err(CannotBuildJob::JobStillRunning.into());
        }
        self.loader.prepare_token(self.last_job.as_ref())?;
        match self.construct_job(policy_name) {
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
