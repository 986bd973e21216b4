//! Reinforcement-learning jobs: executing a trained policy and training an
//! agent.
//!
//! Both wrap the environment in a [`MonitoredEnv`] that reports every
//! episode and step to the signal bus and the lifecycle tracker.

pub mod execute;
pub mod train;

use std::path::Path;

use eyre::Result;
use ndarray::Array1;

use super::loader::{LoadedProblem, ProblemLoader, SharedEnv};
use super::signals::{iterations, stack_rows, JobEvent, PreRunMetadata, PreStepMetadata};
use super::JobContext;
use crate::error::CannotBuildJob;
use crate::lifecycle::{LimitedInt, ProblemState};
use crate::problem::{Env, Metadata, Problem, RenderMode, Transition};

pub use execute::{ExecJob, ExecJobBuilder};
pub use train::{TrainJob, TrainJobBuilder};

/// A trained policy that maps observations to actions.
pub trait Policy: Send {
    fn predict(&mut self, observation: &Array1<f64>) -> Result<Array1<f64>>;
}

/// Loads trained policies by name.
pub trait PolicyProvider: Send + Sync {
    fn load_policy(&self, name: &str) -> Result<Box<dyn Policy>>;
}

/// An agent that learns by interacting with an environment.
pub trait Agent: Send {
    fn learn(&mut self, env: &mut dyn Env, total_timesteps: u64) -> Result<()>;

    fn save(&self, path: &Path) -> Result<()>;
}

pub trait AgentFactory: Send + Sync {
    fn name(&self) -> &str;

    fn total_timesteps(&self) -> u64;

    fn make_agent(&self) -> Result<Box<dyn Agent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RlMode {
    Execution,
    Training,
}

/// Reports every episode and step of the wrapped environment, enforces the
/// time limit and checks for cancellation.
pub struct MonitoredEnv<'a> {
    env: &'a mut dyn Env,
    ctx: &'a JobContext,
    mode: RlMode,
    time_limit: Option<u64>,
    elapsed_steps: u64,
    episode_actions: Vec<Array1<f64>>,
    reward_lists: Vec<Vec<f64>>,
}

impl<'a> MonitoredEnv<'a> {
    pub(crate) fn new(
        env: &'a mut dyn Env,
        ctx: &'a JobContext,
        mode: RlMode,
        time_limit: Option<u64>,
    ) -> Self {
        MonitoredEnv {
            env,
            ctx,
            mode,
            time_limit,
            elapsed_steps: 0,
            episode_actions: Vec::new(),
            reward_lists: Vec::new(),
        }
    }

    pub fn reward_lists(&self) -> &[Vec<f64>] {
        &self.reward_lists
    }

    fn emit_all_signals(&self) {
        let rewards = self.reward_lists.last().cloned().unwrap_or_default();
        self.ctx.emit(JobEvent::RewardListsUpdated(self.reward_lists.clone()));
        self.ctx.emit(JobEvent::ObjectiveUpdated {
            iterations: iterations(rewards.len()),
            values: Array1::from(rewards),
        });
        self.ctx.emit(JobEvent::ActorsUpdated {
            iterations: iterations(self.episode_actions.len()),
            values: stack_rows(&self.episode_actions),
        });
    }
}

impl Problem for MonitoredEnv<'_> {
    fn metadata(&self) -> Metadata {
        self.env.metadata()
    }

    fn render(&mut self, mode: RenderMode) -> Result<()> {
        self.env.render(mode)
    }

    /// The job never closes the environment, its loader does.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Env for MonitoredEnv<'_> {
    fn action_dim(&self) -> usize {
        self.env.action_dim()
    }

    fn reset(&mut self) -> Result<Array1<f64>> {
        self.ctx.checkpoint()?;
        self.ctx
            .hooks
            .modify_problem_state(Some(&self.ctx.problem_id), |prev| {
                Some(ProblemState::advance_episode(prev))
            });
        self.ctx.emit(JobEvent::EpisodeStarted);
        self.elapsed_steps = 0;
        self.episode_actions.clear();
        self.reward_lists.push(Vec::new());
        self.env.reset()
    }

    fn step(&mut self, action: &Array1<f64>) -> Result<Transition> {
        self.ctx.checkpoint()?;
        std::thread::yield_now();
        let training = self.mode == RlMode::Training;
        self.ctx
            .hooks
            .modify_problem_state(Some(&self.ctx.problem_id), |prev| {
                Some(ProblemState::advance_rl_step(prev, training))
            });
        self.ctx
            .emit(JobEvent::StepStarted(PreStepMetadata { final_step: false }));
        let mut transition = self.env.step(action)?;
        self.elapsed_steps += 1;
        if self.time_limit.is_some_and(|limit| self.elapsed_steps >= limit) {
            transition.truncated = true;
        }
        self.episode_actions.push(action.clone());
        match self.reward_lists.last_mut() {
            Some(rewards) => rewards.push(transition.reward),
            None => self.reward_lists.push(vec![transition.reward]),
        }
        self.emit_all_signals();
        if self.env.metadata().renders(RenderMode::Figures) {
            self.env.render(RenderMode::Figures)?;
        }
        Ok(transition)
    }
}

impl PreRunMetadata {
    fn new(
        env: &dyn Env,
        env_id: &str,
        time_limit: Option<u64>,
        total_timesteps: Option<u64>,
    ) -> Self {
        PreRunMetadata {
            env_id: env_id.to_owned(),
            objective_name: "Reward".to_owned(),
            param_names: (1..=env.action_dim()).map(|i| format!("Action {i}")).collect(),
            time_limit,
            total_timesteps,
        }
    }
}

/// The state an RL run starts in. Episode and step counters are advanced
/// by the first reset and step.
fn starting_state(
    num_episodes: Option<u64>,
    time_limit: Option<u64>,
    total_timesteps: Option<u64>,
) -> ProblemState {
    ProblemState::StartingEpisode {
        episode: LimitedInt::with_max(0, num_episodes),
        max_step_per_episode: time_limit,
        total_step: Some(LimitedInt::with_max(0, total_timesteps)),
    }
}

/// Load the selected environment. A `time_limit` of zero falls back to the
/// episode limit in the environment's metadata.
fn load_env(loader: &mut ProblemLoader, time_limit: u64) -> Result<(SharedEnv, Option<u64>)> {
    match loader.get_or_make_problem()? {
        LoadedProblem::Env(env) => {
            let time_limit = match time_limit {
                0 => super::lock(&env).metadata().max_episode_steps,
                limit => Some(limit),
            };
            Ok((env, time_limit))
        }
        _ => Err(CannotBuildJob::NotAnEnvironment(loader.problem_id().to_owned()).into()),
    }
}
