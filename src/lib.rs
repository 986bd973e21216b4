//! GeOFF runs numerical optimizations and reinforcement-learning jobs
//! against control-system problems.
//!
//! A [`jobs::JobBuilder`] constructs the selected problem and turns it into
//! a job. The job runs on a [`jobs::WorkerPool`] thread and reports back
//! through the [`jobs::signals`] bus. Meanwhile [`hooks::GeoffHooks`]
//! describes what the job is currently doing to every control-system write.

pub mod cancellation;
pub mod constraints;
pub mod entrypoints;
pub mod error;
pub mod hooks;
pub mod jobs;
pub mod lifecycle;
pub mod logger;
pub mod optimizers;
pub mod problem;
pub mod registry;
pub mod settings;
pub mod tui;

pub mod prelude {
    pub use crate::cancellation::{CancelledError, Token, TokenSource};
    pub use crate::constraints::{
        CachedNonlinearConstraint, Constraint, LinearConstraint, NonlinearConstraint,
    };
    pub use crate::entrypoints::optimize;
    pub use crate::error::CannotBuildJob;
    pub use crate::hooks::{GeoffHooks, TrimHooks};
    pub use crate::jobs::builder::OptJobBuilder;
    pub use crate::jobs::opt_job::{FunctionOptimizableJob, OptJob, SingleOptimizableJob};
    pub use crate::jobs::rl::{
        Agent, AgentFactory, ExecJobBuilder, Policy, PolicyProvider, TrainJobBuilder,
    };
    pub use crate::jobs::signals::{self, JobEvent, Signals};
    pub use crate::jobs::{Job, JobBuilder, Outcome, SharedJob, WorkerPool};
    pub use crate::lifecycle::{LimitedInt, ProblemState};
    pub use crate::optimizers::{self, Optimizer, Solve};
    pub use crate::problem::{
        AnyProblem, Bounds, Env, FunctionOptimizable, Metadata, Problem, RenderMode,
        SingleOptimizable, Transition,
    };
    pub use crate::registry::{ControlSystem, ProblemContext, ProblemRegistry, ProblemSpec};
    pub use crate::settings::{read_settings, Settings};
    pub use crate::tui::state::RunMonitor;
}

//Tests
mod tests;
