use thiserror::Error;

/// Configuration errors raised synchronously while building a job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CannotBuildJob {
    #[error("no optimization problem selected")]
    NoProblem,
    #[error("no optimizer selected")]
    NoOptimizer,
    #[error("no policy selected")]
    NoPolicy,
    #[error("no agent selected")]
    NoAgent,
    #[error("no control-system context selected")]
    NoControlSystem,
    #[error("{0} is neither SingleOptimizable nor FunctionOptimizable")]
    NotOptimizable(String),
    #[error("{0} is not an environment")]
    NotAnEnvironment(String),
    #[error("the previous job has not finished yet")]
    JobStillRunning,
    #[error("the previous job never acknowledged its cancellation")]
    StaleCancellation,
}

/// The problem handed out an initial point the optimizer cannot start from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("bad initial point: {0}")]
pub struct BadInitialPoint(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NoSkeletonPoints(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("optimization failed: {0}")]
pub struct OptimizationFailed(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown optimization problem: {0:?}")]
pub struct UnknownProblem(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown optimizer: {0:?}")]
pub struct UnknownOptimizer(pub String);
