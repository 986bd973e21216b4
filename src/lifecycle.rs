//! Phases an optimization problem passes through while it is constructed,
//! configured, optimized and closed.
//!
//! The current [`ProblemState`] is rendered into the description of every
//! trim, see [`crate::hooks`].

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("bad state transition: {0}")]
pub struct BadStateTransition(pub String);

/// A counter with an optional upper limit, shown as `value/max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitedInt {
    pub value: u64,
    pub max: Option<u64>,
}

impl LimitedInt {
    pub fn new(value: u64) -> Self {
        LimitedInt { value, max: None }
    }

    pub fn with_max(value: u64, max: Option<u64>) -> Self {
        LimitedInt { value, max }
    }

    pub fn incremented(self) -> Self {
        LimitedInt {
            value: self.value + 1,
            ..self
        }
    }

    pub fn with_value(self, value: u64) -> Self {
        LimitedInt { value, ..self }
    }
}

impl fmt::Display for LimitedInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}/{}", self.value, max),
            None => write!(f, "{}", self.value),
        }
    }
}

/// The name of the selected problem and the package that provides it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemInfo {
    pub name: String,
    pub source: Option<String>,
}

impl fmt::Display for ProblemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{} from {}", self.name, source),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProblemState {
    Constructing,
    Configuring,
    StartingOptimization {
        cycle_time: Option<f64>,
    },
    StartingEpisode {
        episode: LimitedInt,
        max_step_per_episode: Option<u64>,
        total_step: Option<LimitedInt>,
    },
    /// A numerical optimization step, or an RL execution step if `episode`
    /// is set.
    Optimizing {
        step: LimitedInt,
        episode: Option<LimitedInt>,
        total_step: Option<LimitedInt>,
        cycle_time: Option<f64>,
    },
    RlTraining {
        step: LimitedInt,
        total_step: LimitedInt,
        episode: LimitedInt,
    },
    /// The optimizer has converged and its result is being applied.
    FinalStep {
        step: LimitedInt,
        total_step: Option<LimitedInt>,
        cycle_time: Option<f64>,
    },
    Resetting {
        original_step: u64,
        cycle_time: Option<f64>,
    },
    Closing,
}

impl ProblemState {
    pub fn name(&self) -> &'static str {
        match self {
            ProblemState::Constructing => "constructing",
            ProblemState::Configuring => "configuring",
            ProblemState::StartingOptimization { .. } => "starting optimization",
            ProblemState::StartingEpisode { .. } => "starting episode",
            ProblemState::Optimizing { .. } => "optimizing",
            ProblemState::RlTraining { .. } => "training",
            ProblemState::FinalStep { .. } => "finishing",
            ProblemState::Resetting { .. } => "resetting",
            ProblemState::Closing => "closing",
        }
    }

    /// Whether trims sent in this state are exploratory and may be reverted.
    pub fn indicates_transient_trims(&self) -> bool {
        !matches!(
            self,
            ProblemState::FinalStep { .. } | ProblemState::Resetting { .. } | ProblemState::Closing
        )
    }

    pub fn cycle_time(&self) -> Option<f64> {
        match self {
            ProblemState::StartingOptimization { cycle_time }
            | ProblemState::Optimizing { cycle_time, .. }
            | ProblemState::FinalStep { cycle_time, .. }
            | ProblemState::Resetting { cycle_time, .. } => *cycle_time,
            _ => None,
        }
    }

    /// Replace the cycle time, leaving everything else untouched.
    pub fn with_cycle_time(mut self, time: f64) -> Result<Self, BadStateTransition> {
        match &mut self {
            ProblemState::StartingOptimization { cycle_time }
            | ProblemState::Optimizing { cycle_time, .. }
            | ProblemState::FinalStep { cycle_time, .. }
            | ProblemState::Resetting { cycle_time, .. } => *cycle_time = Some(time),
            other => {
                return Err(BadStateTransition(format!(
                    "cannot select a skeleton point while {}",
                    other.name()
                )))
            }
        }
        Ok(self)
    }

    pub fn incremented_step(self) -> Self {
        match self {
            ProblemState::Optimizing {
                step,
                episode,
                total_step,
                cycle_time,
            } => ProblemState::Optimizing {
                step: step.incremented(),
                episode,
                total_step: total_step.map(LimitedInt::incremented),
                cycle_time,
            },
            ProblemState::RlTraining {
                step,
                total_step,
                episode,
            } => ProblemState::RlTraining {
                step: step.incremented(),
                total_step: total_step.incremented(),
                episode,
            },
            other => other,
        }
    }

    /// Turn an optimization step into the final step of its run.
    pub fn finalized(self) -> Result<Self, BadStateTransition> {
        match self {
            ProblemState::Optimizing {
                episode: Some(_), ..
            } => Err(BadStateTransition(
                "cannot finalize an RL episode".to_owned(),
            )),
            ProblemState::Optimizing {
                step,
                total_step,
                cycle_time,
                ..
            } => Ok(ProblemState::FinalStep {
                step,
                total_step: total_step.map(LimitedInt::incremented),
                cycle_time,
            }),
            other => Err(BadStateTransition(format!(
                "cannot finalize while {}",
                other.name()
            ))),
        }
    }

    /// Start the next episode of an RL training run.
    pub fn restarted(self) -> Self {
        match self {
            ProblemState::RlTraining {
                step,
                total_step,
                episode,
            } => ProblemState::StartingEpisode {
                episode: episode.incremented(),
                max_step_per_episode: step.max,
                total_step: Some(total_step),
            },
            other => other,
        }
    }

    /// The state after a numerical-optimization step has started.
    pub fn advance_step(prev: Option<&ProblemState>, final_step: bool) -> ProblemState {
        match prev {
            Some(state @ ProblemState::Resetting { .. }) => state.clone(),
            Some(ProblemState::FinalStep {
                step,
                total_step,
                cycle_time,
            }) => ProblemState::Optimizing {
                step: step.with_value(1),
                episode: None,
                total_step: total_step.map(LimitedInt::incremented),
                cycle_time: *cycle_time,
            },
            Some(state @ ProblemState::Optimizing { .. }) if final_step => {
                state.clone().finalized().unwrap_or_else(|err| {
                    tracing::error!("{err}");
                    state.clone().incremented_step()
                })
            }
            Some(state @ ProblemState::Optimizing { .. }) => state.clone().incremented_step(),
            other => {
                tracing::error!("step started in unexpected state: {other:?}");
                ProblemState::Optimizing {
                    step: LimitedInt::new(1),
                    episode: None,
                    total_step: None,
                    cycle_time: other.and_then(ProblemState::cycle_time),
                }
            }
        }
    }

    /// The state after an RL episode has started.
    pub fn advance_episode(prev: Option<&ProblemState>) -> ProblemState {
        match prev {
            Some(ProblemState::StartingEpisode {
                episode,
                max_step_per_episode,
                total_step,
            }) => ProblemState::StartingEpisode {
                episode: episode.incremented(),
                max_step_per_episode: *max_step_per_episode,
                total_step: *total_step,
            },
            Some(ProblemState::Optimizing {
                step,
                episode: Some(episode),
                total_step,
                ..
            }) => ProblemState::StartingEpisode {
                episode: episode.incremented(),
                max_step_per_episode: step.max,
                total_step: *total_step,
            },
            Some(state @ ProblemState::RlTraining { .. }) => state.clone().restarted(),
            other => {
                tracing::error!("episode started in unexpected state: {other:?}");
                ProblemState::StartingEpisode {
                    episode: LimitedInt::new(1),
                    max_step_per_episode: None,
                    total_step: None,
                }
            }
        }
    }

    /// The state after an RL step has started, either while executing a
    /// policy or while training an agent.
    pub fn advance_rl_step(prev: Option<&ProblemState>, training: bool) -> ProblemState {
        match prev {
            Some(ProblemState::StartingEpisode {
                episode,
                max_step_per_episode,
                total_step,
            }) => {
                let step = LimitedInt::with_max(1, *max_step_per_episode);
                let total_step = total_step
                    .map(LimitedInt::incremented)
                    .unwrap_or(LimitedInt::new(1));
                if training {
                    ProblemState::RlTraining {
                        step,
                        total_step,
                        episode: *episode,
                    }
                } else {
                    ProblemState::Optimizing {
                        step,
                        episode: Some(*episode),
                        total_step: Some(total_step),
                        cycle_time: None,
                    }
                }
            }
            Some(state @ ProblemState::RlTraining { .. }) if training => {
                state.clone().incremented_step()
            }
            Some(
                state @ ProblemState::Optimizing {
                    episode: Some(_), ..
                },
            ) if !training => state.clone().incremented_step(),
            other => {
                tracing::error!("RL step started in unexpected state: {other:?}");
                let step = LimitedInt::new(1);
                if training {
                    ProblemState::RlTraining {
                        step,
                        total_step: step,
                        episode: step,
                    }
                } else {
                    ProblemState::Optimizing {
                        step,
                        episode: Some(step),
                        total_step: Some(step),
                        cycle_time: None,
                    }
                }
            }
        }
    }
}

struct CycleTime(Option<f64>);

impl fmt::Display for CycleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(time) => write!(f, ", t={time}ms"),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ProblemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemState::StartingOptimization { cycle_time } => {
                write!(f, "starting optimization{}", CycleTime(*cycle_time))
            }
            ProblemState::StartingEpisode { episode, .. } => {
                write!(f, "starting episode {episode}")
            }
            ProblemState::Optimizing {
                step,
                episode,
                total_step,
                cycle_time,
            } => {
                if let Some(episode) = episode {
                    write!(f, "episode {episode}, ")?;
                }
                write!(f, "step {step}")?;
                if let Some(total) = total_step {
                    write!(f, " ({total} over-all)")?;
                }
                write!(f, "{}", CycleTime(*cycle_time))
            }
            ProblemState::RlTraining {
                step,
                total_step,
                episode,
            } => write!(
                f,
                "training episode {episode}, step {step} ({total_step} over-all)"
            ),
            ProblemState::FinalStep {
                step,
                total_step,
                cycle_time,
            } => {
                write!(f, "finishing after {} steps", step.value)?;
                if let Some(total) = total_step {
                    write!(f, " ({total} over-all)")?;
                }
                write!(f, "{}", CycleTime(*cycle_time))
            }
            ProblemState::Resetting {
                original_step,
                cycle_time,
            } => write!(
                f,
                "resetting to step {original_step}{}",
                CycleTime(*cycle_time)
            ),
            other => f.write_str(other.name()),
        }
    }
}
