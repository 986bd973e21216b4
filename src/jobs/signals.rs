//! Notifications sent from a running job to the controlling thread.
//!
//! Jobs push [`JobEvent`]s into an unbounded channel from their worker
//! thread. The controlling thread drains the receiving end in its own loop,
//! so every event is handled there and never on the worker.

use ndarray::{Array1, Array2};
use serde_derive::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Sent once before a numerical optimization starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreOptimizationMetadata {
    pub problem_id: String,
    pub objective_name: String,
    pub param_names: Vec<String>,
    pub constraint_names: Vec<String>,
    pub max_function_evaluations: Option<u64>,
}

/// Sent once before an RL run starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreRunMetadata {
    pub env_id: String,
    pub objective_name: String,
    pub param_names: Vec<String>,
    pub time_limit: Option<u64>,
    pub total_timesteps: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreStepMetadata {
    pub final_step: bool,
}

/// Constraint values of every step so far, with the bounds they must obey.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedArray {
    pub values: Array2<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// A run-time error, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub summary: String,
    /// The full error chain.
    pub details: String,
}

impl From<&eyre::Report> for FailureReport {
    fn from(err: &eyre::Report) -> Self {
        FailureReport {
            summary: err.to_string(),
            details: format!("{err:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    OptimizationStarted(PreOptimizationMetadata),
    RunStarted(PreRunMetadata),
    SkeletonPointSelected(f64),
    EpisodeStarted,
    StepStarted(PreStepMetadata),
    /// Curves always carry the full history, indexed by `iterations`.
    ObjectiveUpdated {
        iterations: Array1<usize>,
        values: Array1<f64>,
    },
    ActorsUpdated {
        iterations: Array1<usize>,
        values: Array2<f64>,
    },
    ConstraintsUpdated {
        iterations: Array1<usize>,
        values: BoundedArray,
    },
    /// Rewards of every episode so far.
    RewardListsUpdated(Vec<Vec<f64>>),
    Failed(FailureReport),
    /// Always the last event of a run or reset.
    Finished {
        success: bool,
    },
    LogMessage(String),
}

/// The sending side of the job event bus.
///
/// A disconnected bus drops every event, which is handy for headless use.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    tx: Option<UnboundedSender<JobEvent>>,
}

impl Signals {
    pub fn new(tx: UnboundedSender<JobEvent>) -> Self {
        Signals { tx: Some(tx) }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> Option<UnboundedSender<JobEvent>> {
        self.tx.clone()
    }

    pub fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("Job event dropped, the receiver is gone");
            }
        }
    }
}

/// Create a connected bus and its receiving end.
pub fn channel() -> (Signals, UnboundedReceiver<JobEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Signals::new(tx), rx)
}

/// Stack rows of possibly different lengths, padding short rows with NaN.
pub(crate) fn stack_rows(rows: &[Array1<f64>]) -> Array2<f64> {
    let ncols = rows.iter().map(Array1::len).max().unwrap_or(0);
    let mut stacked = Array2::from_elem((rows.len(), ncols), f64::NAN);
    for (mut target, row) in stacked.rows_mut().into_iter().zip(rows) {
        target
            .slice_mut(ndarray::s![..row.len()])
            .assign(row);
    }
    stacked
}

pub(crate) fn iterations(len: usize) -> Array1<usize> {
    Array1::from_iter(0..len)
}
