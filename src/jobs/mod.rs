//! Building jobs and running them on worker threads.
//!
//! A job is built synchronously on the controlling thread by a
//! [`JobBuilder`], handed to the [`WorkerPool`] as a [`SharedJob`], and
//! reports back exclusively through the [`signals`] bus. Whatever happens
//! inside a run, it ends with exactly one [`JobEvent::Finished`].

pub mod builder;
pub mod loader;
pub mod opt_job;
pub mod rl;
pub mod signals;
pub mod skeleton_points;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eyre::Result;

use crate::cancellation::{CancelledError, TokenSource};
use crate::hooks::GeoffHooks;
use signals::{FailureReport, JobEvent, Signals};

/// A unit of work that can run on a worker thread.
pub trait Job: Send + 'static {
    fn run(&mut self) -> Outcome;
}

/// A stateful factory for jobs of one kind.
pub trait JobBuilder {
    type Job: Job;

    fn build_job(&mut self) -> Result<SharedJob<Self::Job>>;
}

/// How a run or reset ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Cancelled,
    Failed,
}

#[derive(Debug, Default)]
struct StatusFlags {
    running: AtomicBool,
    cancellation_pending: AtomicBool,
}

/// Whether a job is between being started and sending its terminal event,
/// and how it left the shared cancellation token.
#[derive(Debug, Clone, Default)]
pub struct JobStatus(Arc<StatusFlags>);

impl JobStatus {
    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.0.running.store(running, Ordering::Release);
    }

    /// The job was cancelled from within its problem, which has not
    /// completed the cancellation yet.
    pub fn left_cancellation_pending(&self) -> bool {
        self.0.cancellation_pending.load(Ordering::Acquire)
    }

    fn set_cancellation_pending(&self, pending: bool) {
        self.0.cancellation_pending.store(pending, Ordering::Release);
    }
}

/// Everything a job needs to report on its progress.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub(crate) token_source: TokenSource,
    pub(crate) signals: Signals,
    pub(crate) hooks: Arc<GeoffHooks>,
    pub(crate) status: JobStatus,
    pub(crate) problem_id: String,
}

impl JobContext {
    pub(crate) fn new(
        token_source: TokenSource,
        signals: Signals,
        hooks: Arc<GeoffHooks>,
        problem_id: &str,
    ) -> Self {
        JobContext {
            token_source,
            signals,
            hooks,
            status: JobStatus::default(),
            problem_id: problem_id.to_owned(),
        }
    }

    pub(crate) fn checkpoint(&self) -> Result<(), CancelledError> {
        self.token_source.token().checkpoint()
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        self.signals.emit(event);
    }

    /// Run `body` and turn its result into exactly one terminal event.
    ///
    /// Cancellation is not an error: it is logged at INFO and only reported
    /// as an unsuccessful finish. Any other error is logged with its full
    /// chain and reported as [`JobEvent::Failed`] first.
    pub(crate) fn catching_exceptions<F>(&self, name: &str, body: F) -> Outcome
    where
        F: FnOnce() -> Result<()>,
    {
        let token = self.token_source.token();
        let mut pending = false;
        let outcome = match body() {
            Ok(()) => {
                tracing::info!("finished {name}");
                // The cancellation arrived after the last checkpoint.
                if token.cancellation_requested() {
                    token.complete_cancellation();
                    self.reset_cancellation();
                }
                Outcome::Success
            }
            Err(err) => match err.downcast_ref::<CancelledError>() {
                Some(CancelledError::Benign) => {
                    token.complete_cancellation();
                    self.reset_cancellation();
                    tracing::info!("cancelled {name} successfully!");
                    Outcome::Cancelled
                }
                Some(CancelledError::Problem) => {
                    if self.token_source.can_reset_cancellation() {
                        self.reset_cancellation();
                        tracing::info!("cancelled {name} successfully!");
                    } else {
                        tracing::warn!("cancelled {name} incompletely!");
                        tracing::warn!("the next run may be cancelled spuriously");
                        pending = true;
                    }
                    Outcome::Cancelled
                }
                None => {
                    tracing::error!("aborted {name}: {err:?}");
                    self.emit(JobEvent::Failed(FailureReport::from(&err)));
                    Outcome::Failed
                }
            },
        };
        self.hooks.update_problem_state(None, Some(&self.problem_id));
        self.status.set_cancellation_pending(pending);
        self.status.set_running(false);
        self.emit(JobEvent::Finished {
            success: outcome == Outcome::Success,
        });
        outcome
    }

    fn reset_cancellation(&self) {
        if let Err(err) = self.token_source.reset_cancellation() {
            tracing::warn!("{err}");
        }
    }
}

/// A job shared between the controlling thread and a worker.
///
/// Cancelling does not need the job lock, so it works while the job runs.
pub struct SharedJob<J> {
    job: Arc<Mutex<J>>,
    token_source: TokenSource,
    status: JobStatus,
}

impl<J> Clone for SharedJob<J> {
    fn clone(&self) -> Self {
        SharedJob {
            job: Arc::clone(&self.job),
            token_source: self.token_source.clone(),
            status: self.status.clone(),
        }
    }
}

impl<J> SharedJob<J> {
    pub(crate) fn new(job: J, context: &JobContext) -> Self {
        SharedJob {
            job: Arc::new(Mutex::new(job)),
            token_source: context.token_source.clone(),
            status: context.status.clone(),
        }
    }

    /// Ask the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        tracing::debug!("Cancellation requested");
        self.token_source.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn status(&self) -> JobStatus {
        self.status.clone()
    }

    /// Access the job. Blocks while a worker is using it.
    pub fn lock(&self) -> MutexGuard<'_, J> {
        lock(&self.job)
    }
}

/// The threads jobs run on.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|index| format!("geoff-worker-{index}"))
            .build()?;
        Ok(WorkerPool { pool })
    }

    /// Run `task` on the job in the background, e.g. `|job| job.run()`.
    pub fn start<J, F, T>(&self, job: &SharedJob<J>, task: F)
    where
        J: Send + 'static,
        F: FnOnce(&mut J) -> T + Send + 'static,
    {
        job.status.set_running(true);
        let job = job.clone();
        self.pool.spawn(move || {
            let mut guard = job.lock();
            task(&mut guard);
        });
    }
}

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
