//! Cooperative cancellation between the controlling thread and a running job.
//!
//! A [`TokenSource`] is held by whoever may ask a job to stop, usually a job
//! builder. Every job built from it polls the shared [`Token`] at its
//! checkpoints and unwinds with a [`CancelledError`] once a cancellation has
//! been requested. The same source is reused across runs, so a stale request
//! must be acknowledged with [`Token::complete_cancellation`] before it can be
//! cleared again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Raised to unwind a job after a cancellation has been requested.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CancelledError {
    /// Raised at one of the job's own checkpoints.
    #[error("cancelled by the user")]
    Benign,
    /// Raised from within a cancellable problem that received the token.
    #[error("cancelled from within the problem")]
    Problem,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cannot reset cancellation: the requested cancellation was never completed")]
pub struct CannotReset;

#[derive(Debug, Default)]
struct Flags {
    requested: AtomicBool,
    completed: AtomicBool,
}

/// The observing half of a cancellation pair.
#[derive(Debug, Clone, Default)]
pub struct Token {
    flags: Arc<Flags>,
}

impl Token {
    pub fn cancellation_requested(&self) -> bool {
        self.flags.requested.load(Ordering::Acquire)
    }

    pub fn cancellation_completed(&self) -> bool {
        self.flags.completed.load(Ordering::Acquire)
    }

    /// Checkpoint for code that received the token from outside, e.g. a
    /// cancellable problem.
    pub fn raise_if_cancellation_requested(&self) -> Result<(), CancelledError> {
        if self.cancellation_requested() {
            Err(CancelledError::Problem)
        } else {
            Ok(())
        }
    }

    /// Checkpoint used by the jobs themselves.
    pub(crate) fn checkpoint(&self) -> Result<(), CancelledError> {
        if self.cancellation_requested() {
            Err(CancelledError::Benign)
        } else {
            Ok(())
        }
    }

    /// Acknowledge that a requested cancellation has actually been handled.
    pub fn complete_cancellation(&self) {
        if !self.cancellation_requested() {
            tracing::warn!("completing a cancellation that was never requested");
            return;
        }
        self.flags.completed.store(true, Ordering::Release);
    }
}

/// The controlling half of a cancellation pair.
///
/// Cloning a source yields another handle to the same flags.
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    token: Token,
}

impl TokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Request cancellation. Calling this repeatedly has no further effect.
    pub fn cancel(&self) {
        self.token.flags.requested.store(true, Ordering::Release);
    }

    pub fn can_reset_cancellation(&self) -> bool {
        !self.token.cancellation_requested() || self.token.cancellation_completed()
    }

    pub fn reset_cancellation(&self) -> Result<(), CannotReset> {
        if !self.can_reset_cancellation() {
            return Err(CannotReset);
        }
        self.token.flags.requested.store(false, Ordering::Release);
        self.token.flags.completed.store(false, Ordering::Release);
        Ok(())
    }
}
