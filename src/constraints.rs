//! Constraint functions and the per-step cache around them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eyre::Result;
use ndarray::{Array1, Array2};

pub type ConstraintFn = Arc<dyn Fn(&Array1<f64>) -> Result<Array1<f64>> + Send + Sync>;

/// `lb <= fun(x) <= ub`
#[derive(Clone)]
pub struct NonlinearConstraint {
    pub fun: ConstraintFn,
    pub lb: Array1<f64>,
    pub ub: Array1<f64>,
}

impl NonlinearConstraint {
    pub fn new<F>(fun: F, lb: Array1<f64>, ub: Array1<f64>) -> Self
    where
        F: Fn(&Array1<f64>) -> Result<Array1<f64>> + Send + Sync + 'static,
    {
        NonlinearConstraint {
            fun: Arc::new(fun),
            lb,
            ub,
        }
    }

    /// A constraint with a single scalar output.
    pub fn scalar<F>(fun: F, lb: f64, ub: f64) -> Self
    where
        F: Fn(&Array1<f64>) -> Result<f64> + Send + Sync + 'static,
    {
        Self::new(
            move |x| Ok(Array1::from_elem(1, fun(x)?)),
            Array1::from_elem(1, lb),
            Array1::from_elem(1, ub),
        )
    }
}

impl fmt::Debug for NonlinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonlinearConstraint")
            .field("lb", &self.lb)
            .field("ub", &self.ub)
            .finish_non_exhaustive()
    }
}

/// `lb <= a.dot(x) <= ub`
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    pub a: Array2<f64>,
    pub lb: Array1<f64>,
    pub ub: Array1<f64>,
}

#[derive(Debug, Clone)]
pub enum Constraint {
    Linear(LinearConstraint),
    Nonlinear(NonlinearConstraint),
}

impl From<LinearConstraint> for NonlinearConstraint {
    fn from(constraint: LinearConstraint) -> Self {
        let LinearConstraint { a, lb, ub } = constraint;
        NonlinearConstraint::new(move |x| Ok(a.dot(x)), lb, ub)
    }
}

impl From<Constraint> for NonlinearConstraint {
    fn from(constraint: Constraint) -> Self {
        match constraint {
            Constraint::Linear(linear) => linear.into(),
            Constraint::Nonlinear(nonlinear) => nonlinear,
        }
    }
}

type CacheKey = Vec<u64>;

/// A nonlinear constraint that evaluates each point at most once until its
/// cache is cleared.
///
/// The optimizer and the job both read constraint values for the same point.
/// The job clears the cache after every step.
pub struct CachedNonlinearConstraint {
    inner: NonlinearConstraint,
    cache: Mutex<HashMap<CacheKey, Array1<f64>>>,
}

impl CachedNonlinearConstraint {
    pub fn new(inner: NonlinearConstraint) -> Self {
        CachedNonlinearConstraint {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_any_constraint(constraint: Constraint) -> Self {
        Self::new(constraint.into())
    }

    pub fn fun(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        // `+ 0.0` turns -0.0 into 0.0, so both share one entry.
        let key: CacheKey = params.iter().map(|x| (x + 0.0).to_bits()).collect();
        if let Some(hit) = self.lock().get(&key) {
            return Ok(hit.clone());
        }
        // Errors are not cached, the next call tries again.
        let value = (self.inner.fun)(params)?;
        self.lock().insert(key, value.clone());
        Ok(value)
    }

    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.lock().len()
    }

    pub fn lb(&self) -> &Array1<f64> {
        &self.inner.lb
    }

    pub fn ub(&self) -> &Array1<f64> {
        &self.inner.ub
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Array1<f64>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CachedNonlinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedNonlinearConstraint")
            .field("inner", &self.inner)
            .field("cached", &self.cache_len())
            .finish()
    }
}

/// Concatenate scalar and vector constraint values into one flat array.
pub fn all_into_flat_array<'a, I>(values: I) -> Array1<f64>
where
    I: IntoIterator<Item = &'a Array1<f64>>,
{
    Array1::from_iter(values.into_iter().flat_map(|value| value.iter().copied()))
}
