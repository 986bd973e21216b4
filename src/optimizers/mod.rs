//! Optimization algorithms as pluggable strategies.
//!
//! An [`Optimizer`] is configured by the user and turned into a [`Solve`]
//! for every optimization space it is applied to. The solve function calls
//! the objective until it converges, fails, or the objective returns an
//! error, which it must pass on unchanged.

mod nelder_mead;

use std::sync::Arc;

use eyre::Result;
use ndarray::Array1;

use crate::constraints::CachedNonlinearConstraint;
use crate::error::UnknownOptimizer;
use crate::problem::Bounds;
use crate::settings::OptimizerSettings;

pub use nelder_mead::NelderMead;

pub type ObjectiveFn<'a> = dyn FnMut(&Array1<f64>) -> Result<f64> + 'a;

pub trait Solve {
    /// Minimize `objective` starting from `x_0` and return the optimum.
    fn solve(&mut self, objective: &mut ObjectiveFn<'_>, x_0: Array1<f64>) -> Result<Array1<f64>>;
}

pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    fn make_solve_func(
        &self,
        bounds: &Bounds,
        constraints: &[Arc<CachedNonlinearConstraint>],
    ) -> Result<Box<dyn Solve>>;

    /// How many objective evaluations a run takes at most, if known.
    fn hint_max_evaluations(&self) -> Option<u64> {
        None
    }
}

pub fn all_optimizers() -> &'static [&'static str] {
    &[NelderMead::NAME]
}

pub fn from_settings(settings: &OptimizerSettings) -> Result<Arc<dyn Optimizer>> {
    match settings.name.as_str() {
        NelderMead::NAME => Ok(Arc::new(NelderMead::from_settings(settings))),
        other => Err(UnknownOptimizer(other.to_owned()).into()),
    }
}
