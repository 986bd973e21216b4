use std::cell::RefCell;
use std::sync::Arc;

use argmin::core::{CostFunction, Error, Executor};
use argmin::solver::neldermead::NelderMead as NelderMeadSolver;
use eyre::Result;
use ndarray::Array1;

use super::{ObjectiveFn, Optimizer, Solve};
use crate::constraints::CachedNonlinearConstraint;
use crate::error::OptimizationFailed;
use crate::problem::Bounds;
use crate::settings::OptimizerSettings;

/// The downhill simplex method. Bounds are enforced by the job clipping every
/// proposed point, constraints are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    pub maxfun: u64,
    pub tolerance: f64,
    /// Absolute step for initial components that are zero.
    pub delta_if_zero: f64,
    /// Relative step for all other initial components.
    pub delta_if_nonzero: f64,
}

impl NelderMead {
    pub const NAME: &'static str = "Nelder-Mead";

    pub fn from_settings(settings: &OptimizerSettings) -> Self {
        NelderMead {
            maxfun: settings.maxfun,
            tolerance: settings.tolerance,
            delta_if_zero: settings.delta_if_zero,
            delta_if_nonzero: settings.delta_if_nonzero,
        }
    }
}

impl Default for NelderMead {
    fn default() -> Self {
        Self::from_settings(&OptimizerSettings::default())
    }
}

impl Optimizer for NelderMead {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn make_solve_func(
        &self,
        _bounds: &Bounds,
        constraints: &[Arc<CachedNonlinearConstraint>],
    ) -> Result<Box<dyn Solve>> {
        if !constraints.is_empty() {
            tracing::warn!("{} ignores {} constraints", Self::NAME, constraints.len());
        }
        Ok(Box::new(self.clone()))
    }

    fn hint_max_evaluations(&self) -> Option<u64> {
        Some(self.maxfun)
    }
}

impl Solve for NelderMead {
    fn solve(&mut self, objective: &mut ObjectiveFn<'_>, x_0: Array1<f64>) -> Result<Array1<f64>> {
        let simplex = create_initial_simplex(&x_0, self.delta_if_zero, self.delta_if_nonzero);
        let solver = NelderMeadSolver::new(simplex)
            .with_sd_tolerance(self.tolerance)
            .map_err(|err| OptimizationFailed(format!("{err:#}")))?;
        let record = RefCell::new(Evaluations::default());
        let cost = CallbackCost {
            objective: RefCell::new(objective),
            record: &record,
            maxfun: self.maxfun,
        };
        let result = Executor::new(cost, solver)
            .configure(|state| state.max_iters(self.maxfun))
            .run()
            .map(|res| res.state.best_param);
        let Evaluations {
            count,
            best,
            failure,
            exhausted,
        } = record.into_inner();

        if let Some(err) = failure {
            return Err(err);
        }
        tracing::debug!("{} used {count} evaluations", Self::NAME);
        let best_seen = best.map(|(x, _)| x);
        match result {
            Ok(best_param) => best_param
                .or(best_seen)
                .ok_or_else(|| OptimizationFailed("no point was evaluated".to_owned()).into()),
            Err(_) if exhausted => {
                tracing::warn!("maximum number of function evaluations ({}) reached", self.maxfun);
                best_seen.ok_or_else(|| OptimizationFailed("no point was evaluated".to_owned()).into())
            }
            Err(err) => Err(OptimizationFailed(format!("{err:#}")).into()),
        }
    }
}

#[derive(Default)]
struct Evaluations {
    count: u64,
    best: Option<(Array1<f64>, f64)>,
    failure: Option<eyre::Report>,
    exhausted: bool,
}

/// Feeds argmin from the job's step callback. Callback errors are kept aside
/// so they reach the caller unchanged.
struct CallbackCost<'a, 'b> {
    objective: RefCell<&'a mut ObjectiveFn<'b>>,
    record: &'a RefCell<Evaluations>,
    maxfun: u64,
}

impl CostFunction for CallbackCost<'_, '_> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let mut record = self.record.borrow_mut();
        if record.failure.is_some() {
            return Err(Error::msg("objective function failed earlier"));
        }
        if record.count >= self.maxfun {
            record.exhausted = true;
            return Err(Error::msg("evaluation budget exhausted"));
        }
        record.count += 1;
        let mut objective = self.objective.borrow_mut();
        match (&mut **objective)(param) {
            Ok(value) => {
                if record.best.as_ref().map_or(true, |(_, best)| value < *best) {
                    record.best = Some((param.clone(), value));
                }
                Ok(value)
            }
            Err(err) => {
                record.failure = Some(err);
                Err(Error::msg("objective function failed"))
            }
        }
    }
}

fn create_initial_simplex(
    initial_point: &Array1<f64>,
    delta_if_zero: f64,
    delta_if_nonzero: f64,
) -> Vec<Array1<f64>> {
    let mut vertices = Vec::with_capacity(initial_point.len() + 1);
    vertices.push(initial_point.to_owned());
    for i in 0..initial_point.len() {
        let mut perturbed_point = initial_point.to_owned();
        if initial_point[i] == 0.0 {
            perturbed_point[i] = delta_if_zero;
        } else {
            perturbed_point[i] *= 1.0 + delta_if_nonzero;
        }
        vertices.push(perturbed_point);
    }
    vertices
}
