//! Numerical optimization jobs.
//!
//! Both kinds of job funnel every evaluation through the same step callback,
//! [`OptJobCore::env_callback`]. It checks for cancellation, clips the
//! proposed point, evaluates objective and constraints, and only then appends
//! to the three logs. This keeps them the same length even when a step fails
//! halfway.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use eyre::{Result, WrapErr};
use ndarray::Array1;

use super::loader::{SharedFunction, SharedSingle};
use super::signals::{
    iterations, stack_rows, BoundedArray, JobEvent, PreOptimizationMetadata, PreStepMetadata,
};
use super::skeleton_points::{gather_skeleton_points, SkeletonPoints};
use super::{lock, Job, JobContext, Outcome};
use crate::constraints::{all_into_flat_array, CachedNonlinearConstraint, Constraint};
use crate::error::BadInitialPoint;
use crate::lifecycle::{LimitedInt, ProblemState};
use crate::optimizers::Optimizer;
use crate::problem::{Bounds, FunctionOptimizable, Metadata, RenderMode, SingleOptimizable};

/// What the step callback needs from a problem.
trait Evaluate {
    fn optimization_space(&self) -> Bounds;
    fn compute_loss(&mut self, params: &Array1<f64>) -> Result<f64>;
    fn metadata(&self) -> Metadata;
    fn render(&mut self, mode: RenderMode) -> Result<()>;
}

struct SingleTarget<'a>(&'a mut dyn SingleOptimizable);

impl Evaluate for SingleTarget<'_> {
    fn optimization_space(&self) -> Bounds {
        self.0.optimization_space()
    }

    fn compute_loss(&mut self, params: &Array1<f64>) -> Result<f64> {
        self.0.compute_single_objective(params)
    }

    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn render(&mut self, mode: RenderMode) -> Result<()> {
        self.0.render(mode)
    }
}

struct FunctionTarget<'a> {
    problem: &'a mut dyn FunctionOptimizable,
    cycle_time: f64,
}

impl Evaluate for FunctionTarget<'_> {
    fn optimization_space(&self) -> Bounds {
        self.problem.get_optimization_space(self.cycle_time)
    }

    fn compute_loss(&mut self, params: &Array1<f64>) -> Result<f64> {
        self.problem.compute_function_objective(self.cycle_time, params)
    }

    fn metadata(&self) -> Metadata {
        self.problem.metadata()
    }

    fn render(&mut self, mode: RenderMode) -> Result<()> {
        self.problem.render(mode)
    }
}

/// State and behavior shared by both kinds of optimization job.
pub struct OptJobCore {
    ctx: JobContext,
    optimizer: Arc<dyn Optimizer>,
    wrapped_constraints: Vec<Arc<CachedNonlinearConstraint>>,
    objective_name: String,
    param_names: Vec<String>,
    constraint_names: Vec<String>,
    actions_log: Vec<Array1<f64>>,
    objectives_log: Vec<f64>,
    constraints_log: Vec<Array1<f64>>,
}

impl OptJobCore {
    fn new(
        ctx: JobContext,
        optimizer: Arc<dyn Optimizer>,
        constraints: Vec<Constraint>,
        objective_name: String,
        param_names: Vec<String>,
        constraint_names: Vec<String>,
        dim: usize,
    ) -> Self {
        let wrapped_constraints: Vec<_> = constraints
            .into_iter()
            .map(|constraint| Arc::new(CachedNonlinearConstraint::from_any_constraint(constraint)))
            .collect();
        let num_constraint_values = wrapped_constraints.iter().map(|c| c.lb().len()).sum();
        OptJobCore {
            ctx,
            optimizer,
            wrapped_constraints,
            objective_name,
            param_names: default_names(param_names, dim, "Actor"),
            constraint_names: default_names(constraint_names, num_constraint_values, "Constraint"),
            actions_log: Vec::new(),
            objectives_log: Vec::new(),
            constraints_log: Vec::new(),
        }
    }

    pub fn problem_id(&self) -> &str {
        &self.ctx.problem_id
    }

    pub fn optimizer_name(&self) -> &str {
        self.optimizer.name()
    }

    pub fn objective_name(&self) -> &str {
        &self.objective_name
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn constraint_names(&self) -> &[String] {
        &self.constraint_names
    }

    pub fn actions_log(&self) -> &[Array1<f64>] {
        &self.actions_log
    }

    pub fn objectives_log(&self) -> &[f64] {
        &self.objectives_log
    }

    pub fn constraints_log(&self) -> &[Array1<f64>] {
        &self.constraints_log
    }

    pub fn wrapped_constraints(&self) -> &[Arc<CachedNonlinearConstraint>] {
        &self.wrapped_constraints
    }

    fn optimization_started(&self) {
        let max_function_evaluations = self.optimizer.hint_max_evaluations();
        tracing::info!(
            "start optimization of {} using {}",
            self.ctx.problem_id,
            self.optimizer.name()
        );
        self.ctx.hooks.update_problem_state(
            Some(ProblemState::Optimizing {
                step: LimitedInt::with_max(0, max_function_evaluations),
                episode: None,
                total_step: None,
                cycle_time: None,
            }),
            Some(&self.ctx.problem_id),
        );
        self.ctx
            .emit(JobEvent::OptimizationStarted(PreOptimizationMetadata {
                problem_id: self.ctx.problem_id.clone(),
                objective_name: self.objective_name.clone(),
                param_names: self.param_names.clone(),
                constraint_names: self.constraint_names.clone(),
                max_function_evaluations,
            }));
    }

    fn skeleton_point_selected(&self, cycle_time: f64) {
        self.ctx
            .hooks
            .modify_problem_state(Some(&self.ctx.problem_id), |prev| {
                let state = prev?.clone();
                match state.clone().with_cycle_time(cycle_time) {
                    Ok(next) => Some(next),
                    Err(err) => {
                        tracing::error!("{err}");
                        Some(state)
                    }
                }
            });
        self.ctx.emit(JobEvent::SkeletonPointSelected(cycle_time));
    }

    fn step_started(&self, final_step: bool) {
        self.ctx
            .hooks
            .modify_problem_state(Some(&self.ctx.problem_id), |prev| {
                Some(ProblemState::advance_step(prev, final_step))
            });
        self.ctx.emit(JobEvent::StepStarted(PreStepMetadata { final_step }));
    }

    /// Evaluate one point proposed by the optimizer and return its loss.
    fn env_callback(
        &mut self,
        target: &mut dyn Evaluate,
        action: &Array1<f64>,
        final_step: bool,
    ) -> Result<f64> {
        self.ctx.checkpoint()?;
        thread::yield_now();
        let space = target.optimization_space();
        if action.len() != space.dim() {
            eyre::bail!(
                "optimizer proposed {} parameters, the optimization space has {}",
                action.len(),
                space.dim()
            );
        }
        let clipped = space.clip(action);
        if &clipped != action {
            tracing::debug!("Clipped proposed point {action} into bounds: {clipped}");
        }
        let action = clipped;
        self.step_started(final_step);
        let loss = target.compute_loss(&action)?;
        let constraint_values = self.evaluate_constraints(&action)?;
        self.actions_log.push(action);
        self.objectives_log.push(loss);
        if let Some(values) = constraint_values {
            self.constraints_log.push(values);
        }
        self.emit_all_signals();
        self.render_env(target)?;
        Ok(loss)
    }

    fn evaluate_constraints(&self, action: &Array1<f64>) -> Result<Option<Array1<f64>>> {
        if self.wrapped_constraints.is_empty() {
            return Ok(None);
        }
        let values: Result<Vec<_>> = self
            .wrapped_constraints
            .iter()
            .map(|constraint| constraint.fun(action))
            .collect();
        for constraint in &self.wrapped_constraints {
            constraint.clear_cache();
        }
        Ok(Some(all_into_flat_array(&values?)))
    }

    fn emit_all_signals(&self) {
        let iterations = iterations(self.objectives_log.len());
        self.ctx.emit(JobEvent::ObjectiveUpdated {
            iterations: iterations.clone(),
            values: Array1::from(self.objectives_log.clone()),
        });
        self.ctx.emit(JobEvent::ActorsUpdated {
            iterations: iterations.clone(),
            values: stack_rows(&self.actions_log),
        });
        if !self.wrapped_constraints.is_empty() {
            self.ctx.emit(JobEvent::ConstraintsUpdated {
                iterations,
                values: BoundedArray {
                    values: stack_rows(&self.constraints_log),
                    lower: all_into_flat_array(self.wrapped_constraints.iter().map(|c| c.lb())),
                    upper: all_into_flat_array(self.wrapped_constraints.iter().map(|c| c.ub())),
                },
            });
        }
    }

    fn render_env(&self, target: &mut dyn Evaluate) -> Result<()> {
        if target.metadata().renders(RenderMode::Figures) {
            target.render(RenderMode::Figures)?;
        }
        Ok(())
    }

    fn format_point(&self, point: &Array1<f64>) -> String {
        self.param_names
            .iter()
            .zip(point)
            .map(|(name, value)| format!("{name}:\t{value}\n"))
            .collect()
    }

    /// Write the evaluated history as CSV: actors, constraints, objective.
    ///
    /// Two `#` lines name the columns, first by kind and then by display
    /// name. Fields are separated by `", "`.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        const SEPARATOR: &str = ", ";
        let path = path.as_ref();
        let file = File::create(path)
            .wrap_err_with(|| format!("cannot create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let kinds = (1..=self.param_names.len())
            .map(|i| format!("norm_actor_{i}"))
            .chain((1..=self.constraint_names.len()).map(|i| format!("constraint_{i}")))
            .chain(std::iter::once("objective".to_owned()));
        let names = self
            .param_names
            .iter()
            .chain(&self.constraint_names)
            .cloned()
            .chain(std::iter::once(self.objective_name.clone()));
        writeln!(out, "# {}", kinds.collect::<Vec<_>>().join(SEPARATOR))?;
        writeln!(out, "# {}", names.collect::<Vec<_>>().join(SEPARATOR))?;

        for (i, (action, objective)) in self.actions_log.iter().zip(&self.objectives_log).enumerate()
        {
            let mut record: Vec<String> = action.iter().map(f64::to_string).collect();
            if let Some(constraints) = self.constraints_log.get(i) {
                record.extend(constraints.iter().map(f64::to_string));
            }
            record.push(objective.to_string());
            writeln!(out, "{}", record.join(SEPARATOR))?;
        }
        out.flush()?;
        Ok(())
    }
}

fn default_names(names: Vec<String>, len: usize, prefix: &str) -> Vec<String> {
    if names.is_empty() {
        (1..=len).map(|i| format!("{prefix} {i}")).collect()
    } else {
        names
    }
}

/// Reject initial points the optimizer cannot start from.
fn validate_x0(x_0: Array1<f64>, space: &Bounds) -> Result<Array1<f64>, BadInitialPoint> {
    if x_0.is_empty() {
        return Err(BadInitialPoint("initial point is empty".to_owned()));
    }
    if x_0.len() != space.dim() {
        return Err(BadInitialPoint(format!(
            "initial point has {} parameters, the optimization space has {}",
            x_0.len(),
            space.dim()
        )));
    }
    if x_0.iter().any(|x| !x.is_finite()) {
        return Err(BadInitialPoint(format!("not a finite point: {x_0}")));
    }
    Ok(x_0)
}

pub struct SingleOptimizableJob {
    core: OptJobCore,
    problem: SharedSingle,
    x_0: Array1<f64>,
}

impl SingleOptimizableJob {
    pub(crate) fn new(
        ctx: JobContext,
        optimizer: Arc<dyn Optimizer>,
        problem: SharedSingle,
    ) -> Result<Self> {
        let (core, x_0) = {
            let mut guard = lock(&problem);
            let space = guard.optimization_space();
            let unvalidated = guard.get_initial_params()?;
            let x_0 = validate_x0(unvalidated.clone(), &space).map_err(|err| {
                tracing::warn!("x0 = {unvalidated}");
                err
            })?;
            let core = OptJobCore::new(
                ctx,
                optimizer,
                guard.constraints(),
                guard.objective_name(),
                guard.param_names(),
                guard.constraint_names(),
                space.dim(),
            );
            (core, x_0)
        };
        Ok(SingleOptimizableJob { core, problem, x_0 })
    }

    pub fn run(&mut self) -> Outcome {
        let ctx = self.core.ctx.clone();
        ctx.catching_exceptions("optimization", || self.run_optimization())
    }

    fn run_optimization(&mut self) -> Result<()> {
        let mut problem = lock(&self.problem);
        let core = &mut self.core;
        core.optimization_started();
        let optimizer = Arc::clone(&core.optimizer);
        let space = problem.optimization_space();
        let mut solve = optimizer.make_solve_func(&space, &core.wrapped_constraints)?;
        let mut target = SingleTarget(&mut **problem);
        let optimum = solve.solve(
            &mut |x: &Array1<f64>| core.env_callback(&mut target, x, false),
            self.x_0.clone(),
        )?;
        core.env_callback(&mut target, &optimum, true)?;
        Ok(())
    }

    /// Evaluate the problem once more at its initial point.
    pub fn reset(&mut self) -> Outcome {
        let ctx = self.core.ctx.clone();
        ctx.catching_exceptions("reset", || {
            ctx.hooks.update_problem_state(
                Some(ProblemState::Resetting {
                    original_step: 1,
                    cycle_time: None,
                }),
                Some(&ctx.problem_id),
            );
            tracing::info!(
                "start reset of {} using {}",
                ctx.problem_id,
                self.core.optimizer.name()
            );
            let mut problem = lock(&self.problem);
            let mut target = SingleTarget(&mut **problem);
            self.core.env_callback(&mut target, &self.x_0, false)?;
            Ok(())
        })
    }

    pub fn x_0(&self) -> &Array1<f64> {
        &self.x_0
    }

    pub fn format_reset_point(&self) -> String {
        self.core.format_point(&self.x_0)
    }
}

pub struct FunctionOptimizableJob {
    core: OptJobCore,
    problem: SharedFunction,
    skeleton_points: SkeletonPoints,
    all_x_0: Vec<Array1<f64>>,
}

impl FunctionOptimizableJob {
    pub(crate) fn new(
        ctx: JobContext,
        optimizer: Arc<dyn Optimizer>,
        problem: SharedFunction,
        user_points: &[f64],
    ) -> Result<Self> {
        let mut guard = lock(&problem);
        let skeleton_points = gather_skeleton_points(&**guard, user_points)?;
        let mut all_x_0 = Vec::with_capacity(skeleton_points.len());
        let mut dim = 0;
        let core = OptJobCore::new(
            ctx,
            optimizer,
            guard.constraints(),
            guard.get_objective_function_name(),
            guard.get_param_function_names(),
            guard.constraint_names(),
            0,
        );
        for &point in skeleton_points.iter() {
            core.skeleton_point_selected(point);
            let space = guard.get_optimization_space(point);
            dim = dim.max(space.dim());
            let unvalidated = guard.get_initial_params(point)?;
            let x_0 = validate_x0(unvalidated.clone(), &space).map_err(|err| {
                tracing::warn!("t = {point} ms, x0 = {unvalidated}");
                err
            })?;
            all_x_0.push(x_0);
        }
        drop(guard);
        let mut core = core;
        core.param_names = default_names(std::mem::take(&mut core.param_names), dim, "Actor");
        Ok(FunctionOptimizableJob {
            core,
            problem,
            skeleton_points,
            all_x_0,
        })
    }

    pub fn run(&mut self) -> Outcome {
        let ctx = self.core.ctx.clone();
        ctx.catching_exceptions("optimization", || self.run_optimization())
    }

    fn run_optimization(&mut self) -> Result<()> {
        let mut problem = lock(&self.problem);
        let core = &mut self.core;
        core.optimization_started();
        let optimizer = Arc::clone(&core.optimizer);
        for (&point, x_0) in self.skeleton_points.iter().zip(&self.all_x_0) {
            core.ctx.checkpoint()?;
            tracing::info!("next skeleton point: {point}");
            tracing::info!("x0 = {x_0}");
            core.skeleton_point_selected(point);
            let space = problem.get_optimization_space(point);
            let mut solve = optimizer.make_solve_func(&space, &core.wrapped_constraints)?;
            let mut target = FunctionTarget {
                problem: &mut **problem,
                cycle_time: point,
            };
            let optimum = solve.solve(
                &mut |x: &Array1<f64>| core.env_callback(&mut target, x, false),
                x_0.clone(),
            )?;
            core.env_callback(&mut target, &optimum, true)?;
        }
        Ok(())
    }

    /// Evaluate the problem at the initial point of every skeleton point.
    pub fn reset(&mut self) -> Outcome {
        let ctx = self.core.ctx.clone();
        ctx.catching_exceptions("reset", || {
            ctx.hooks.update_problem_state(
                Some(ProblemState::Resetting {
                    original_step: 1,
                    cycle_time: None,
                }),
                Some(&ctx.problem_id),
            );
            tracing::info!(
                "start reset of {} using {}",
                ctx.problem_id,
                self.core.optimizer.name()
            );
            let mut problem = lock(&self.problem);
            let core = &mut self.core;
            for (&point, x_0) in self.skeleton_points.iter().zip(&self.all_x_0) {
                core.ctx.checkpoint()?;
                tracing::info!("next skeleton point: {point}");
                core.skeleton_point_selected(point);
                let mut target = FunctionTarget {
                    problem: &mut **problem,
                    cycle_time: point,
                };
                core.env_callback(&mut target, x_0, false)?;
            }
            Ok(())
        })
    }

    pub fn skeleton_points(&self) -> &[f64] {
        &self.skeleton_points
    }

    pub fn all_x_0(&self) -> &[Array1<f64>] {
        &self.all_x_0
    }

    pub fn format_reset_point(&self) -> String {
        let hline = "-".repeat(40);
        self.skeleton_points
            .iter()
            .zip(&self.all_x_0)
            .map(|(point, x_0)| {
                format!("{hline}\nAt t={point} ms:\n{}", self.core.format_point(x_0))
            })
            .collect()
    }
}

/// An optimization job of either kind, chosen by the kind of problem.
pub enum OptJob {
    Single(SingleOptimizableJob),
    Function(FunctionOptimizableJob),
}

impl OptJob {
    pub fn core(&self) -> &OptJobCore {
        match self {
            OptJob::Single(job) => &job.core,
            OptJob::Function(job) => &job.core,
        }
    }

    pub fn reset(&mut self) -> Outcome {
        match self {
            OptJob::Single(job) => job.reset(),
            OptJob::Function(job) => job.reset(),
        }
    }

    pub fn format_reset_point(&self) -> String {
        match self {
            OptJob::Single(job) => job.format_reset_point(),
            OptJob::Function(job) => job.format_reset_point(),
        }
    }

    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        self.core().export_csv(path)
    }
}

impl Job for OptJob {
    fn run(&mut self) -> Outcome {
        match self {
            OptJob::Single(job) => job.run(),
            OptJob::Function(job) => job.run(),
        }
    }
}
