//! The interfaces an optimization problem or RL environment implements.
//!
//! Problems come in three kinds, see [`AnyProblem`]. Every kind shares the
//! [`Problem`] base for metadata, rendering and closing.

use std::fmt;

use eyre::Result;
use ndarray::{Array1, Zip};

use crate::constraints::Constraint;
use crate::jobs::rl::Policy;

/// Box bounds of an optimization space.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub low: Array1<f64>,
    pub high: Array1<f64>,
}

impl Bounds {
    pub fn new(low: Array1<f64>, high: Array1<f64>) -> Self {
        debug_assert_eq!(low.len(), high.len());
        Bounds { low, high }
    }

    /// The box `[-limit, limit]^dim`.
    pub fn symmetric(dim: usize, limit: f64) -> Self {
        Bounds::new(Array1::from_elem(dim, -limit), Array1::from_elem(dim, limit))
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Move every component of `point` onto the nearest bound if it lies
    /// outside of it. Points inside the box are returned unchanged.
    pub fn clip(&self, point: &Array1<f64>) -> Array1<f64> {
        Zip::from(point)
            .and(&self.low)
            .and(&self.high)
            .map_collect(|&x, &lo, &hi| x.max(lo).min(hi))
    }

    pub fn contains(&self, point: &Array1<f64>) -> bool {
        point.len() == self.dim()
            && Zip::from(point)
                .and(&self.low)
                .and(&self.high)
                .all(|&x, &lo, &hi| lo <= x && x <= hi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Human,
    Ansi,
    RgbArray,
    /// Figures that must be redrawn eagerly after every step.
    Figures,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Human => "human",
            RenderMode::Ansi => "ansi",
            RenderMode::RgbArray => "rgb_array",
            RenderMode::Figures => "matplotlib_figures",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a problem declares about itself before it is constructed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub render_modes: Vec<RenderMode>,
    /// Whether the problem wants the shared cancellation token.
    pub cancellable: bool,
    /// Whether the problem needs a control-system client to be constructed.
    pub needs_control_system: bool,
    pub machine: Option<String>,
    pub max_episode_steps: Option<u64>,
}

impl Metadata {
    pub fn renders(&self, mode: RenderMode) -> bool {
        self.render_modes.contains(&mode)
    }
}

pub trait Problem: Send {
    fn metadata(&self) -> Metadata {
        Metadata::default()
    }

    fn render(&mut self, _mode: RenderMode) -> Result<()> {
        Ok(())
    }

    /// Release everything the problem holds, e.g. control-system subscriptions.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A problem with a single flat parameter vector.
pub trait SingleOptimizable: Problem {
    fn optimization_space(&self) -> Bounds;

    fn get_initial_params(&mut self) -> Result<Array1<f64>>;

    fn compute_single_objective(&mut self, params: &Array1<f64>) -> Result<f64>;

    fn objective_name(&self) -> String {
        String::new()
    }

    fn param_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn constraint_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn constraints(&self) -> Vec<Constraint> {
        Vec::new()
    }
}

/// A problem that is optimized independently at several points in time.
///
/// Every method takes the cycle time (in ms) of the skeleton point it
/// concerns.
pub trait FunctionOptimizable: Problem {
    fn get_optimization_space(&self, cycle_time: f64) -> Bounds;

    fn get_initial_params(&mut self, cycle_time: f64) -> Result<Array1<f64>>;

    fn compute_function_objective(&mut self, cycle_time: f64, params: &Array1<f64>)
        -> Result<f64>;

    fn get_objective_function_name(&self) -> String {
        String::new()
    }

    fn get_param_function_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn constraint_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn constraints(&self) -> Vec<Constraint> {
        Vec::new()
    }

    /// Skeleton points the problem insists on, superseding the user's choice.
    fn override_skeleton_points(&self) -> Option<Vec<f64>> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Array1<f64>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}

impl Transition {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// An RL environment.
pub trait Env: Problem {
    fn action_dim(&self) -> usize;

    fn reset(&mut self) -> Result<Array1<f64>>;

    fn step(&mut self, action: &Array1<f64>) -> Result<Transition>;

    /// Environments may ship their own trained policies.
    fn load_policy(&self, name: &str) -> Result<Box<dyn Policy>> {
        eyre::bail!("environment does not provide a policy named {name:?}")
    }
}

/// A freshly constructed problem of any kind.
pub enum AnyProblem {
    Single(Box<dyn SingleOptimizable>),
    Function(Box<dyn FunctionOptimizable>),
    Env(Box<dyn Env>),
}

impl AnyProblem {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyProblem::Single(_) => "SingleOptimizable",
            AnyProblem::Function(_) => "FunctionOptimizable",
            AnyProblem::Env(_) => "Env",
        }
    }
}

impl fmt::Debug for AnyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyProblem::{}", self.kind())
    }
}
