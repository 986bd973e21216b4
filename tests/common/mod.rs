#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use eyre::Result;
use geoff::hooks::GeoffHooks;
use geoff::jobs::signals;
use geoff::optimizers::ObjectiveFn;
use geoff::prelude::*;
use ndarray::{array, Array1};
use tokio::sync::mpsc::UnboundedReceiver;

pub const QUADRATIC: &str = "Quadratic-v0";
pub const CYCLES: &str = "Cycles-v0";
pub const WALK: &str = "Walk-v0";

/// What the mock problems were asked to do, in order.
#[derive(Debug, Default, Clone)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

/// Records the trim annotation of every simulated control-system write.
#[derive(Debug)]
pub struct TrimLog {
    hooks: Arc<GeoffHooks>,
    entries: Mutex<Vec<(String, bool)>>,
}

impl TrimLog {
    pub fn new(hooks: Arc<GeoffHooks>) -> Arc<Self> {
        Arc::new(TrimLog {
            hooks,
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn record(&self) {
        let entry = (
            self.hooks.trim_description(None),
            self.hooks.trim_transient(None),
        );
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<(String, bool)> {
        self.entries.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct QuadraticSetup {
    pub calls: Calls,
    pub trims: Option<Arc<TrimLog>>,
    pub constraints: Vec<Constraint>,
    pub x_0: Option<Array1<f64>>,
}

/// Minimizes the squared norm in a 3D box, starting from `[3, 4, 5]`.
pub struct Quadratic {
    setup: QuadraticSetup,
}

impl Quadratic {
    pub fn new(setup: QuadraticSetup) -> Self {
        Quadratic { setup }
    }
}

impl Problem for Quadratic {
    fn metadata(&self) -> Metadata {
        Metadata {
            render_modes: vec![RenderMode::Figures],
            ..Metadata::default()
        }
    }

    fn render(&mut self, mode: RenderMode) -> Result<()> {
        self.setup.calls.push(format!("render {mode}"));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.setup.calls.push("close");
        Ok(())
    }
}

impl SingleOptimizable for Quadratic {
    fn optimization_space(&self) -> Bounds {
        Bounds::symmetric(3, 10.0)
    }

    fn get_initial_params(&mut self) -> Result<Array1<f64>> {
        self.setup.calls.push("initial params");
        Ok(self.setup.x_0.clone().unwrap_or(array![3.0, 4.0, 5.0]))
    }

    fn compute_single_objective(&mut self, params: &Array1<f64>) -> Result<f64> {
        self.setup.calls.push("objective");
        if let Some(trims) = &self.setup.trims {
            trims.record();
        }
        Ok(params.dot(params))
    }

    fn objective_name(&self) -> String {
        "Norm".to_string()
    }

    fn constraints(&self) -> Vec<Constraint> {
        self.setup.constraints.clone()
    }
}

pub fn quadratic_spec(setup: QuadraticSetup) -> ProblemSpec {
    ProblemSpec::new(QUADRATIC, Metadata::default(), move |_| {
        Ok(AnyProblem::Single(Box::new(Quadratic::new(setup.clone()))))
    })
    .with_source("geoff-mocks 0.1")
}

/// A constraint that counts its evaluations and fails on call `fail_at`.
pub fn counting_constraint(counter: Arc<AtomicUsize>, fail_at: Option<usize>) -> Constraint {
    Constraint::Nonlinear(NonlinearConstraint::scalar(
        move |x| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(call) == fail_at {
                eyre::bail!("hardware read failure");
            }
            Ok(x.sum())
        },
        -100.0,
        100.0,
    ))
}

#[derive(Clone, Default)]
pub struct CyclesSetup {
    pub calls: Calls,
    pub trims: Option<Arc<TrimLog>>,
    pub override_points: Option<Vec<f64>>,
}

/// A 2D problem whose initial point depends on the cycle time.
pub struct Cycles {
    setup: CyclesSetup,
}

impl Problem for Cycles {
    fn close(&mut self) -> Result<()> {
        self.setup.calls.push("close");
        Ok(())
    }
}

impl FunctionOptimizable for Cycles {
    fn get_optimization_space(&self, _cycle_time: f64) -> Bounds {
        Bounds::symmetric(2, 5.0)
    }

    fn get_initial_params(&mut self, cycle_time: f64) -> Result<Array1<f64>> {
        self.setup.calls.push(format!("initial params t={cycle_time}"));
        Ok(array![cycle_time / 1000.0, 1.0])
    }

    fn compute_function_objective(&mut self, cycle_time: f64, params: &Array1<f64>) -> Result<f64> {
        self.setup.calls.push(format!("objective t={cycle_time}"));
        if let Some(trims) = &self.setup.trims {
            trims.record();
        }
        Ok(params.dot(params) + cycle_time)
    }

    fn get_param_function_names(&self) -> Vec<String> {
        vec!["kick".to_string(), "tune".to_string()]
    }

    fn override_skeleton_points(&self) -> Option<Vec<f64>> {
        self.setup.override_points.clone()
    }
}

pub fn cycles_spec(setup: CyclesSetup) -> ProblemSpec {
    ProblemSpec::new(CYCLES, Metadata::default(), move |_| {
        Ok(AnyProblem::Function(Box::new(Cycles {
            setup: setup.clone(),
        })))
    })
}

pub type OnCall = Arc<dyn Fn(usize) + Send + Sync>;

/// Calls the objective a fixed number of times around `x_0` and returns
/// the best point it saw.
#[derive(Clone)]
pub struct FixedCalls {
    pub calls: usize,
    /// Relative change of the proposal per call.
    pub growth: f64,
    /// Called with the number of evaluations so far, before each one.
    pub on_call: Option<OnCall>,
    pub solves: Calls,
}

impl FixedCalls {
    pub fn new(calls: usize) -> Self {
        FixedCalls {
            calls,
            growth: -0.05,
            on_call: None,
            solves: Calls::default(),
        }
    }
}

struct FixedCallsSolve {
    calls: usize,
    growth: f64,
    on_call: Option<OnCall>,
}

impl Solve for FixedCallsSolve {
    fn solve(
        &mut self,
        objective: &mut ObjectiveFn<'_>,
        x_0: Array1<f64>,
    ) -> Result<Array1<f64>> {
        let mut best = (f64::INFINITY, x_0.clone());
        for i in 0..self.calls {
            if let Some(on_call) = &self.on_call {
                on_call(i);
            }
            let x = &x_0 * (1.0 + self.growth * i as f64);
            let loss = objective(&x)?;
            if loss < best.0 {
                best = (loss, x);
            }
        }
        Ok(best.1)
    }
}

impl Optimizer for FixedCalls {
    fn name(&self) -> &str {
        "FixedCalls"
    }

    fn make_solve_func(
        &self,
        bounds: &Bounds,
        _constraints: &[Arc<CachedNonlinearConstraint>],
    ) -> Result<Box<dyn Solve>> {
        self.solves.push(format!("solve dim={}", bounds.dim()));
        Ok(Box::new(FixedCallsSolve {
            calls: self.calls,
            growth: self.growth,
            on_call: self.on_call.clone(),
        }))
    }

    fn hint_max_evaluations(&self) -> Option<u64> {
        Some(self.calls as u64)
    }
}

/// A walk on the number line that ends when the position reaches `goal`.
pub struct Walk {
    position: f64,
    goal: f64,
    calls: Calls,
    max_episode_steps: Option<u64>,
}

impl Problem for Walk {
    fn metadata(&self) -> Metadata {
        Metadata {
            max_episode_steps: self.max_episode_steps,
            ..Metadata::default()
        }
    }

    fn close(&mut self) -> Result<()> {
        self.calls.push("close");
        Ok(())
    }
}

impl Env for Walk {
    fn action_dim(&self) -> usize {
        1
    }

    fn reset(&mut self) -> Result<Array1<f64>> {
        self.calls.push("reset");
        self.position = 0.0;
        Ok(array![self.position])
    }

    fn step(&mut self, action: &Array1<f64>) -> Result<Transition> {
        self.calls.push("step");
        self.position += action[0];
        Ok(Transition {
            observation: array![self.position],
            reward: -(self.goal - self.position).abs(),
            terminated: self.position >= self.goal,
            truncated: false,
        })
    }

    fn load_policy(&self, name: &str) -> Result<Box<dyn Policy>> {
        match name {
            "builtin" => Ok(Box::new(ConstantPolicy(1.0))),
            _ => eyre::bail!("no policy named {name}"),
        }
    }
}

pub fn walk_spec(calls: Calls, goal: f64, max_episode_steps: Option<u64>) -> ProblemSpec {
    ProblemSpec::new(
        WALK,
        Metadata {
            max_episode_steps,
            ..Metadata::default()
        },
        move |_| {
            Ok(AnyProblem::Env(Box::new(Walk {
                position: 0.0,
                goal,
                calls: calls.clone(),
                max_episode_steps,
            })))
        },
    )
}

pub struct ConstantPolicy(pub f64);

impl Policy for ConstantPolicy {
    fn predict(&mut self, _observation: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(array![self.0])
    }
}

pub struct ConstantPolicyProvider(pub f64);

impl PolicyProvider for ConstantPolicyProvider {
    fn load_policy(&self, _name: &str) -> Result<Box<dyn Policy>> {
        Ok(Box::new(ConstantPolicy(self.0)))
    }
}

/// Takes unit steps until it has seen the requested number of timesteps.
pub struct CountingAgent {
    steps: u64,
}

impl Agent for CountingAgent {
    fn learn(&mut self, env: &mut dyn Env, total_timesteps: u64) -> Result<()> {
        let mut done = true;
        while self.steps < total_timesteps {
            if done {
                env.reset()?;
            }
            done = env.step(&array![1.0])?.done();
            self.steps += 1;
        }
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, format!("steps={}", self.steps))?;
        Ok(())
    }
}

pub struct CountingAgentFactory {
    pub total_timesteps: u64,
}

impl AgentFactory for CountingAgentFactory {
    fn name(&self) -> &str {
        "Counting"
    }

    fn total_timesteps(&self) -> u64 {
        self.total_timesteps
    }

    fn make_agent(&self) -> Result<Box<dyn Agent>> {
        Ok(Box::new(CountingAgent { steps: 0 }))
    }
}

pub fn hooks() -> Arc<GeoffHooks> {
    Arc::new(GeoffHooks::new("GeOFF", "0.1.0"))
}

pub fn registry(specs: Vec<ProblemSpec>) -> Arc<ProblemRegistry> {
    let mut registry = ProblemRegistry::new();
    for spec in specs {
        registry.register(spec);
    }
    Arc::new(registry)
}

/// An optimization builder for `problem_id` with a connected signal bus.
pub fn opt_builder(
    registry: Arc<ProblemRegistry>,
    hooks: Arc<GeoffHooks>,
    problem_id: &str,
    optimizer: FixedCalls,
) -> (OptJobBuilder, UnboundedReceiver<JobEvent>) {
    let (signals, rx) = signals::channel();
    let mut builder = OptJobBuilder::new(registry, hooks, signals);
    builder.set_problem_id(problem_id);
    builder.optimizer = Some(Arc::new(optimizer));
    (builder, rx)
}

pub fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Receive events until the terminal one, which is included.
pub fn wait_for_finish(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.blocking_recv() {
        let last = matches!(event, JobEvent::Finished { .. });
        events.push(event);
        if last {
            break;
        }
    }
    events
}

pub fn count_finished(events: &[JobEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, JobEvent::Finished { .. }))
        .count()
}

pub fn failures(events: &[JobEvent]) -> Vec<&signals::FailureReport> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Failed(report) => Some(report),
            _ => None,
        })
        .collect()
}
