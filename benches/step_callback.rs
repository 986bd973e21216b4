use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geoff::optimizers::NelderMead;
use geoff::prelude::*;
use ndarray::Array1;

/// A cheap problem, so that the job's own bookkeeping dominates.
struct Sphere {
    dim: usize,
    constrained: bool,
}

impl Problem for Sphere {}

impl SingleOptimizable for Sphere {
    fn optimization_space(&self) -> Bounds {
        Bounds::symmetric(self.dim, 2.0)
    }

    fn get_initial_params(&mut self) -> eyre::Result<Array1<f64>> {
        Ok(Array1::from_elem(self.dim, 1.0))
    }

    fn compute_single_objective(&mut self, params: &Array1<f64>) -> eyre::Result<f64> {
        Ok(params.dot(params))
    }

    fn constraints(&self) -> Vec<Constraint> {
        if !self.constrained {
            return Vec::new();
        }
        vec![Constraint::Nonlinear(NonlinearConstraint::scalar(
            |x| Ok(x.sum()),
            -10.0,
            10.0,
        ))]
    }
}

fn builder(dim: usize, constrained: bool) -> OptJobBuilder {
    let mut registry = ProblemRegistry::new();
    registry.register(ProblemSpec::new("Sphere-v0", Metadata::default(), move |_| {
        Ok(AnyProblem::Single(Box::new(Sphere { dim, constrained })))
    }));
    let hooks = Arc::new(GeoffHooks::new("GeOFF", "bench"));
    let mut builder = OptJobBuilder::new(Arc::new(registry), hooks, Signals::disconnected());
    builder.set_problem_id("Sphere-v0");
    builder.optimizer = Some(Arc::new(NelderMead {
        maxfun: 200,
        tolerance: 0.0,
        ..NelderMead::default()
    }));
    builder
}

/// Full optimization runs of 200 evaluations each.
fn benchmark_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimization run");
    for dim in [2, 8, 32] {
        for constrained in [false, true] {
            let mut builder = builder(dim, constrained);
            let id = BenchmarkId::new(if constrained { "constrained" } else { "plain" }, dim);
            group.bench_with_input(id, &dim, |b, _| {
                b.iter(|| {
                    let job = builder.build_job().expect("build");
                    let outcome = job.lock().run();
                    black_box(outcome);
                });
            });
        }
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(std::time::Duration::from_secs(10))
        .noise_threshold(0.10);
    targets = benchmark_run
}
criterion_main!(benches);
