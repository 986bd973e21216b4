mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use geoff::prelude::*;
use ndarray::array;

fn quadratic_builder(
    setup: QuadraticSetup,
    optimizer: FixedCalls,
) -> (OptJobBuilder, tokio::sync::mpsc::UnboundedReceiver<JobEvent>) {
    opt_builder(
        registry(vec![quadratic_spec(setup)]),
        hooks(),
        QUADRATIC,
        optimizer,
    )
}

#[test]
fn test_single_objective_run_succeeds() {
    let setup = QuadraticSetup::default();
    let (mut builder, mut rx) = quadratic_builder(setup.clone(), FixedCalls::new(12));
    let job = builder.build_job().unwrap();

    assert_eq!(job.lock().run(), Outcome::Success);

    let job = job.lock();
    assert_eq!(job.core().objectives_log().len(), 13);
    assert_eq!(job.core().actions_log().len(), 13);
    assert!(job.core().constraints_log().is_empty());
    assert_eq!(job.core().actions_log()[0], array![3.0, 4.0, 5.0]);
    assert_eq!(setup.calls.count("objective"), 13);
    assert_eq!(setup.calls.count("render matplotlib_figures"), 13);

    let events = drain(&mut rx);
    match &events[0] {
        JobEvent::OptimizationStarted(metadata) => {
            assert_eq!(metadata.problem_id, QUADRATIC);
            assert_eq!(metadata.objective_name, "Norm");
            assert_eq!(metadata.param_names, ["Actor 1", "Actor 2", "Actor 3"]);
            assert_eq!(metadata.max_function_evaluations, Some(12));
        }
        other => panic!("unexpected first event {other:?}"),
    }
    assert_eq!(count_finished(&events), 1);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: true }));
    assert!(failures(&events).is_empty());
}

#[test]
fn test_final_step_is_flagged() {
    let (mut builder, mut rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(3));
    let job = builder.build_job().unwrap();
    job.lock().run();

    let final_flags: Vec<bool> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            JobEvent::StepStarted(metadata) => Some(metadata.final_step),
            _ => None,
        })
        .collect();
    assert_eq!(final_flags, [false, false, false, true]);
}

#[test]
fn test_notifications_carry_full_history() {
    let (mut builder, mut rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(4));
    let job = builder.build_job().unwrap();
    job.lock().run();

    let lengths: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            JobEvent::ObjectiveUpdated { iterations, values } => {
                assert_eq!(iterations.len(), values.len());
                Some(values.len())
            }
            JobEvent::ActorsUpdated { values, .. } => {
                assert_eq!(values.ncols(), 3);
                None
            }
            _ => None,
        })
        .collect();
    assert_eq!(lengths, [1, 2, 3, 4, 5]);
}

#[test]
fn test_cancellation_stops_run_benignly() {
    let (mut builder, mut rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(0));
    let token_source = builder.token_source().clone();
    let mut optimizer = FixedCalls::new(12);
    optimizer.on_call = Some(Arc::new(move |done| {
        if done == 5 {
            token_source.cancel();
        }
    }));
    builder.optimizer = Some(Arc::new(optimizer));
    let job = builder.build_job().unwrap();

    assert_eq!(job.lock().run(), Outcome::Cancelled);

    let job = job.lock();
    assert_eq!(job.core().objectives_log().len(), 5);
    assert_eq!(job.core().actions_log().len(), 5);
    let events = drain(&mut rx);
    assert!(failures(&events).is_empty());
    assert_eq!(count_finished(&events), 1);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: false }));
    assert!(!builder.token_source().token().cancellation_requested());
}

#[test]
fn test_repeated_cancel_finishes_once() {
    let (mut builder, mut rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(6));
    let job = builder.build_job().unwrap();
    job.cancel();
    job.cancel();
    job.cancel();

    assert_eq!(job.lock().run(), Outcome::Cancelled);

    let events = drain(&mut rx);
    assert_eq!(count_finished(&events), 1);
    assert!(failures(&events).is_empty());
    assert!(job.lock().core().objectives_log().is_empty());
    // The token was reset, so the next job starts normally.
    let job = builder.build_job().unwrap();
    assert_eq!(job.lock().run(), Outcome::Success);
}

#[test]
fn test_constraint_failure_aborts_run() {
    let counter = Arc::new(AtomicUsize::new(0));
    let setup = QuadraticSetup {
        constraints: vec![counting_constraint(Arc::clone(&counter), Some(4))],
        ..QuadraticSetup::default()
    };
    let (mut builder, mut rx) = quadratic_builder(setup.clone(), FixedCalls::new(10));
    let job = builder.build_job().unwrap();

    assert_eq!(job.lock().run(), Outcome::Failed);

    let job = job.lock();
    let core = job.core();
    assert_eq!(setup.calls.count("objective"), 4);
    assert_eq!(core.objectives_log().len(), 3);
    assert_eq!(core.actions_log().len(), 3);
    assert_eq!(core.constraints_log().len(), 3);
    assert!(core.wrapped_constraints().iter().all(|c| c.cache_len() == 0));

    let events = drain(&mut rx);
    let reports = failures(&events);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].details.contains("hardware read failure"));
    assert_eq!(count_finished(&events), 1);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: false }));
}

#[test]
fn test_constraints_are_evaluated_once_per_step() {
    let counter = Arc::new(AtomicUsize::new(0));
    let setup = QuadraticSetup {
        constraints: vec![counting_constraint(Arc::clone(&counter), None)],
        ..QuadraticSetup::default()
    };
    let (mut builder, mut rx) = quadratic_builder(setup, FixedCalls::new(5));
    let job = builder.build_job().unwrap();
    job.lock().run();

    assert_eq!(counter.load(Ordering::SeqCst), 6);
    let job = job.lock();
    assert_eq!(job.core().constraints_log().len(), 6);
    assert_eq!(job.core().constraint_names(), ["Constraint 1"]);

    let last_constraints = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            JobEvent::ConstraintsUpdated { values, .. } => Some(values),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_constraints.values.dim(), (6, 1));
    assert_eq!(last_constraints.lower, array![-100.0]);
    assert_eq!(last_constraints.upper, array![100.0]);
}

#[test]
fn test_out_of_bounds_proposals_are_clipped() {
    let setup = QuadraticSetup {
        x_0: Some(array![8.0, 0.0, -8.0]),
        ..QuadraticSetup::default()
    };
    let mut optimizer = FixedCalls::new(2);
    optimizer.growth = 0.5;
    let (mut builder, _rx) = quadratic_builder(setup, optimizer);
    let job = builder.build_job().unwrap();
    assert_eq!(job.lock().run(), Outcome::Success);

    let job = job.lock();
    let actions = job.core().actions_log();
    assert_eq!(actions[0], array![8.0, 0.0, -8.0]);
    assert_eq!(actions[1], array![10.0, 0.0, -10.0]);
    assert_eq!(job.core().objectives_log()[1], 200.0);
}

#[test]
fn test_function_optimization_visits_points_in_order() {
    let setup = CyclesSetup::default();
    let optimizer = FixedCalls::new(2);
    let solves = optimizer.solves.clone();
    let (mut builder, mut rx) = opt_builder(
        registry(vec![cycles_spec(setup.clone())]),
        hooks(),
        CYCLES,
        optimizer,
    );
    builder.skeleton_points = vec![30.0, 10.0, 20.0, 10.0];
    let job = builder.build_job().unwrap();
    let initial_params: Vec<String> = setup
        .calls
        .all()
        .into_iter()
        .filter(|c| c.starts_with("initial params"))
        .collect();
    assert_eq!(
        initial_params,
        ["initial params t=10", "initial params t=20", "initial params t=30"]
    );
    drain(&mut rx);

    assert_eq!(job.lock().run(), Outcome::Success);

    assert_eq!(solves.all().len(), 3);
    let events = drain(&mut rx);
    let selected: Vec<f64> = events
        .iter()
        .filter_map(|event| match event {
            JobEvent::SkeletonPointSelected(point) => Some(*point),
            _ => None,
        })
        .collect();
    assert_eq!(selected, [10.0, 20.0, 30.0]);
    // Every skeleton point is announced before its first step.
    let first_step_after_selection = events.windows(2).any(|pair| {
        matches!(pair[0], JobEvent::SkeletonPointSelected(_))
            && matches!(pair[1], JobEvent::StepStarted(_))
    });
    assert!(first_step_after_selection);
    let objective_calls: Vec<String> = setup
        .calls
        .all()
        .into_iter()
        .filter(|c| c.starts_with("objective"))
        .collect();
    assert_eq!(objective_calls.len(), 9);
    assert_eq!(objective_calls[0], "objective t=10");
    assert_eq!(objective_calls[8], "objective t=30");

    let job = job.lock();
    assert_eq!(job.core().param_names(), ["kick", "tune"]);
    assert_eq!(job.core().objectives_log().len(), 9);
}

#[test]
fn test_overridden_skeleton_points_win() {
    let setup = CyclesSetup {
        override_points: Some(vec![1200.0]),
        ..CyclesSetup::default()
    };
    let (mut builder, _rx) = opt_builder(
        registry(vec![cycles_spec(setup)]),
        hooks(),
        CYCLES,
        FixedCalls::new(1),
    );
    builder.skeleton_points = vec![10.0, 20.0];
    let job = builder.build_job().unwrap();
    let guard = job.lock();
    match &*guard {
        OptJob::Function(function) => assert_eq!(function.skeleton_points(), [1200.0]),
        OptJob::Single(_) => panic!("expected a function job"),
    }
}

#[test]
fn test_missing_skeleton_points_fail_to_build() {
    let (mut builder, _rx) = opt_builder(
        registry(vec![cycles_spec(CyclesSetup::default())]),
        hooks(),
        CYCLES,
        FixedCalls::new(1),
    );
    let err = builder.build_job().err().unwrap();
    assert!(err.to_string().contains("no skeleton points selected"));

    let setup = CyclesSetup {
        override_points: Some(Vec::new()),
        ..CyclesSetup::default()
    };
    let (mut builder, _rx) = opt_builder(
        registry(vec![cycles_spec(setup)]),
        hooks(),
        CYCLES,
        FixedCalls::new(1),
    );
    builder.skeleton_points = vec![10.0];
    let err = builder.build_job().err().unwrap();
    assert!(err.to_string().contains("gave zero of them"));
}

#[test]
fn test_reset_evaluates_initial_point() {
    let setup = QuadraticSetup::default();
    let (mut builder, mut rx) = quadratic_builder(setup.clone(), FixedCalls::new(3));
    let job = builder.build_job().unwrap();
    job.lock().run();
    drain(&mut rx);

    assert_eq!(job.lock().reset(), Outcome::Success);

    let job = job.lock();
    let actions = job.core().actions_log();
    assert_eq!(actions.last(), Some(&array![3.0, 4.0, 5.0]));
    let events = drain(&mut rx);
    assert_eq!(count_finished(&events), 1);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: true }));
    assert_eq!(
        job.format_reset_point(),
        "Actor 1:\t3\nActor 2:\t4\nActor 3:\t5\n"
    );
}

#[test]
fn test_function_reset_visits_every_point() {
    let setup = CyclesSetup::default();
    let (mut builder, mut rx) = opt_builder(
        registry(vec![cycles_spec(setup.clone())]),
        hooks(),
        CYCLES,
        FixedCalls::new(1),
    );
    builder.skeleton_points = vec![1500.0, 1200.0];
    let job = builder.build_job().unwrap();
    drain(&mut rx);

    assert_eq!(job.lock().reset(), Outcome::Success);

    let selected = drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, JobEvent::SkeletonPointSelected(_)))
        .count();
    assert_eq!(selected, 2);
    let hline = "-".repeat(40);
    assert_eq!(
        job.lock().format_reset_point(),
        format!(
            "{hline}\nAt t=1200 ms:\nkick:\t1.2\ntune:\t1\n{hline}\nAt t=1500 ms:\nkick:\t1.5\ntune:\t1\n"
        )
    );
}

#[test]
fn test_export_csv() {
    let counter = Arc::new(AtomicUsize::new(0));
    let setup = QuadraticSetup {
        constraints: vec![counting_constraint(counter, None)],
        ..QuadraticSetup::default()
    };
    let (mut builder, _rx) = quadratic_builder(setup, FixedCalls::new(2));
    let job = builder.build_job().unwrap();
    job.lock().run();

    let path = std::env::temp_dir().join("geoff_export_test.csv");
    job.lock().export_csv(&path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2 + 3);
    assert_eq!(
        lines[0],
        "# norm_actor_1, norm_actor_2, norm_actor_3, constraint_1, objective"
    );
    assert_eq!(lines[1], "# Actor 1, Actor 2, Actor 3, Constraint 1, Norm");
    assert_eq!(lines[2], "3, 4, 5, 12, 50");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(written.as_bytes());
    let rows: Vec<Vec<f64>> = reader
        .records()
        .map(|record| record.unwrap().iter().map(|f| f.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 3);
    let objectives: Vec<f64> = rows.iter().map(|row| row[4]).collect();
    assert_eq!(objectives, job.lock().core().objectives_log());
}

#[test]
fn test_export_csv_without_constraints() {
    let (mut builder, _rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(1));
    let job = builder.build_job().unwrap();
    job.lock().run();

    let path = std::env::temp_dir().join("geoff_export_plain_test.csv");
    job.lock().export_csv(&path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "# norm_actor_1, norm_actor_2, norm_actor_3, objective");
    assert_eq!(lines[1], "# Actor 1, Actor 2, Actor 3, Norm");
    assert_eq!(lines[2], "3, 4, 5, 50");
}

#[test]
fn test_worker_pool_runs_job_in_background() {
    let (mut builder, mut rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(5));
    let job = builder.build_job().unwrap();
    let pool = WorkerPool::new(2).unwrap();

    pool.start(&job, |job| job.run());

    let events = wait_for_finish(&mut rx);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: true }));
    assert!(!job.is_running());
    assert_eq!(job.lock().core().objectives_log().len(), 6);
}

#[test]
fn test_worker_pool_job_can_be_stopped() {
    let (mut builder, mut rx) = quadratic_builder(QuadraticSetup::default(), FixedCalls::new(0));
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (proceed_tx, proceed_rx) = std::sync::mpsc::channel::<()>();
    let proceed_rx = std::sync::Mutex::new(proceed_rx);
    let mut optimizer = FixedCalls::new(100);
    optimizer.on_call = Some(Arc::new(move |done| {
        if done == 2 {
            started_tx.send(()).unwrap();
            proceed_rx.lock().unwrap().recv().unwrap();
        }
    }));
    builder.optimizer = Some(Arc::new(optimizer));
    let job = builder.build_job().unwrap();
    let pool = WorkerPool::new(1).unwrap();

    pool.start(&job, |job| job.run());
    started_rx.recv().unwrap();
    job.cancel();
    proceed_tx.send(()).unwrap();

    let events = wait_for_finish(&mut rx);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: false }));
    assert!(failures(&events).is_empty());
    assert_eq!(job.lock().core().objectives_log().len(), 2);
}
