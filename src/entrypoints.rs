use crate::hooks::GeoffHooks;
use crate::jobs::builder::OptJobBuilder;
use crate::jobs::{signals, Job, JobBuilder, WorkerPool};
use crate::logger;
use crate::optimizers;
use crate::registry::{ControlSystem, ProblemRegistry};
use crate::settings::Settings;
use crate::tui::state::RunMonitor;
use crate::tui::ui::{start_ui, wait_for_finish};

use eyre::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::util::TryInitError;

/// Primary entrypoint for GeOFF
///
/// Optimizes the problem selected in `settings` with the configured
/// optimizer and returns what was observed of the run. Problems that need
/// a control system are handed `control_system`.
///
/// With `config.tui` set, progress is shown in the terminal and the run can
/// be stopped with `s`. Otherwise the run is followed headlessly.
pub fn optimize(
    registry: Arc<ProblemRegistry>,
    settings: Settings,
    control_system: Option<Arc<dyn ControlSystem>>,
) -> Result<RunMonitor> {
    let now = Instant::now();
    let (signals, mut rx) = signals::channel();

    if let Err(err) = logger::setup_log(&settings, signals.sender()) {
        if err.downcast_ref::<TryInitError>().is_none() {
            return Err(err);
        }
        tracing::debug!("Keeping the existing log configuration");
    }
    tracing::info!("Starting {} {}", settings.app.name, settings.app.version);

    let hooks = Arc::new(
        GeoffHooks::new(&settings.app.name, &settings.app.version)
            .with_registry(Arc::clone(&registry)),
    );
    let mut builder = OptJobBuilder::new(registry, hooks, signals);
    builder.set_control_system(control_system);
    builder.set_problem_id(&settings.problem.id);
    builder.skeleton_points = settings.problem.skeleton_points.clone();
    builder.optimizer = Some(optimizers::from_settings(&settings.optimizer)?);

    let job = builder.build_job()?;
    let pool = WorkerPool::new(settings.config.workers)?;
    pool.start(&job, |job| job.run());

    let monitor = if settings.config.tui {
        let (mut monitor, mut rx) = start_ui(rx, &job, &settings)?;
        wait_for_finish(&mut rx, &mut monitor);
        monitor
    } else {
        let mut monitor = RunMonitor::new();
        wait_for_finish(&mut rx, &mut monitor);
        monitor
    };

    tracing::info!("Total time: {:.2?}", now.elapsed());
    Ok(monitor)
}
