use ndarray::Array2;

use crate::jobs::signals::{
    BoundedArray, FailureReport, JobEvent, PreOptimizationMetadata, PreRunMetadata,
};

/// Everything the controlling thread has learned about a run so far.
#[derive(Debug, Clone, Default)]
pub struct RunMonitor {
    pub optimization: Option<PreOptimizationMetadata>,
    pub run: Option<PreRunMetadata>,
    pub objective: Vec<f64>,
    pub actors: Option<Array2<f64>>,
    pub constraints: Option<BoundedArray>,
    pub reward_lists: Vec<Vec<f64>>,
    pub skeleton_point: Option<f64>,
    pub steps: usize,
    pub episodes: usize,
    pub final_step: bool,
    pub logs: Vec<String>,
    pub finished: Option<bool>,
    pub failure: Option<FailureReport>,
}

impl RunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state. Returns true for the terminal event.
    pub fn apply(&mut self, event: JobEvent) -> bool {
        match event {
            JobEvent::OptimizationStarted(metadata) => {
                self.optimization = Some(metadata);
                self.final_step = false;
            }
            JobEvent::RunStarted(metadata) => {
                self.run = Some(metadata);
                self.episodes = 0;
            }
            JobEvent::SkeletonPointSelected(point) => self.skeleton_point = Some(point),
            JobEvent::EpisodeStarted => self.episodes += 1,
            JobEvent::StepStarted(metadata) => {
                self.steps += 1;
                self.final_step = metadata.final_step;
            }
            JobEvent::ObjectiveUpdated { values, .. } => self.objective = values.to_vec(),
            JobEvent::ActorsUpdated { values, .. } => self.actors = Some(values),
            JobEvent::ConstraintsUpdated { values, .. } => self.constraints = Some(values),
            JobEvent::RewardListsUpdated(lists) => self.reward_lists = lists,
            JobEvent::Failed(report) => self.failure = Some(report),
            JobEvent::LogMessage(message) => self.logs.push(message),
            JobEvent::Finished { success } => {
                self.finished = Some(success);
                return true;
            }
        }
        false
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.finished == Some(true)
    }

    /// The most recent objective value, if any.
    pub fn last_objective(&self) -> Option<f64> {
        self.objective.last().copied()
    }

    pub fn objective_name(&self) -> &str {
        match (&self.optimization, &self.run) {
            (Some(metadata), _) => &metadata.objective_name,
            (None, Some(metadata)) => &metadata.objective_name,
            (None, None) => "Objective",
        }
    }

    /// `(iteration, value)` pairs of the finite objective values.
    pub fn objective_points(&self) -> Vec<(f64, f64)> {
        self.objective
            .iter()
            .enumerate()
            .filter(|(_, y)| y.is_finite())
            .map(|(x, &y)| (x as f64, y))
            .collect()
    }

    pub fn status_text(&self) -> String {
        match (&self.finished, &self.failure) {
            (None, _) => "Running".to_string(),
            (Some(true), _) => "Finished".to_string(),
            (Some(false), Some(report)) => format!("Failed: {}", report.summary),
            (Some(false), None) => "Cancelled".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::signals::PreStepMetadata;
    use ndarray::array;

    #[test]
    fn test_apply_tracks_progress() {
        let mut monitor = RunMonitor::new();
        assert!(!monitor.apply(JobEvent::SkeletonPointSelected(1500.0)));
        monitor.apply(JobEvent::StepStarted(PreStepMetadata { final_step: false }));
        monitor.apply(JobEvent::ObjectiveUpdated {
            iterations: array![0, 1],
            values: array![2.0, f64::NAN],
        });
        monitor.apply(JobEvent::StepStarted(PreStepMetadata { final_step: true }));
        assert_eq!(monitor.steps, 2);
        assert!(monitor.final_step);
        assert_eq!(monitor.skeleton_point, Some(1500.0));
        assert_eq!(monitor.objective_points(), vec![(0.0, 2.0)]);
        assert_eq!(monitor.status_text(), "Running");
        assert!(monitor.apply(JobEvent::Finished { success: true }));
        assert!(monitor.succeeded());
    }

    #[test]
    fn test_failure_is_shown() {
        let mut monitor = RunMonitor::new();
        monitor.apply(JobEvent::Failed(FailureReport::from(&eyre::eyre!("boom"))));
        monitor.apply(JobEvent::Finished { success: false });
        assert_eq!(monitor.status_text(), "Failed: boom");
    }

    #[test]
    fn test_cancelled_run() {
        let mut monitor = RunMonitor::new();
        monitor.apply(JobEvent::Finished { success: false });
        assert!(monitor.is_finished());
        assert_eq!(monitor.status_text(), "Cancelled");
        assert_eq!(monitor.objective_name(), "Objective");
    }
}
