use std::ops::Deref;

use crate::error::NoSkeletonPoints;
use crate::problem::FunctionOptimizable;

/// Cycle times in ascending order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonPoints(Vec<f64>);

impl SkeletonPoints {
    pub fn new<I: IntoIterator<Item = f64>>(points: I) -> Self {
        let mut points: Vec<f64> = points
            .into_iter()
            .filter(|point| {
                let finite = point.is_finite();
                if !finite {
                    tracing::warn!("Ignoring skeleton point {point}");
                }
                finite
            })
            .collect();
        points.sort_by(f64::total_cmp);
        points.dedup();
        SkeletonPoints(points)
    }
}

impl Deref for SkeletonPoints {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

/// Unify the problem's own skeleton points with the user's selection.
///
/// A problem that overrides the skeleton points always wins.
pub fn gather_skeleton_points(
    problem: &dyn FunctionOptimizable,
    user_selection: &[f64],
) -> Result<SkeletonPoints, NoSkeletonPoints> {
    resolve(problem.override_skeleton_points(), user_selection)
}

fn resolve(
    override_points: Option<Vec<f64>>,
    user_selection: &[f64],
) -> Result<SkeletonPoints, NoSkeletonPoints> {
    match override_points {
        Some(points) => {
            let points = SkeletonPoints::new(points);
            if points.is_empty() {
                return Err(NoSkeletonPoints(
                    "problem wanted to provide skeleton points, but gave zero of them".to_owned(),
                ));
            }
            tracing::info!("Problem overrides skeleton points: {:?}", &*points);
            Ok(points)
        }
        None => {
            let points = SkeletonPoints::new(user_selection.iter().copied());
            if points.is_empty() {
                return Err(NoSkeletonPoints(
                    "no skeleton points selected and problem did not provide its own".to_owned(),
                ));
            }
            Ok(points)
        }
    }
}
