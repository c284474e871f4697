//! Agreement between a simulated and an observed burn

use crate::grid::Raster;
use serde::{Deserialize, Serialize};

/// Cell-wise confusion counts at a 0.5 threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// Simulated and observed burned
    pub true_positive: usize,
    /// Simulated burned, observed unburned
    pub false_positive: usize,
    /// Simulated unburned, observed burned
    pub false_negative: usize,
    /// Both unburned
    pub true_negative: usize,
}

impl ConfusionCounts {
    /// Compare two masks of the same shape
    pub fn compare(simulated: &Raster, observed: &Raster) -> Self {
        simulated
            .as_slice()
            .iter()
            .zip(observed.as_slice())
            .fold(Self::default(), |mut counts, (&s, &o)| {
                match (s >= 0.5, o >= 0.5) {
                    (true, true) => counts.true_positive += 1,
                    (true, false) => counts.false_positive += 1,
                    (false, true) => counts.false_negative += 1,
                    (false, false) => counts.true_negative += 1,
                }
                counts
            })
    }

    /// Intersection over union; 1 when both masks are empty
    pub fn iou(&self) -> f64 {
        let union = self.true_positive + self.false_positive + self.false_negative;
        if union == 0 {
            1.0
        } else {
            self.true_positive as f64 / union as f64
        }
    }

    /// `TP / (TP + FP)`; 0 when nothing was simulated burned
    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    /// `TP / (TP + FN)`; 0 when nothing was observed burned
    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    /// Harmonic mean of precision and recall
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Fraction of cells classified correctly
    pub fn accuracy(&self) -> f64 {
        let total =
            self.true_positive + self.false_positive + self.false_negative + self.true_negative;
        ratio(self.true_positive + self.true_negative, total)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Mean absolute difference between simulated and observed arrival steps
///
/// Only cells with both arrivals count; `None` if there are none.
pub fn arrival_mae(simulated: &[Option<u32>], observed: &[Option<u32>]) -> Option<f64> {
    let (sum, count) = simulated
        .iter()
        .zip(observed)
        .filter_map(|(s, o)| Some((f64::from((*s)?), f64::from((*o)?))))
        .fold((0.0, 0usize), |(sum, count), (s, o)| (sum + (s - o).abs(), count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Result of [`evaluate`](super::evaluate)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Intersection over union of the final burned area
    pub iou: f64,
    /// Precision of the final burned area
    pub precision: f64,
    /// Recall of the final burned area
    pub recall: f64,
    /// F1 score of the final burned area
    pub f1: f64,
    /// Cell-wise accuracy of the final burned area
    pub accuracy: f64,
    /// Calibration loss at the evaluated parameters
    pub loss: f64,
    /// Cells ignited in the simulation at the final observed step
    pub simulated_burned_cells: usize,
    /// Cells observed burned at the final observed step
    pub observed_burned_cells: usize,
    /// Mean absolute arrival-step error, for time-series observations
    pub arrival_mae: Option<f64>,
    /// Raw confusion counts
    pub confusion: ConfusionCounts,
}
