//! Differentiable Bernoulli sampling

use crate::core_types::Dual;
use serde::{Deserialize, Serialize};

/// Keeps the relaxed noise away from `ln(0)`
const NOISE_EPS: f64 = 1e-12;

/// How a hard ignition outcome is given a gradient
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum GradientEstimator {
    /// Forward value is the hard 0/1 outcome, gradient is `dP/dθ`
    #[default]
    StraightThrough,
    /// Binary-concrete relaxation driven by the same uniform draw
    ///
    /// The forward value is the same hard outcome as
    /// [`GradientEstimator::StraightThrough`]; only the gradient is taken
    /// from the relaxed sample.
    Relaxed {
        /// Sharpness of the relaxation; lower is closer to a hard sample
        temperature: f64,
    },
}

/// Result of sampling one cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Whether the cell ignites
    pub ignited: bool,
    /// Differentiable burning indicator
    pub indicator: Dual,
}

impl GradientEstimator {
    /// Sample ignition with probability `probability` from uniform draw `u`
    ///
    /// The cell ignites iff `u < P`, so `P = 0` never ignites and `P = 1`
    /// always does.
    pub fn sample(self, probability: Dual, u: f64) -> Sample {
        let ignited = u < probability.value;
        let hard = if ignited { 1.0 } else { 0.0 };
        let indicator = match self {
            Self::StraightThrough => probability.straight_through(hard),
            Self::Relaxed { temperature } => {
                let p = probability.value;
                if p <= 0.0 || p >= 1.0 {
                    // The logit is infinite; the sample is already hard
                    probability.straight_through(hard)
                } else {
                    relaxed_sample(probability, u, temperature).straight_through(hard)
                }
            }
        };
        Sample { ignited, indicator }
    }
}

/// Soft binary-concrete sample `sigmoid((logit P + logistic noise) / T)`
///
/// Requires `0 < P < 1`.
fn relaxed_sample(probability: Dual, u: f64, temperature: f64) -> Dual {
    let u = u.clamp(NOISE_EPS, 1.0 - NOISE_EPS);
    let noise = (1.0 - u).ln() - u.ln();
    let logit = probability.ln() - probability.complement().ln();
    ((logit + noise) / temperature).sigmoid()
}
