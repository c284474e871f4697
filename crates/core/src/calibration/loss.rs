//! Loss between simulated burn probability and observed burn masks

use crate::core_types::Dual;
use crate::grid::Raster;
use serde::{Deserialize, Serialize};

/// Probabilities are clamped to `[EPS, 1 - EPS]` before taking logarithms
pub const PROBABILITY_EPS: f64 = 1e-7;

/// Per-cell loss function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LossKind {
    /// `-(y ln p + (1 - y) ln(1 - p))`
    #[default]
    BinaryCrossEntropy,
    /// `(p - y)^2`
    SquaredError,
}

impl LossKind {
    /// Loss of one cell with predicted burn probability `predicted`
    pub fn cell_loss(self, predicted: Dual, target: f64) -> Dual {
        match self {
            LossKind::BinaryCrossEntropy => {
                let p = predicted.clamp(PROBABILITY_EPS, 1.0 - PROBABILITY_EPS);
                -(p.ln() * target + p.complement().ln() * (1.0 - target))
            }
            LossKind::SquaredError => {
                let diff = predicted - target;
                diff * diff
            }
        }
    }

    /// Summed loss over a mask, cells in row-major order
    pub fn mask_loss(self, predicted: impl IntoIterator<Item = Dual>, target: &Raster) -> Dual {
        predicted
            .into_iter()
            .zip(target.as_slice())
            .map(|(p, &y)| self.cell_loss(p, y))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bce_values() {
        let loss = LossKind::BinaryCrossEntropy;
        assert_relative_eq!(
            loss.cell_loss(Dual::constant(0.5), 1.0).value,
            std::f64::consts::LN_2,
            epsilon = 1e-12
        );
        // Clamped: finite even for certain, wrong predictions
        let worst = loss.cell_loss(Dual::constant(0.0), 1.0).value;
        assert!(worst.is_finite());
        assert_relative_eq!(worst, -(PROBABILITY_EPS.ln()), epsilon = 1e-9);
        assert!(loss.cell_loss(Dual::constant(1.0), 1.0).value < 1e-6);
    }

    #[test]
    fn test_bce_gradient_sign() {
        let p = Dual::variable(0.3, 0);
        assert!(LossKind::BinaryCrossEntropy.cell_loss(p, 1.0).grad[0] < 0.0);
        assert!(LossKind::BinaryCrossEntropy.cell_loss(p, 0.0).grad[0] > 0.0);
    }

    #[test]
    fn test_squared_error() {
        let p = Dual::variable(0.3, 2);
        let l = LossKind::SquaredError.cell_loss(p, 1.0);
        assert_relative_eq!(l.value, 0.49, epsilon = 1e-12);
        assert_relative_eq!(l.grad[2], -1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_mask_loss_sums_cells() {
        let mut target = Raster::new(1, 3);
        target.set(0, 1, 1.0);
        let predicted = [0.2, 0.6, 0.0].map(Dual::constant);
        let total = LossKind::SquaredError.mask_loss(predicted, &target);
        assert_relative_eq!(total.value, 0.04 + 0.16, epsilon = 1e-12);
    }
}
