//! Stochastic transition engine
//!
//! One call to [`TransitionEngine::advance`] performs a synchronous update:
//! every cell of the new grid is computed from the previous grid only.
//!
//! For an unburned cell the combined ignition probability over its burning
//! neighbours `j` is
//!
//! ```text
//! P = 1 - prod_j (1 - b_j * p_j)
//! ```
//!
//! where `p_j` is the spread probability from `j` and `b_j` its burning
//! indicator. The cell ignites iff its uniform draw is below `P`.
//!
//! Indicators always hold the hard 0/1 outcome; their gradient comes from
//! the estimator. An unburned cell keeps the indicator of its last draw, so
//! unburned neighbours add nothing to `P` but still pass on the gradient of
//! their own ignition probability.
//!
//! Burning cells advance their burn clock and burn out once it reaches the
//! configured duration. Burned-out cells never change.

mod estimator;
mod noise;

pub use estimator::{GradientEstimator, Sample};
pub use noise::uniform_field;

use crate::core_types::Dual;
use crate::error::{FireCaError, Result};
use crate::geometry::NeighborGeometry;
use crate::grid::{CellState, Grid};
use crate::model::{ignition_probability, spread_logit, CellView, DualParameters, Parameters};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How per-cell work of a step is scheduled
///
/// Both backends produce bit-identical grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Single thread, cells in row-major order
    Sequential,
    /// Cells distributed over the rayon thread pool
    #[default]
    Parallel,
}

/// Combine `(indicator, probability)` pairs of burning neighbours
///
/// Returns exactly zero when the iterator is empty.
pub fn combined_probability(contributions: impl IntoIterator<Item = (Dual, Dual)>) -> Dual {
    let survival: Dual = contributions
        .into_iter()
        .map(|(indicator, p)| (indicator * p).complement())
        .product();
    survival.complement()
}

/// New per-cell values produced by one step
#[derive(Debug, Clone, Copy)]
struct CellUpdate {
    state: CellState,
    burn_clock: u32,
    arrival_step: Option<u32>,
    indicator: Dual,
    survival: Dual,
    ignition_probability: f64,
}

/// Applies the transition rule with fixed geometry and settings
#[derive(Debug, Clone)]
pub struct TransitionEngine {
    geometry: NeighborGeometry,
    burn_duration: u32,
    estimator: GradientEstimator,
    backend: Backend,
    seed: u64,
}

impl TransitionEngine {
    /// Create an engine over precomputed geometry
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `burn_duration` is zero or a relaxed
    /// estimator has a non-positive temperature.
    pub fn new(
        geometry: NeighborGeometry,
        burn_duration: u32,
        estimator: GradientEstimator,
        backend: Backend,
        seed: u64,
    ) -> Result<Self> {
        if burn_duration == 0 {
            return Err(FireCaError::config("burn_duration", "must be at least 1 step"));
        }
        if let GradientEstimator::Relaxed { temperature } = estimator {
            if !(temperature.is_finite() && temperature > 0.0) {
                return Err(FireCaError::config(
                    "estimator.temperature",
                    format!("{temperature} is not positive"),
                ));
            }
        }
        Ok(Self {
            geometry,
            burn_duration,
            estimator,
            backend,
            seed,
        })
    }

    /// Geometry the engine was built with
    pub fn geometry(&self) -> &NeighborGeometry {
        &self.geometry
    }

    /// Seed keying the per-step uniform draws
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Compute the grid one step after `prev`
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` if `prev` does not match the engine's geometry
    /// - `DivergedState` if any combined probability is non-finite
    /// - `InvalidStateTransition` if a cell would leave the legal path
    pub fn advance(&self, prev: &Grid, params: &Parameters) -> Result<Grid> {
        if (prev.rows(), prev.cols()) != (self.geometry.rows(), self.geometry.cols()) {
            return Err(FireCaError::geometry(format!(
                "grid is {}x{}, geometry is {}x{}",
                prev.rows(),
                prev.cols(),
                self.geometry.rows(),
                self.geometry.cols()
            )));
        }

        let step = prev.step + 1;
        let n = prev.states.len();
        let draws = uniform_field(self.seed, step, n);
        let duals = params.duals();
        let update = |cell: usize| self.update_cell(prev, &duals, cell, step, draws[cell]);

        let updates: Vec<CellUpdate> = match self.backend {
            Backend::Sequential => (0..n).map(update).collect::<Result<_>>()?,
            Backend::Parallel => (0..n).into_par_iter().map(update).collect::<Result<_>>()?,
        };

        let mut next = Grid {
            covariates: prev.covariates.clone(),
            states: Vec::with_capacity(n),
            burn_clock: Vec::with_capacity(n),
            arrival_step: Vec::with_capacity(n),
            indicator: Vec::with_capacity(n),
            survival: Vec::with_capacity(n),
            ignition_probability: Vec::with_capacity(n),
            step,
        };
        for u in updates {
            next.states.push(u.state);
            next.burn_clock.push(u.burn_clock);
            next.arrival_step.push(u.arrival_step);
            next.indicator.push(u.indicator);
            next.survival.push(u.survival);
            next.ignition_probability.push(u.ignition_probability);
        }
        Ok(next)
    }

    fn update_cell(
        &self,
        prev: &Grid,
        params: &DualParameters,
        cell: usize,
        step: u32,
        u: f64,
    ) -> Result<CellUpdate> {
        let cols = prev.cols();
        let (row, col) = (cell / cols, cell % cols);
        let state = prev.states[cell];
        let unchanged = CellUpdate {
            state,
            burn_clock: prev.burn_clock[cell],
            arrival_step: prev.arrival_step[cell],
            indicator: prev.indicator[cell],
            survival: prev.survival[cell],
            ignition_probability: 0.0,
        };

        match state {
            CellState::BurnedOut => Ok(unchanged),
            CellState::Burning => {
                let burn_clock = prev.burn_clock[cell] + 1;
                let next = if burn_clock >= self.burn_duration {
                    CellState::BurnedOut
                } else {
                    CellState::Burning
                };
                Ok(CellUpdate {
                    state: state.transition_to(next, row, col, step)?,
                    burn_clock,
                    ..unchanged
                })
            }
            CellState::Unburned => {
                let target = CellView {
                    state,
                    covariates: prev.covariates.cell(cell),
                };
                let contributions = self.geometry.incoming(cell).filter_map(|(source, link)| {
                    let source_view = CellView {
                        state: prev.states[source],
                        covariates: prev.covariates.cell(source),
                    };
                    match source_view.state {
                        CellState::Burning => {
                            ignition_probability(&source_view, &target, link, params)
                                .map(|p| (prev.indicator[source], p))
                        }
                        // Indicator value is 0: no change to P, only its gradient
                        CellState::Unburned => Some((
                            prev.indicator[source],
                            spread_logit(&target.covariates, link, params).sigmoid(),
                        )),
                        CellState::BurnedOut => None,
                    }
                });
                let probability = combined_probability(contributions);
                if !probability.is_finite() {
                    return Err(FireCaError::diverged(format!(
                        "ignition probability of cell ({row}, {col}) in step {step} is {}",
                        probability.value
                    )));
                }

                let survival = prev.survival[cell] * probability.complement();
                let sample = self.estimator.sample(probability, u);
                if sample.ignited {
                    Ok(CellUpdate {
                        state: state.transition_to(CellState::Burning, row, col, step)?,
                        burn_clock: 0,
                        arrival_step: Some(step),
                        indicator: sample.indicator,
                        survival,
                        ignition_probability: probability.value,
                    })
                } else {
                    Ok(CellUpdate {
                        indicator: sample.indicator,
                        survival,
                        ignition_probability: probability.value,
                        ..unchanged
                    })
                }
            }
        }
    }
}
