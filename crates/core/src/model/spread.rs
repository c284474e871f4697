//! Per-pair spread probability
//!
//! The probability that a burning cell ignites one unburned neighbour within
//! a step is a logistic function of a linear predictor:
//!
//! ```text
//! z = intercept
//!   + fuel     * fuel_load(neighbor)
//!   - moisture * fuel_moisture(neighbor)
//!   + slope    * incline_sin(source -> neighbor)
//!   + wind     * wind_alignment(source -> neighbor)
//!   - distance * (adjusted_distance / cell_size - 1)
//! p = sigmoid(z)
//! ```
//!
//! With non-negative coefficients `p` increases with fuel load, wind
//! alignment and uphill incline, and decreases with moisture and distance.

use super::params::DualParameters;
use crate::core_types::Dual;
use crate::geometry::NeighborLink;
use crate::grid::{CellCovariates, CellState};

/// A cell as seen by the spread-rate function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellView {
    /// Discrete state at the start of the step
    pub state: CellState,
    /// Static covariates
    pub covariates: CellCovariates,
}

/// Linear predictor `z` of the spread probability
pub fn spread_logit(
    neighbor: &CellCovariates,
    link: &NeighborLink,
    params: &DualParameters,
) -> Dual {
    params.intercept + params.fuel * neighbor.fuel_load - params.moisture * neighbor.fuel_moisture
        + params.slope * link.incline_sin
        + params.wind * link.wind_alignment
        - params.distance * link.distance_excess
}

/// Probability that `source` ignites `neighbor` along `link` this step
///
/// `None` unless the source is burning and the neighbour is unburned.
pub fn ignition_probability(
    source: &CellView,
    neighbor: &CellView,
    link: &NeighborLink,
    params: &DualParameters,
) -> Option<Dual> {
    if source.state != CellState::Burning || neighbor.state != CellState::Unburned {
        return None;
    }
    Some(spread_logit(&neighbor.covariates, link, params).sigmoid())
}
