//! Per-cell fire state and the grid that holds it
//!
//! A [`Grid`] is the complete state of one simulation run at one step. The
//! engine never mutates a grid in place: each step reads the previous grid
//! and produces a new one, so step N is a pure function of step N-1.
//!
//! Besides the discrete state each cell carries two differentiable values:
//!
//! - `indicator`: the burning indicator fed to neighbours. Its value is the
//!   hard outcome (1 once the cell caught fire, 0 before) and its gradient is
//!   the estimator's gradient of the cell's most recent draw.
//! - `survival`: the running product of `1 - P` over every step the cell
//!   stayed unburned. `1 - survival` is the burn probability the
//!   calibration loss is computed on.

use super::covariates::Covariates;
use super::raster::Raster;
use crate::core_types::Dual;
use crate::error::{FireCaError, Result};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Discrete fire state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    /// Fuel not yet ignited
    Unburned,
    /// Actively burning; can ignite neighbours
    Burning,
    /// Terminal; fuel consumed
    BurnedOut,
}

impl CellState {
    /// Whether `self -> next` follows `Unburned → Burning → BurnedOut`
    ///
    /// Staying in the same state is always legal.
    pub const fn can_transition_to(self, next: CellState) -> bool {
        matches!(
            (self, next),
            (CellState::Unburned, CellState::Unburned | CellState::Burning)
                | (CellState::Burning, CellState::Burning | CellState::BurnedOut)
                | (CellState::BurnedOut, CellState::BurnedOut)
        )
    }

    /// Move to `next` if the transition is legal
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` carrying the cell and step otherwise.
    pub fn transition_to(
        self,
        next: CellState,
        row: usize,
        col: usize,
        step: u32,
    ) -> Result<CellState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(FireCaError::InvalidStateTransition {
                row,
                col,
                step,
                from: self,
                to: next,
            })
        }
    }

    /// Burning or burned out
    pub const fn has_ignited(self) -> bool {
        matches!(self, CellState::Burning | CellState::BurnedOut)
    }
}

/// Full state of a simulation run at one step
#[derive(Debug, Clone)]
pub struct Grid {
    pub(crate) covariates: Arc<Covariates>,
    pub(crate) states: Vec<CellState>,
    pub(crate) burn_clock: Vec<u32>,
    pub(crate) arrival_step: Vec<Option<u32>>,
    pub(crate) indicator: Vec<Dual>,
    pub(crate) survival: Vec<Dual>,
    pub(crate) ignition_probability: Vec<f64>,
    pub(crate) step: u32,
}

impl Grid {
    /// Create the step-0 grid: ignition cells burning, everything else unburned
    ///
    /// Duplicate ignition cells are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGeometry` if an ignition cell lies outside the grid.
    pub fn initialize(
        covariates: impl Into<Arc<Covariates>>,
        ignition_cells: &[(usize, usize)],
    ) -> Result<Self> {
        let covariates = covariates.into();
        let (rows, cols) = (covariates.rows(), covariates.cols());
        let n = rows * cols;

        let mut seeds = FxHashSet::default();
        for &(row, col) in ignition_cells {
            if row >= rows || col >= cols {
                return Err(FireCaError::geometry(format!(
                    "ignition cell ({row}, {col}) outside {rows}x{cols} grid"
                )));
            }
            seeds.insert(row * cols + col);
        }
        if seeds.is_empty() {
            warn!("Grid initialized without ignition cells; fire cannot spread");
        }
        debug!("Initialized {}x{} grid with {} ignition cells", rows, cols, seeds.len());

        let mut grid = Self {
            covariates,
            states: vec![CellState::Unburned; n],
            burn_clock: vec![0; n],
            arrival_step: vec![None; n],
            indicator: vec![Dual::zero(); n],
            survival: vec![Dual::one(); n],
            ignition_probability: vec![0.0; n],
            step: 0,
        };
        for idx in seeds {
            grid.states[idx] = CellState::Burning;
            grid.arrival_step[idx] = Some(0);
            grid.indicator[idx] = Dual::one();
            grid.survival[idx] = Dual::zero();
        }
        Ok(grid)
    }

    /// Create the step-0 grid from an ignition mask (cells with value ≥ 0.5 burn)
    ///
    /// # Errors
    ///
    /// Returns `InvalidGeometry` if the mask shape differs from the covariates.
    pub fn from_ignition_mask(
        covariates: impl Into<Arc<Covariates>>,
        mask: &Raster,
    ) -> Result<Self> {
        let covariates = covariates.into();
        mask.ensure_shape("ignition_mask", covariates.rows(), covariates.cols())?;
        let cols = covariates.cols();
        let cells: Vec<(usize, usize)> = mask
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, v)| **v >= 0.5)
            .map(|(idx, _)| (idx / cols, idx % cols))
            .collect();
        Self::initialize(covariates, &cells)
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.covariates.rows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.covariates.cols()
    }

    /// Steps taken since initialization
    pub fn step_index(&self) -> u32 {
        self.step
    }

    /// Shared covariates
    pub fn covariates(&self) -> &Arc<Covariates> {
        &self.covariates
    }

    /// State of the cell at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn state(&self, row: usize, col: usize) -> CellState {
        assert!(row < self.rows() && col < self.cols(), "Coordinates out of bounds");
        self.states[row * self.cols() + col]
    }

    /// Burn clock of the cell at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn burn_clock(&self, row: usize, col: usize) -> u32 {
        assert!(row < self.rows() && col < self.cols(), "Coordinates out of bounds");
        self.burn_clock[row * self.cols() + col]
    }

    /// Whether any cell is still burning
    pub fn is_active(&self) -> bool {
        self.states.contains(&CellState::Burning)
    }

    /// Differentiable burn probability `1 - survival` per cell
    pub fn burn_probability_duals(&self) -> impl Iterator<Item = Dual> + '_ {
        self.survival.iter().map(|s| s.complement())
    }

    /// Immutable copy of the current state for loss computation or export
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            step: self.step,
            rows: self.rows(),
            cols: self.cols(),
            states: self.states.clone(),
            burn_clock: self.burn_clock.clone(),
            arrival_step: self.arrival_step.clone(),
            ignition_probability: self.ignition_probability.clone(),
            burn_probability: self.survival.iter().map(|s| 1.0 - s.value).collect(),
        }
    }
}

/// Owned, read-only view of a grid at one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Step this snapshot was taken at (0 = initial grid)
    pub step: u32,
    /// Number of rows
    pub rows: usize,
    /// Number of columns
    pub cols: usize,
    /// Cell states in row-major order
    pub states: Vec<CellState>,
    /// Steps since ignition per cell
    pub burn_clock: Vec<u32>,
    /// Step each cell ignited at
    pub arrival_step: Vec<Option<u32>>,
    /// Combined ignition probability computed in the step that produced this snapshot
    pub ignition_probability: Vec<f64>,
    /// Cumulative burn probability `1 - ∏(1 - P)`
    pub burn_probability: Vec<f64>,
}

/// Cell counts per state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Cells never ignited
    pub unburned: usize,
    /// Cells currently burning
    pub burning: usize,
    /// Cells burned out
    pub burned_out: usize,
}

impl SnapshotStats {
    /// Burning plus burned-out cells
    pub fn affected(&self) -> usize {
        self.burning + self.burned_out
    }
}

impl GridSnapshot {
    /// State at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn state(&self, row: usize, col: usize) -> CellState {
        assert!(row < self.rows && col < self.cols, "Coordinates out of bounds");
        self.states[row * self.cols + col]
    }

    /// Ignition probability at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn ignition_probability_at(&self, row: usize, col: usize) -> f64 {
        assert!(row < self.rows && col < self.cols, "Coordinates out of bounds");
        self.ignition_probability[row * self.cols + col]
    }

    /// Cell counts per state
    pub fn stats(&self) -> SnapshotStats {
        self.states
            .iter()
            .fold(SnapshotStats::default(), |mut stats, state| {
                match state {
                    CellState::Unburned => stats.unburned += 1,
                    CellState::Burning => stats.burning += 1,
                    CellState::BurnedOut => stats.burned_out += 1,
                }
                stats
            })
    }

    /// 1.0 where the cell has ignited, 0.0 elsewhere
    pub fn burned_mask(&self) -> Raster {
        Raster::from_fn(self.rows, self.cols, |r, c| {
            if self.state(r, c).has_ignited() {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Area that has ignited, in hectares
    pub fn burned_area_hectares(&self, cell_size: f64) -> f64 {
        let cell_area_sq_m = cell_size * cell_size;
        (self.stats().affected() as f64 * cell_area_sq_m) / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covariates(rows: usize, cols: usize) -> Covariates {
        Covariates::uniform(rows, cols, 1.0, 0.1).unwrap()
    }

    #[test]
    fn test_transition_rules() {
        use CellState::{BurnedOut, Burning, Unburned};
        assert!(Unburned.can_transition_to(Burning));
        assert!(Burning.can_transition_to(BurnedOut));
        assert!(Unburned.can_transition_to(Unburned));
        assert!(!Unburned.can_transition_to(BurnedOut));
        assert!(!Burning.can_transition_to(Unburned));
        assert!(!BurnedOut.can_transition_to(Burning));
        assert!(!BurnedOut.can_transition_to(Unburned));

        let err = BurnedOut.transition_to(Burning, 1, 2, 7).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition at (1, 2) in step 7: BurnedOut -> Burning"
        );
        assert_eq!(Burning.transition_to(BurnedOut, 0, 0, 1).unwrap(), BurnedOut);
    }

    #[test]
    fn test_initialize_sets_seeds() {
        let grid = Grid::initialize(covariates(5, 5), &[(2, 2), (2, 2), (0, 4)]).unwrap();
        assert_eq!(grid.state(2, 2), CellState::Burning);
        assert_eq!(grid.state(0, 4), CellState::Burning);
        assert_eq!(grid.burn_clock(2, 2), 0);
        let stats = grid.snapshot().stats();
        assert_eq!(stats.burning, 2);
        assert_eq!(stats.unburned, 23);
        assert_eq!(stats.burned_out, 0);
    }

    #[test]
    fn test_initialize_rejects_out_of_bounds_seed() {
        let err = Grid::initialize(covariates(5, 5), &[(5, 0)]).unwrap_err();
        assert!(matches!(err, FireCaError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_from_ignition_mask() {
        let mut mask = Raster::new(3, 4);
        mask.set(1, 3, 1.0);
        mask.set(2, 0, 0.7);
        mask.set(0, 0, 0.2);
        let grid = Grid::from_ignition_mask(covariates(3, 4), &mask).unwrap();
        assert_eq!(grid.state(1, 3), CellState::Burning);
        assert_eq!(grid.state(2, 0), CellState::Burning);
        assert_eq!(grid.state(0, 0), CellState::Unburned);

        let err = Grid::from_ignition_mask(covariates(3, 4), &Raster::new(4, 3)).unwrap_err();
        assert!(matches!(err, FireCaError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_snapshot_does_not_alias_grid() {
        let grid = Grid::initialize(covariates(3, 3), &[(1, 1)]).unwrap();
        let mut snapshot = grid.snapshot();
        snapshot.states[4] = CellState::BurnedOut;
        assert_eq!(grid.state(1, 1), CellState::Burning);
        assert_eq!(grid.snapshot().burn_probability[4], 1.0);
        assert_eq!(grid.snapshot().burn_probability[0], 0.0);
    }

    #[test]
    fn test_burned_area_hectares() {
        let grid = Grid::initialize(covariates(4, 4), &[(0, 0), (3, 3)]).unwrap();
        // Two 100 m cells = 2 ha
        assert_eq!(grid.snapshot().burned_area_hectares(100.0), 2.0);
        assert_eq!(grid.snapshot().burned_mask().as_slice().iter().sum::<f64>(), 2.0);
    }
}
