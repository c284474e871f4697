//! Simulation driver
//!
//! [`Simulator`] owns a validated [`ModelConfig`] and advances grids with it.
//! [`Simulator::run`] returns a lazy iterator over snapshots; nothing is
//! computed until the iterator is polled, and it can be dropped at any step.

use super::config::ModelConfig;
use crate::engine::TransitionEngine;
use crate::error::{FireCaError, Result};
use crate::geometry::NeighborGeometry;
use crate::grid::{Grid, GridSnapshot};
use crate::model::Parameters;
use std::iter::FusedIterator;
use tracing::{debug, info, warn};

/// Runs the cellular automaton under one configuration
#[derive(Debug, Clone)]
pub struct Simulator {
    config: ModelConfig,
}

impl Simulator {
    /// Create a simulator
    ///
    /// # Errors
    ///
    /// Anything [`ModelConfig::validate`] reports.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Simulator initialized: {}x{} grid, cell_size={:.1}m, {:?}, burn_duration={}, {:?}",
            config.rows,
            config.cols,
            config.cell_size,
            config.connectivity,
            config.burn_duration,
            config.backend
        );
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Same configuration with another seed
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut config = self.config.clone();
        config.seed = seed;
        Self { config }
    }

    /// Simulated seconds after `step` steps
    pub fn elapsed_time(&self, step: u32) -> f64 {
        f64::from(step) * self.config.time_step
    }

    /// Build the transition engine for `grid`
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` if the grid shape differs from the configuration.
    pub fn engine(&self, grid: &Grid) -> Result<TransitionEngine> {
        let (rows, cols) = (grid.rows(), grid.cols());
        if (rows, cols) != (self.config.rows, self.config.cols) {
            return Err(FireCaError::geometry(format!(
                "grid is {rows}x{cols}, configuration expects {}x{}",
                self.config.rows, self.config.cols
            )));
        }
        let geometry = NeighborGeometry::compute(
            grid.covariates(),
            self.config.connectivity,
            self.config.cell_size,
        )?;
        TransitionEngine::new(
            geometry,
            self.config.burn_duration,
            self.config.estimator,
            self.config.backend,
            self.config.seed,
        )
    }

    /// Advance `grid` by one step
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` if the grid shape differs from the configuration
    /// - `DivergedState` if a probability is non-finite
    /// - `InvalidStateTransition` if a cell leaves the legal path
    pub fn step(&self, grid: &Grid, params: &Parameters) -> Result<Grid> {
        self.engine(grid)?.advance(grid, params)
    }

    /// Lazily advance a copy of `grid` by `n_steps` steps
    ///
    /// The iterator yields the snapshot after each step (steps `1..=n_steps`
    /// relative to `grid`) and ends after the first error.
    pub fn run(&self, grid: &Grid, params: &Parameters, n_steps: usize) -> Run {
        let (engine, pending_error) = match self.engine(grid) {
            Ok(engine) => (Some(engine), None),
            Err(e) => (None, Some(e)),
        };
        debug!("Starting run of {} steps from step {}", n_steps, grid.step_index());
        Run {
            engine,
            pending_error,
            grid: grid.clone(),
            params: *params,
            remaining: n_steps,
            done: false,
        }
    }
}

/// Lazy, finite sequence of snapshots produced by [`Simulator::run`]
#[derive(Debug)]
pub struct Run {
    engine: Option<TransitionEngine>,
    pending_error: Option<FireCaError>,
    grid: Grid,
    params: Parameters,
    remaining: usize,
    done: bool,
}

impl Run {
    /// Grid after the most recently yielded step
    ///
    /// Unlike a snapshot it keeps the parameter gradients.
    pub fn current(&self) -> &Grid {
        &self.grid
    }

    /// Steps still to be yielded
    pub fn remaining(&self) -> usize {
        if self.done {
            0
        } else {
            self.remaining
        }
    }
}

impl Iterator for Run {
    type Item = Result<GridSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            self.done = true;
            return Some(Err(err));
        }
        let Some(engine) = self.engine.as_ref() else {
            self.done = true;
            return None;
        };
        if self.remaining == 0 {
            self.done = true;
            return None;
        }

        match engine.advance(&self.grid, &self.params) {
            Ok(next) => {
                self.grid = next;
                self.remaining -= 1;
                let snapshot = self.grid.snapshot();
                let stats = snapshot.stats();
                debug!(
                    "Step {}: {} burning, {} burned out, {} unburned",
                    snapshot.step, stats.burning, stats.burned_out, stats.unburned
                );
                if stats.burning == 0 && self.remaining > 0 {
                    debug!("Fire extinguished at step {}", snapshot.step);
                }
                Some(Ok(snapshot))
            }
            Err(e) => {
                warn!("Run stopped at step {}: {}", self.grid.step_index() + 1, e);
                self.done = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let upper = self.remaining() + usize::from(self.pending_error.is_some());
        (0, Some(upper))
    }
}

impl FusedIterator for Run {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Backend;
    use crate::grid::{CellState, Covariates};

    fn simulator(rows: usize, cols: usize) -> Simulator {
        Simulator::new(ModelConfig {
            backend: Backend::Sequential,
            seed: 5,
            ..ModelConfig::with_shape(rows, cols)
        })
        .unwrap()
    }

    fn grid(rows: usize, cols: usize) -> Grid {
        let covariates = Covariates::uniform(rows, cols, 1.0, 0.1).unwrap();
        Grid::initialize(covariates, &[(rows / 2, cols / 2)]).unwrap()
    }

    #[test]
    fn test_run_yields_requested_steps() {
        let sim = simulator(7, 7);
        let snapshots: Vec<_> = sim
            .run(&grid(7, 7), &Parameters::default(), 5)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(snapshots.len(), 5);
        for (i, snapshot) in snapshots.iter().enumerate() {
            assert_eq!(snapshot.step as usize, i + 1);
        }
    }

    #[test]
    fn test_run_does_not_touch_input_grid() {
        let sim = simulator(5, 5);
        let start = grid(5, 5);
        let mut run = sim.run(&start, &Parameters::default(), 3);
        assert!(run.next().is_some());
        assert_eq!(start.step_index(), 0);
        assert_eq!(run.current().step_index(), 1);
        assert_eq!(run.remaining(), 2);
    }

    #[test]
    fn test_run_matches_repeated_step() {
        let sim = simulator(6, 6);
        let params = Parameters::default();
        let mut g = grid(6, 6);
        for _ in 0..4 {
            g = sim.step(&g, &params).unwrap();
        }
        let last = sim.run(&grid(6, 6), &params, 4).last().unwrap().unwrap();
        assert_eq!(last.states, g.snapshot().states);
    }

    #[test]
    fn test_shape_mismatch_is_reported_and_fused() {
        let sim = simulator(5, 5);
        let mut run = sim.run(&grid(4, 5), &Parameters::default(), 3);
        assert!(matches!(
            run.next(),
            Some(Err(FireCaError::InvalidGeometry { .. }))
        ));
        assert!(run.next().is_none());
        assert!(run.next().is_none());
        assert!(sim.step(&grid(4, 5), &Parameters::default()).is_err());
    }

    #[test]
    fn test_divergence_ends_run() {
        let sim = simulator(5, 5);
        let params = Parameters::default().with(crate::model::ParamName::Fuel, f64::NAN);
        let mut run = sim.run(&grid(5, 5), &params, 3);
        assert!(matches!(run.next(), Some(Err(ref e)) if e.is_divergence()));
        assert!(run.next().is_none());
    }

    #[test]
    fn test_zero_steps() {
        let sim = simulator(3, 3);
        assert_eq!(sim.run(&grid(3, 3), &Parameters::default(), 0).count(), 0);
    }

    #[test]
    fn test_elapsed_time_and_seed() {
        let sim = simulator(3, 3);
        assert_eq!(sim.elapsed_time(4), 4.0 * sim.config().time_step);
        assert_eq!(sim.with_seed(99).config().seed, 99);
        let g = sim.step(&grid(3, 3), &Parameters::default()).unwrap();
        assert_eq!(g.state(1, 1), CellState::Burning);
    }
}
