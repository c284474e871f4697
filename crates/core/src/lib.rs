//! Differentiable Wildfire Cellular Automaton
//!
//! A stochastic cellular automaton for wildfire spread whose transition
//! function is differentiable with respect to its physical parameters, and a
//! calibration loop that fits those parameters to observed burn scars.
//!
//! ## Pipeline
//!
//! - [`grid`]: covariate rasters and per-cell fire state
//! - [`geometry`]: neighbour directions, slope-adjusted distances, wind alignment
//! - [`model`]: trainable parameters and the per-pair spread probability
//! - [`engine`]: synchronous stochastic update with gradient estimators
//! - [`simulation`]: configuration and multi-step runs
//! - [`calibration`]: loss, optimizers and the training loop
//!
//! ```rust,ignore
//! use fire_ca_core::{Covariates, Grid, ModelConfig, Parameters, Simulator};
//!
//! let covariates = Covariates::uniform(32, 32, 1.2, 0.08)?.with_uniform_wind(5.0, 90.0)?;
//! let grid = Grid::initialize(covariates, &[(16, 16)])?;
//! let simulator = Simulator::new(ModelConfig::with_shape(32, 32))?;
//! for snapshot in simulator.run(&grid, &Parameters::default(), 20) {
//!     println!("{:?}", snapshot?.stats());
//! }
//! ```

// Core types and utilities
pub mod core_types;
pub mod error;

// Forward model
pub mod engine;
pub mod geometry;
pub mod grid;
pub mod model;
pub mod simulation;

// Parameter fitting
pub mod calibration;

pub use core_types::{Dual, Gradient, PARAM_COUNT};
pub use error::{FireCaError, Result};

pub use engine::{combined_probability, Backend, GradientEstimator, TransitionEngine};
pub use geometry::{Connectivity, NeighborGeometry, NeighborLink};
pub use grid::{
    CellCovariates, CellState, CovariateRasters, Covariates, Grid, GridSnapshot, Raster,
    SnapshotStats,
};
pub use model::{ignition_probability, Bound, ParamName, ParameterBounds, Parameters};
pub use simulation::{ModelConfig, Run, Simulator};

pub use calibration::{
    evaluate, loss_and_gradient, train, CalibrationConfig, CalibrationReport, Calibrator,
    ConstraintPolicy, DivergencePolicy, EvaluationMetrics, FireModel, LossKind, Observation,
    OptimizerKind, StopReason, TimedMask,
};
