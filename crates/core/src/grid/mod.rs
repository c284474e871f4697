//! Grid state store: rasters, covariates and per-cell fire state

pub mod covariates;
pub mod raster;
pub mod state;

pub use covariates::{CellCovariates, CovariateRasters, Covariates};
pub use raster::Raster;
pub use state::{CellState, Grid, GridSnapshot, SnapshotStats};
