//! Static per-cell covariates
//!
//! Fuel, terrain and wind rasters supplied by the data-loading side. They are
//! validated once and then shared read-only by every grid of a run.

use super::raster::Raster;
use crate::error::{FireCaError, Result};

/// Raw covariate rasters as handed over by a loader
#[derive(Debug, Clone)]
pub struct CovariateRasters {
    /// Fuel load (kg/m², non-negative)
    pub fuel_load: Raster,
    /// Fuel moisture content (fraction, non-negative)
    pub fuel_moisture: Raster,
    /// Terrain slope (degrees, 0-90)
    ///
    /// Validated and kept for reporting only. Spread reads the directional
    /// incline from `elevation`; a slope raster carries no aspect, so a
    /// landscape with flat elevation has no slope effect whatever this holds.
    pub slope: Raster,
    /// Terrain elevation (meters)
    pub elevation: Raster,
    /// Wind speed (m/s, non-negative)
    pub wind_speed: Raster,
    /// Direction the wind blows toward (degrees clockwise from north)
    pub wind_direction: Raster,
}

/// Validated covariates for one grid
#[derive(Debug, Clone)]
pub struct Covariates {
    rows: usize,
    cols: usize,
    fuel_load: Raster,
    fuel_moisture: Raster,
    slope: Raster,
    elevation: Raster,
    wind_speed: Raster,
    wind_direction: Raster,
}

/// Covariate values of a single cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCovariates {
    /// Fuel load (kg/m²)
    pub fuel_load: f64,
    /// Fuel moisture content (fraction)
    pub fuel_moisture: f64,
    /// Terrain slope (degrees)
    pub slope: f64,
    /// Elevation (meters)
    pub elevation: f64,
    /// Wind speed (m/s)
    pub wind_speed: f64,
    /// Direction the wind blows toward (degrees clockwise from north)
    pub wind_direction: f64,
}

impl Covariates {
    /// Validate rasters against the grid dimensions
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` if the grid is empty or any raster is not `rows x cols`
    /// - `Configuration` if a raster holds a non-finite or out-of-range value
    pub fn new(rows: usize, cols: usize, rasters: CovariateRasters) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(FireCaError::geometry(format!(
                "grid must have at least one cell, got {rows}x{cols}"
            )));
        }

        let CovariateRasters {
            fuel_load,
            fuel_moisture,
            slope,
            elevation,
            wind_speed,
            wind_direction,
        } = rasters;

        let named = [
            ("fuel_load", &fuel_load),
            ("fuel_moisture", &fuel_moisture),
            ("slope", &slope),
            ("elevation", &elevation),
            ("wind_speed", &wind_speed),
            ("wind_direction", &wind_direction),
        ];
        for (name, raster) in named {
            raster.ensure_shape(name, rows, cols)?;
            if let Some(bad) = raster.as_slice().iter().find(|v| !v.is_finite()) {
                return Err(FireCaError::config(name, format!("non-finite value {bad}")));
            }
        }

        ensure_non_negative("fuel_load", &fuel_load)?;
        ensure_non_negative("fuel_moisture", &fuel_moisture)?;
        ensure_non_negative("wind_speed", &wind_speed)?;
        if let Some(bad) = slope.as_slice().iter().find(|v| !(0.0..=90.0).contains(*v)) {
            return Err(FireCaError::config(
                "slope",
                format!("{bad} is outside 0-90 degrees"),
            ));
        }

        Ok(Self {
            rows,
            cols,
            fuel_load,
            fuel_moisture,
            slope,
            elevation,
            wind_speed,
            wind_direction,
        })
    }

    /// Flat, calm landscape with uniform fuel
    ///
    /// # Errors
    ///
    /// Same as [`Covariates::new`].
    pub fn uniform(rows: usize, cols: usize, fuel_load: f64, fuel_moisture: f64) -> Result<Self> {
        Self::new(
            rows,
            cols,
            CovariateRasters {
                fuel_load: Raster::with_value(rows, cols, fuel_load),
                fuel_moisture: Raster::with_value(rows, cols, fuel_moisture),
                slope: Raster::new(rows, cols),
                elevation: Raster::new(rows, cols),
                wind_speed: Raster::new(rows, cols),
                wind_direction: Raster::new(rows, cols),
            },
        )
    }

    /// Replace the wind with a uniform field
    ///
    /// # Errors
    ///
    /// `Configuration` if the speed is negative or either value is non-finite.
    pub fn with_uniform_wind(mut self, speed: f64, direction_degrees: f64) -> Result<Self> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(FireCaError::config("wind_speed", format!("{speed} is invalid")));
        }
        if !direction_degrees.is_finite() {
            return Err(FireCaError::config(
                "wind_direction",
                format!("{direction_degrees} is invalid"),
            ));
        }
        self.wind_speed.fill(speed);
        self.wind_direction.fill(direction_degrees);
        Ok(self)
    }

    /// Replace elevation, deriving the slope raster from it
    ///
    /// Slope is the steepest-descent angle from central differences (one-sided
    /// at the edges), as the terrain loaders produce it.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` on shape mismatch, `Configuration` on non-finite values.
    pub fn with_elevation(mut self, elevation: Raster, cell_size: f64) -> Result<Self> {
        elevation.ensure_shape("elevation", self.rows, self.cols)?;
        if let Some(bad) = elevation.as_slice().iter().find(|v| !v.is_finite()) {
            return Err(FireCaError::config("elevation", format!("non-finite value {bad}")));
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(FireCaError::config("cell_size", "must be positive"));
        }
        self.slope = slope_from_elevation(&elevation, cell_size);
        self.elevation = elevation;
        Ok(self)
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of cells
    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Covariates of the cell at flat index `index`
    pub fn cell(&self, index: usize) -> CellCovariates {
        CellCovariates {
            fuel_load: self.fuel_load.as_slice()[index],
            fuel_moisture: self.fuel_moisture.as_slice()[index],
            slope: self.slope.as_slice()[index],
            elevation: self.elevation.as_slice()[index],
            wind_speed: self.wind_speed.as_slice()[index],
            wind_direction: self.wind_direction.as_slice()[index],
        }
    }

    /// Fuel load raster
    pub fn fuel_load(&self) -> &Raster {
        &self.fuel_load
    }

    /// Fuel moisture raster
    pub fn fuel_moisture(&self) -> &Raster {
        &self.fuel_moisture
    }

    /// Slope raster
    ///
    /// Informational: the spread model uses elevation differences instead.
    pub fn slope(&self) -> &Raster {
        &self.slope
    }

    /// Elevation raster
    pub fn elevation(&self) -> &Raster {
        &self.elevation
    }

    /// Wind speed raster
    pub fn wind_speed(&self) -> &Raster {
        &self.wind_speed
    }

    /// Wind direction raster
    pub fn wind_direction(&self) -> &Raster {
        &self.wind_direction
    }
}

fn ensure_non_negative(name: &str, raster: &Raster) -> Result<()> {
    match raster.as_slice().iter().find(|&&v| v < 0.0) {
        Some(bad) => Err(FireCaError::config(name, format!("negative value {bad}"))),
        None => Ok(()),
    }
}

fn slope_from_elevation(elevation: &Raster, cell_size: f64) -> Raster {
    let (rows, cols) = elevation.shape();
    let derivative = |lo: f64, hi: f64, span: usize| {
        if span == 0 {
            0.0
        } else {
            (hi - lo) / (span as f64 * cell_size)
        }
    };
    Raster::from_fn(rows, cols, |r, c| {
        let (r0, r1) = (r.saturating_sub(1), (r + 1).min(rows - 1));
        let (c0, c1) = (c.saturating_sub(1), (c + 1).min(cols - 1));
        let dz_dy = derivative(elevation.get(r0, c), elevation.get(r1, c), r1 - r0);
        let dz_dx = derivative(elevation.get(r, c0), elevation.get(r, c1), c1 - c0);
        dz_dx.hypot(dz_dy).atan().to_degrees()
    })
}
