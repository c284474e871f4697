//! Dense 2D rasters
//!
//! Every per-cell quantity (covariates, masks, probabilities) is stored as a
//! flat `Vec<f64>` in row-major order.

use crate::error::{FireCaError, Result};
use serde::{Deserialize, Serialize};

/// Row-major 2D field of `f64` values
///
/// Deserialization goes through [`Raster::from_vec`], so a decoded raster
/// always holds exactly `rows * cols` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RasterRepr")]
pub struct Raster {
    /// Values in row-major order (row * cols + col)
    data: Vec<f64>,
    /// Number of rows
    rows: usize,
    /// Number of columns
    cols: usize,
}

/// Unchecked wire form of [`Raster`]
#[derive(Deserialize)]
struct RasterRepr {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl TryFrom<RasterRepr> for Raster {
    type Error = FireCaError;

    fn try_from(repr: RasterRepr) -> Result<Self> {
        Raster::from_vec(repr.rows, repr.cols, repr.data)
    }
}

impl Raster {
    /// Create a raster initialized to zero
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::with_value(rows, cols, 0.0)
    }

    /// Create a raster with every cell set to `value`
    #[must_use]
    pub fn with_value(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            data: vec![value; rows * cols],
            rows,
            cols,
        }
    }

    /// Wrap row-major data
    ///
    /// # Errors
    ///
    /// Returns `InvalidGeometry` if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(FireCaError::geometry(format!(
                "raster data has {} values, expected {rows}x{cols} = {}",
                data.len(),
                rows * cols
            )));
        }
        Ok(Self { data, rows, cols })
    }

    /// Build a raster by evaluating `f(row, col)` for every cell
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                data.push(f(row, col));
            }
        }
        Self { data, rows, cols }
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raster has no cells
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get reference to raster data
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Get mutable reference to raster data
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Get value at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(
            row < self.rows && col < self.cols,
            "Coordinates out of bounds"
        );
        self.data[row * self.cols + col]
    }

    /// Set value at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        assert!(
            row < self.rows && col < self.cols,
            "Coordinates out of bounds"
        );
        self.data[row * self.cols + col] = value;
    }

    /// Fill entire raster with a value
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Fail with `InvalidGeometry` unless the raster is `rows x cols`
    ///
    /// # Errors
    ///
    /// Returns `InvalidGeometry` naming the raster on mismatch.
    pub fn ensure_shape(&self, name: &str, rows: usize, cols: usize) -> Result<()> {
        if self.shape() == (rows, cols) {
            Ok(())
        } else {
            Err(FireCaError::geometry(format!(
                "{name} is {}x{}, grid is {rows}x{cols}",
                self.rows, self.cols
            )))
        }
    }
}
