//! Forward-model configuration

use crate::engine::{Backend, GradientEstimator};
use crate::error::{FireCaError, Result};
use crate::geometry::Connectivity;
use crate::model::Parameters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything needed to run the cellular automaton
///
/// Every field has a default, so a JSON file only needs the options it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Grid rows
    pub rows: usize,
    /// Grid columns
    pub cols: usize,
    /// Cell edge length in meters
    pub cell_size: f64,
    /// Neighbourhood used for spread
    pub connectivity: Connectivity,
    /// Steps a cell burns before burning out
    pub burn_duration: u32,
    /// Simulated seconds per step
    pub time_step: f64,
    /// Parameters used when the caller supplies none
    pub initial_params: Parameters,
    /// Scheduling of per-cell work
    pub backend: Backend,
    /// Seed of the per-step uniform draws
    pub seed: u64,
    /// Gradient estimator for ignition sampling
    pub estimator: GradientEstimator,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rows: 64,
            cols: 64,
            cell_size: 30.0,
            connectivity: Connectivity::Eight,
            burn_duration: 3,
            time_step: 600.0,
            initial_params: Parameters::default(),
            backend: Backend::Parallel,
            seed: 0,
            estimator: GradientEstimator::StraightThrough,
        }
    }
}

impl ModelConfig {
    /// Default configuration for a `rows x cols` grid
    pub fn with_shape(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            ..Self::default()
        }
    }

    /// Check every option
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` for an empty grid
    /// - `Configuration` for any other out-of-range option
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(FireCaError::geometry(format!(
                "grid must have at least one cell, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(FireCaError::config(
                "cell_size",
                format!("{} is not a positive length", self.cell_size),
            ));
        }
        if self.burn_duration == 0 {
            return Err(FireCaError::config("burn_duration", "must be at least 1 step"));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(FireCaError::config(
                "time_step",
                format!("{} is not a positive duration", self.time_step),
            ));
        }
        if !self.initial_params.is_finite() {
            return Err(FireCaError::config(
                "initial_params",
                "every parameter must be finite",
            ));
        }
        if let GradientEstimator::Relaxed { temperature } = self.estimator {
            if !(temperature.is_finite() && temperature > 0.0) {
                return Err(FireCaError::config(
                    "estimator.temperature",
                    format!("{temperature} is not positive"),
                ));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    ///
    /// `Configuration` if the JSON is malformed, plus anything
    /// [`ModelConfig::validate`] reports.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FireCaError::config("model", format!("failed to parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON
    ///
    /// # Errors
    ///
    /// `Configuration` if serialization fails.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FireCaError::config("model", format!("failed to serialize: {e}")))
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// `Configuration` if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            FireCaError::config("model", format!("failed to load {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Save as a JSON file
    ///
    /// # Errors
    ///
    /// `Configuration` if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json_string()?).map_err(|e| {
            FireCaError::config("model", format!("failed to save {}: {e}", path.display()))
        })
    }
}
