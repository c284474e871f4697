//! Calibration loop configuration

use super::loss::LossKind;
use super::optimizer::{ConstraintPolicy, OptimizerKind};
use crate::error::{FireCaError, Result};
use crate::model::{ParamName, ParameterBounds};
use serde::{Deserialize, Serialize};

/// What to do when the loss or gradient becomes non-finite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DivergencePolicy {
    /// Stop with `DivergedState` naming the iteration
    Abort,
    /// Roll back the last update and retry with a smaller learning rate
    ReduceLearningRate {
        /// Multiplier applied to the learning rate, in `(0, 1)`
        factor: f64,
        /// Consecutive retries before giving up
        max_retries: u32,
    },
}

impl Default for DivergencePolicy {
    fn default() -> Self {
        DivergencePolicy::ReduceLearningRate {
            factor: 0.5,
            max_retries: 5,
        }
    }
}

/// Options of the calibration loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Initial step size
    pub learning_rate: f64,
    /// Maximum number of iterations
    pub epochs: usize,
    /// Update rule
    pub optimizer: OptimizerKind,
    /// Per-cell loss
    pub loss: LossKind,
    /// Physically valid parameter ranges
    pub bounds: ParameterBounds,
    /// How `bounds` are enforced
    pub constraint: ConstraintPolicy,
    /// Parameters held at their initial value
    pub frozen: Vec<ParamName>,
    /// Maximum global gradient norm
    pub gradient_clip: Option<f64>,
    /// Reaction to a non-finite loss or update
    pub divergence: DivergencePolicy,
    /// Loss change below which an epoch counts as stalled
    pub tolerance: f64,
    /// Consecutive stalled epochs that end calibration
    pub patience: usize,
    /// Log every n-th epoch at info level (0 disables)
    pub log_every: usize,
    /// Draw a fresh seed `seed + epoch` every epoch
    pub resample_each_epoch: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            epochs: 200,
            optimizer: OptimizerKind::default(),
            loss: LossKind::default(),
            bounds: ParameterBounds::default(),
            constraint: ConstraintPolicy::default(),
            frozen: Vec::new(),
            gradient_clip: None,
            divergence: DivergencePolicy::default(),
            tolerance: 1e-6,
            patience: 5,
            log_every: 10,
            resample_each_epoch: false,
        }
    }
}

impl CalibrationConfig {
    /// Whether `name` receives updates
    pub fn is_trainable(&self, name: ParamName) -> bool {
        !self.frozen.contains(&name)
    }

    /// Freeze every parameter except `trainable`
    pub fn train_only(mut self, trainable: &[ParamName]) -> Self {
        self.frozen = ParamName::ALL
            .into_iter()
            .filter(|name| !trainable.contains(name))
            .collect();
        self
    }

    /// Check every option
    ///
    /// # Errors
    ///
    /// `Configuration` naming the first invalid option.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(FireCaError::config(
                "learning_rate",
                format!("{} is not positive", self.learning_rate),
            ));
        }
        if self.epochs == 0 {
            return Err(FireCaError::config("epochs", "must be at least 1"));
        }
        match self.optimizer {
            OptimizerKind::Sgd => {}
            OptimizerKind::Momentum { beta } => check_decay("optimizer.beta", beta)?,
            OptimizerKind::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                check_decay("optimizer.beta1", beta1)?;
                check_decay("optimizer.beta2", beta2)?;
                if !(epsilon.is_finite() && epsilon > 0.0) {
                    return Err(FireCaError::config(
                        "optimizer.epsilon",
                        format!("{epsilon} is not positive"),
                    ));
                }
            }
        }
        self.bounds.validate()?;
        if let Some(clip) = self.gradient_clip {
            if !(clip.is_finite() && clip > 0.0) {
                return Err(FireCaError::config(
                    "gradient_clip",
                    format!("{clip} is not positive"),
                ));
            }
        }
        if let DivergencePolicy::ReduceLearningRate { factor, .. } = self.divergence {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(FireCaError::config(
                    "divergence.factor",
                    format!("{factor} is outside (0, 1)"),
                ));
            }
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(FireCaError::config(
                "tolerance",
                format!("{} is negative or non-finite", self.tolerance),
            ));
        }
        if self.patience == 0 {
            return Err(FireCaError::config("patience", "must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    ///
    /// `Configuration` if the JSON is malformed or an option is invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FireCaError::config("calibration", format!("failed to parse: {e}")))?;
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
            .map_err(|e| FireCaError::config("calibration", format!("failed to serialize: {e}")))
    }
}

fn check_decay(option: &str, beta: f64) -> Result<()> {
    if (0.0..1.0).contains(&beta) {
        Ok(())
    } else {
        Err(FireCaError::config(option, format!("{beta} is outside [0, 1)")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CalibrationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_options() {
        let bad = [
            CalibrationConfig {
                learning_rate: 0.0,
                ..CalibrationConfig::default()
            },
            CalibrationConfig {
                epochs: 0,
                ..CalibrationConfig::default()
            },
            CalibrationConfig {
                optimizer: OptimizerKind::Momentum { beta: 1.0 },
                ..CalibrationConfig::default()
            },
            CalibrationConfig {
                gradient_clip: Some(-1.0),
                ..CalibrationConfig::default()
            },
            CalibrationConfig {
                divergence: DivergencePolicy::ReduceLearningRate {
                    factor: 1.5,
                    max_retries: 1,
                },
                ..CalibrationConfig::default()
            },
            CalibrationConfig {
                patience: 0,
                ..CalibrationConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                config.validate().unwrap_err(),
                FireCaError::Configuration { .. }
            ));
        }
    }

    #[test]
    fn test_train_only() {
        let config = CalibrationConfig::default().train_only(&[ParamName::Wind]);
        assert!(config.is_trainable(ParamName::Wind));
        assert!(!config.is_trainable(ParamName::Intercept));
        assert_eq!(config.frozen.len(), 5);
    }

    #[test]
    fn test_json_round_trip() {
        let config = CalibrationConfig {
            optimizer: OptimizerKind::Sgd,
            frozen: vec![ParamName::Slope],
            gradient_clip: Some(10.0),
            divergence: DivergencePolicy::Abort,
            ..CalibrationConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert!(json.contains("\"slope\""));
        assert_eq!(CalibrationConfig::from_json_str(&json).unwrap(), config);
    }
}
