//! Error types for grid construction, stepping and calibration.

use crate::grid::CellState;
use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FireCaError>;

/// Errors raised by the cellular automaton and the calibration loop
#[derive(Debug, Clone, PartialEq)]
pub enum FireCaError {
    /// Raster shapes, grid dimensions or coordinates disagree
    InvalidGeometry {
        /// What went wrong
        reason: String,
    },
    /// A cell attempted a transition outside `Unburned → Burning → BurnedOut`
    ///
    /// Unreachable under a correct engine; carries the full cell context.
    InvalidStateTransition {
        /// Row of the offending cell
        row: usize,
        /// Column of the offending cell
        col: usize,
        /// Step that attempted the transition
        step: u32,
        /// State before the step
        from: CellState,
        /// Requested state
        to: CellState,
    },
    /// A probability, loss or gradient became non-finite
    DivergedState {
        /// Where the non-finite value appeared
        context: String,
        /// Calibration iteration, when raised inside the calibration loop
        iteration: Option<usize>,
    },
    /// A configuration option is missing or out of range
    Configuration {
        /// Name of the option
        option: String,
        /// What went wrong
        reason: String,
    },
}

impl FireCaError {
    /// Shorthand for [`FireCaError::InvalidGeometry`]
    pub fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`FireCaError::Configuration`]
    pub fn config(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`FireCaError::DivergedState`] outside calibration
    pub fn diverged(context: impl Into<String>) -> Self {
        Self::DivergedState {
            context: context.into(),
            iteration: None,
        }
    }

    /// Attach the calibration iteration to a divergence error
    ///
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn at_iteration(self, iteration: usize) -> Self {
        match self {
            Self::DivergedState { context, .. } => Self::DivergedState {
                context,
                iteration: Some(iteration),
            },
            other => other,
        }
    }

    /// Whether the calibration loop may recover from this error
    pub fn is_divergence(&self) -> bool {
        matches!(self, Self::DivergedState { .. })
    }
}

impl fmt::Display for FireCaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGeometry { reason } => write!(f, "invalid geometry: {reason}"),
            Self::InvalidStateTransition {
                row,
                col,
                step,
                from,
                to,
            } => write!(
                f,
                "invalid state transition at ({row}, {col}) in step {step}: {from:?} -> {to:?}"
            ),
            Self::DivergedState {
                context,
                iteration: Some(iteration),
            } => write!(f, "diverged in iteration {iteration}: {context}"),
            Self::DivergedState {
                context,
                iteration: None,
            } => write!(f, "diverged: {context}"),
            Self::Configuration { option, reason } => {
                write!(f, "invalid configuration `{option}`: {reason}")
            }
        }
    }
}

impl std::error::Error for FireCaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = FireCaError::geometry("fuel_load is 3x3, grid is 5x5");
        assert_eq!(
            err.to_string(),
            "invalid geometry: fuel_load is 3x3, grid is 5x5"
        );

        let err = FireCaError::config("burn_duration", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid configuration `burn_duration`: must be at least 1"
        );

        let err = FireCaError::InvalidStateTransition {
            row: 2,
            col: 3,
            step: 7,
            from: CellState::BurnedOut,
            to: CellState::Burning,
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition at (2, 3) in step 7: BurnedOut -> Burning"
        );
    }

    #[test]
    fn test_at_iteration_only_tags_divergence() {
        let err = FireCaError::diverged("loss is NaN").at_iteration(4);
        assert_eq!(err.to_string(), "diverged in iteration 4: loss is NaN");
        assert!(err.is_divergence());

        let err = FireCaError::geometry("bad").at_iteration(4);
        assert!(!err.is_divergence());
        assert_eq!(err, FireCaError::geometry("bad"));
    }
}
