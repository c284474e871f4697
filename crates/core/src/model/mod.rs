//! Spread-rate model: trainable parameters and the per-pair ignition probability

pub mod params;
pub mod spread;

pub use params::{Bound, DualParameters, ParamName, ParameterBounds, Parameters};
pub use spread::{ignition_probability, spread_logit, CellView};
