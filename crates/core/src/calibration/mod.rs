//! Calibration loop
//!
//! Fits [`Parameters`](crate::model::Parameters) to observed burn masks by
//! gradient descent. The loss is computed on the cumulative burn probability
//! of every cell, and its gradient comes from dual numbers carried through
//! the whole forward run.

pub mod config;
pub mod loss;
pub mod metrics;
pub mod observation;
pub mod optimizer;
pub mod trainer;

pub use config::{CalibrationConfig, DivergencePolicy};
pub use loss::{LossKind, PROBABILITY_EPS};
pub use metrics::{arrival_mae, ConfusionCounts, EvaluationMetrics};
pub use observation::{Observation, TimedMask};
pub use optimizer::{clip_gradient, ConstraintPolicy, OptimizerKind, OptimizerState};
pub use trainer::{
    evaluate, loss_and_gradient, train, CalibrationReport, Calibrator, FireModel, StopReason,
};
