//! Gradient-descent calibration of the spread parameters

use super::config::{CalibrationConfig, DivergencePolicy};
use super::loss::LossKind;
use super::metrics::{arrival_mae, ConfusionCounts, EvaluationMetrics};
use super::observation::Observation;
use super::optimizer::{clip_gradient, ConstraintPolicy, OptimizerState};
use crate::core_types::{Dual, Gradient};
use crate::error::{FireCaError, Result};
use crate::grid::Grid;
use crate::model::{ParamName, Parameters};
use crate::simulation::Simulator;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A simulator, its starting grid and the horizon a calibration runs over
#[derive(Debug, Clone)]
pub struct FireModel {
    /// Forward model
    pub simulator: Simulator,
    /// Grid every run starts from
    pub initial_grid: Grid,
    /// Parameters calibration starts from and evaluation uses
    pub params: Parameters,
    /// Steps per run
    pub n_steps: usize,
}

impl FireModel {
    /// Bundle a simulator with its starting grid
    ///
    /// Starts from the configuration's initial parameters.
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` if the grid shape differs from the configuration
    /// - `Configuration` if `n_steps` is zero
    pub fn new(simulator: Simulator, initial_grid: Grid, n_steps: usize) -> Result<Self> {
        let config = simulator.config();
        if (initial_grid.rows(), initial_grid.cols()) != (config.rows, config.cols) {
            return Err(FireCaError::geometry(format!(
                "grid is {}x{}, configuration expects {}x{}",
                initial_grid.rows(),
                initial_grid.cols(),
                config.rows,
                config.cols
            )));
        }
        if n_steps == 0 {
            return Err(FireCaError::config("n_steps", "must be at least 1"));
        }
        let params = config.initial_params;
        Ok(Self {
            simulator,
            initial_grid,
            params,
            n_steps,
        })
    }

    /// Same model starting from other parameters
    pub fn with_params(mut self, params: Parameters) -> Self {
        self.params = params;
        self
    }
}

/// Why calibration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Ran every configured epoch
    MaxEpochs,
    /// Loss change stayed below tolerance for `patience` epochs
    Converged,
    /// The stop signal was raised
    Stopped,
}

/// Outcome of [`train`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Parameters after the last committed update
    pub params: Parameters,
    /// Parameters with the lowest evaluated loss
    pub best_params: Parameters,
    /// Lowest evaluated loss
    pub best_loss: f64,
    /// Loss of every successful epoch, evaluated before its update
    pub loss_history: Vec<f64>,
    /// Iterations that diverged and were rolled back
    pub diverged_iterations: Vec<usize>,
    /// Why the loop ended
    pub stop_reason: StopReason,
    /// Learning rate at the end of the loop
    pub final_learning_rate: f64,
}

/// Loss of `params` against `observation` and its exact gradient
///
/// Runs the model forward once, summing the loss over every observed step
/// on the cumulative burn probability.
///
/// # Errors
///
/// - `InvalidGeometry` / `Configuration` if the observation does not fit
///   the model
/// - `DivergedState` if a probability or the loss is non-finite
pub fn loss_and_gradient(
    model: &FireModel,
    params: &Parameters,
    observation: &Observation,
    loss: LossKind,
) -> Result<(f64, Gradient)> {
    let grid = &model.initial_grid;
    observation.validate(grid.rows(), grid.cols(), model.n_steps)?;
    objective(&model.simulator, model, params, observation, loss)
}

fn objective(
    simulator: &Simulator,
    model: &FireModel,
    params: &Parameters,
    observation: &Observation,
    loss: LossKind,
) -> Result<(f64, Gradient)> {
    let targets = observation.targets(model.n_steps);
    let horizon = targets.last().map_or(0, |t| t.0);

    let mut total = Dual::zero();
    let mut pending = targets.into_iter().peekable();
    while let Some((_, mask)) = pending.next_if(|t| t.0 == 0) {
        total += loss.mask_loss(model.initial_grid.burn_probability_duals(), mask);
    }

    let mut run = simulator.run(&model.initial_grid, params, horizon);
    let mut step = 0;
    while let Some(snapshot) = run.next() {
        snapshot?;
        step += 1;
        while let Some((_, mask)) = pending.next_if(|t| t.0 == step) {
            total += loss.mask_loss(run.current().burn_probability_duals(), mask);
        }
    }

    if !total.is_finite() {
        return Err(FireCaError::diverged(format!(
            "loss {} or its gradient is non-finite",
            total.value
        )));
    }
    Ok((total.value, total.grad))
}

/// Score `model.params` against `observation` without updating anything
///
/// # Errors
///
/// Same as [`loss_and_gradient`].
pub fn evaluate(model: &FireModel, observation: &Observation) -> Result<EvaluationMetrics> {
    let (loss, _) = loss_and_gradient(model, &model.params, observation, LossKind::default())?;

    let Some((final_step, observed)) = observation.final_target(model.n_steps) else {
        return Err(FireCaError::config("observation", "series is empty"));
    };
    let mut snapshot = model.initial_grid.snapshot();
    for next in model
        .simulator
        .run(&model.initial_grid, &model.params, final_step)
    {
        snapshot = next?;
    }

    let simulated = snapshot.burned_mask();
    let confusion = ConfusionCounts::compare(&simulated, observed);
    let start = model.initial_grid.step_index();
    let simulated_arrival: Vec<Option<u32>> = snapshot
        .arrival_step
        .iter()
        .map(|a| a.map(|s| s.saturating_sub(start)))
        .collect();
    let mae = observation
        .arrival_steps()
        .and_then(|observed_arrival| arrival_mae(&simulated_arrival, &observed_arrival));

    let metrics = EvaluationMetrics {
        iou: confusion.iou(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1(),
        accuracy: confusion.accuracy(),
        loss,
        simulated_burned_cells: confusion.true_positive + confusion.false_positive,
        observed_burned_cells: confusion.true_positive + confusion.false_negative,
        arrival_mae: mae,
        confusion,
    };
    info!(
        "Evaluation: IoU={:.3}, F1={:.3}, loss={:.4}, burned {} simulated vs {} observed",
        metrics.iou,
        metrics.f1,
        metrics.loss,
        metrics.simulated_burned_cells,
        metrics.observed_burned_cells
    );
    Ok(metrics)
}

/// Fit `model.params` to `observation`
///
/// # Errors
///
/// See [`Calibrator::train`].
pub fn train(
    model: &FireModel,
    observation: &Observation,
    config: &CalibrationConfig,
) -> Result<CalibrationReport> {
    Calibrator::new(config.clone())?.train(model, observation)
}

/// Calibration loop with an external stop signal
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    stop: Arc<AtomicBool>,
}

/// Raw parameters together with the optimizer state that produced them
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    raw: Gradient,
    optimizer: OptimizerState,
}

impl Calibrator {
    /// Create a calibrator
    ///
    /// # Errors
    ///
    /// Anything [`CalibrationConfig::validate`] reports.
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Flag that ends the loop before the next iteration once set
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the calibration loop
    ///
    /// Each iteration evaluates the loss at the committed parameters,
    /// proposes an update and commits parameters and optimizer state
    /// together only if the update is finite.
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` / `Configuration` if the observation does not fit
    /// - `DivergedState` with the iteration under [`DivergencePolicy::Abort`],
    ///   or once `max_retries` consecutive retries are exhausted
    pub fn train(&self, model: &FireModel, observation: &Observation) -> Result<CalibrationReport> {
        let config = &self.config;
        let grid = &model.initial_grid;
        observation.validate(grid.rows(), grid.cols(), model.n_steps)?;

        let bounds = &config.bounds;
        let policy = config.constraint;
        let start = policy.decode(&policy.encode(&model.params, bounds), bounds);
        if start != model.params {
            warn!("Initial parameters moved onto their bounds: {:?}", start);
        }
        let trainable =
            Gradient::from_fn(|i, _| f64::from(u8::from(config.is_trainable(ParamName::ALL[i]))));

        let mut committed = Checkpoint {
            raw: policy.encode(&model.params, bounds),
            optimizer: OptimizerState::new(config.optimizer),
        };
        let mut previous: Option<Checkpoint> = None;
        let mut learning_rate = config.learning_rate;
        let mut retries = 0u32;
        let mut stalled = 0usize;
        let mut report = CalibrationReport {
            params: start,
            best_params: start,
            best_loss: f64::INFINITY,
            loss_history: Vec::new(),
            diverged_iterations: Vec::new(),
            stop_reason: StopReason::MaxEpochs,
            final_learning_rate: learning_rate,
        };
        let base_seed = model.simulator.config().seed;

        info!(
            "Calibration started: {} epochs, lr={}, optimizer={:?}, constraint={:?}, {} trainable",
            config.epochs,
            learning_rate,
            config.optimizer,
            policy,
            trainable.sum()
        );

        for iteration in 0..config.epochs {
            if self.stop.load(Ordering::Relaxed) {
                info!("Calibration stopped by signal before iteration {}", iteration);
                report.stop_reason = StopReason::Stopped;
                break;
            }

            let params = policy.decode(&committed.raw, bounds);
            let simulator = if config.resample_each_epoch {
                model.simulator.with_seed(base_seed.wrapping_add(iteration as u64))
            } else {
                model.simulator.clone()
            };

            let (loss, gradient) =
                match objective(&simulator, model, &params, observation, config.loss) {
                    Ok(evaluated) => evaluated,
                    Err(e) if e.is_divergence() => {
                        // The committed parameters themselves are bad: undo the last update
                        let restored = previous.take();
                        self.on_divergence(
                            e,
                            iteration,
                            &mut learning_rate,
                            &mut retries,
                            &mut report,
                        )?;
                        if let Some(checkpoint) = restored {
                            committed = checkpoint;
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            let mut raw_gradient = policy
                .raw_gradient(&committed.raw, bounds, &gradient)
                .component_mul(&trainable);
            if let Some(max_norm) = config.gradient_clip {
                raw_gradient = clip_gradient(&raw_gradient, max_norm);
            }

            let (delta, optimizer) = committed.optimizer.propose(&raw_gradient, learning_rate);
            let candidate = Checkpoint {
                raw: committed.raw - delta,
                optimizer,
            };
            let candidate_params = policy.decode(&candidate.raw, bounds);
            if !candidate_params.is_finite() || candidate.raw.iter().any(|v| !v.is_finite()) {
                let e = FireCaError::diverged(format!(
                    "update produced non-finite parameters {candidate_params:?}"
                ));
                self.on_divergence(e, iteration, &mut learning_rate, &mut retries, &mut report)?;
                continue;
            }

            retries = 0;
            report.loss_history.push(loss);
            if loss < report.best_loss {
                report.best_loss = loss;
                report.best_params = params;
            }
            previous = Some(committed);
            committed = match policy {
                ConstraintPolicy::Clip => Checkpoint {
                    raw: candidate_params.to_vector(),
                    ..candidate
                },
                _ => candidate,
            };

            if config.log_every > 0 && iteration % config.log_every == 0 {
                info!(
                    "Epoch {}: loss={:.6}, |grad|={:.4e}, lr={}",
                    iteration,
                    loss,
                    raw_gradient.norm(),
                    learning_rate
                );
            }
            debug!("Epoch {} parameters: {:?}", iteration, candidate_params);

            let history = &report.loss_history;
            if history.len() >= 2 {
                let change = (history[history.len() - 2] - loss).abs();
                stalled = if change <= config.tolerance { stalled + 1 } else { 0 };
                if stalled >= config.patience {
                    info!("Calibration converged at epoch {} (loss={:.6})", iteration, loss);
                    report.stop_reason = StopReason::Converged;
                    break;
                }
            }
        }

        report.params = policy.decode(&committed.raw, bounds);
        report.final_learning_rate = learning_rate;
        info!(
            "Calibration finished ({:?}): best loss={:.6}, {} epochs, {} divergences",
            report.stop_reason,
            report.best_loss,
            report.loss_history.len(),
            report.diverged_iterations.len()
        );
        Ok(report)
    }

    fn on_divergence(
        &self,
        error: FireCaError,
        iteration: usize,
        learning_rate: &mut f64,
        retries: &mut u32,
        report: &mut CalibrationReport,
    ) -> Result<()> {
        let error = error.at_iteration(iteration);
        report.diverged_iterations.push(iteration);
        match self.config.divergence {
            DivergencePolicy::Abort => Err(error),
            DivergencePolicy::ReduceLearningRate {
                factor,
                max_retries,
            } => {
                *retries += 1;
                if *retries > max_retries {
                    warn!("Giving up after {} retries: {}", max_retries, error);
                    return Err(error);
                }
                *learning_rate *= factor;
                warn!(
                    "{}; rolled back, retrying with lr={} ({}/{})",
                    error, learning_rate, retries, max_retries
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::TimedMask;
    use crate::grid::{Covariates, Raster};
    use crate::simulation::ModelConfig;

    fn model(n_steps: usize) -> FireModel {
        let simulator = Simulator::new(ModelConfig::with_shape(5, 5)).unwrap();
        let covariates = Covariates::uniform(5, 5, 1.0, 0.1).unwrap();
        let grid = Grid::initialize(covariates, &[(2, 2)]).unwrap();
        FireModel::new(simulator, grid, n_steps).unwrap()
    }

    #[test]
    fn test_model_rejects_bad_inputs() {
        let simulator = Simulator::new(ModelConfig::with_shape(5, 5)).unwrap();
        let grid = Grid::initialize(Covariates::uniform(4, 5, 1.0, 0.1).unwrap(), &[]).unwrap();
        assert!(matches!(
            FireModel::new(simulator.clone(), grid, 3).unwrap_err(),
            FireCaError::InvalidGeometry { .. }
        ));
        let grid = Grid::initialize(Covariates::uniform(5, 5, 1.0, 0.1).unwrap(), &[]).unwrap();
        assert!(matches!(
            FireModel::new(simulator, grid, 0).unwrap_err(),
            FireCaError::Configuration { .. }
        ));
    }

    #[test]
    fn test_initial_step_target_has_no_gradient() {
        let model = model(2);
        let mut mask = Raster::new(5, 5);
        mask.set(2, 2, 1.0);
        let obs = Observation::Series(vec![TimedMask { step: 0, mask }]);
        let (loss, gradient) =
            loss_and_gradient(&model, &model.params, &obs, LossKind::SquaredError).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(gradient, Gradient::zeros());
    }

    #[test]
    fn test_frozen_parameters_stay_put() {
        let model = model(1);
        let obs = Observation::Final(Raster::with_value(5, 5, 1.0));
        let config = CalibrationConfig {
            epochs: 10,
            frozen: vec![ParamName::Fuel, ParamName::Distance],
            ..CalibrationConfig::default()
        };
        let report = train(&model, &obs, &config).unwrap();
        assert_eq!(report.params.fuel, model.params.fuel);
        assert_eq!(report.params.distance, model.params.distance);
        assert!(report.params.intercept > model.params.intercept);
        assert!(!report.loss_history.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected_before_training() {
        let config = CalibrationConfig {
            learning_rate: -1.0,
            ..CalibrationConfig::default()
        };
        assert!(Calibrator::new(config).is_err());
    }
}
