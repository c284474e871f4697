//! Gradient checks and calibration on synthetic burns

use approx::assert_relative_eq;
use fire_ca_core::{
    evaluate, loss_and_gradient, train, Backend, CalibrationConfig, Calibrator, ConstraintPolicy,
    CovariateRasters, Covariates, DivergencePolicy, FireCaError, FireModel, GradientEstimator,
    Grid, LossKind, ModelConfig, Observation, OptimizerKind, ParamName, Parameters, Raster,
    Simulator, StopReason, TimedMask,
};
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Hilly, windy 7x7 landscape with spatially varying fuel
fn landscape() -> Covariates {
    let rasters = CovariateRasters {
        fuel_load: Raster::from_fn(7, 7, |r, c| 0.8 + 0.1 * ((r + 2 * c) % 4) as f64),
        fuel_moisture: Raster::from_fn(7, 7, |r, c| 0.05 + 0.02 * ((3 * r + c) % 3) as f64),
        slope: Raster::new(7, 7),
        elevation: Raster::new(7, 7),
        wind_speed: Raster::new(7, 7),
        wind_direction: Raster::new(7, 7),
    };
    let elevation = Raster::from_fn(7, 7, |r, c| 5.0 * r as f64 + 2.0 * c as f64);
    Covariates::new(7, 7, rasters)
        .unwrap()
        .with_uniform_wind(4.0, 60.0)
        .unwrap()
        .with_elevation(elevation, 30.0)
        .unwrap()
}

fn model(estimator: GradientEstimator, n_steps: usize) -> FireModel {
    let simulator = Simulator::new(ModelConfig {
        estimator,
        backend: Backend::Sequential,
        seed: 17,
        ..ModelConfig::with_shape(7, 7)
    })
    .unwrap();
    let grid = Grid::initialize(landscape(), &[(3, 3)]).unwrap();
    FireModel::new(simulator, grid, n_steps).unwrap()
}

/// Cumulative burn probability after one step under `params`
///
/// Depends only on the ignition cell, so it is an exact target.
fn one_step_probability_mask(model: &FireModel, params: &Parameters) -> Raster {
    let snapshot = model
        .simulator
        .run(&model.initial_grid, params, 1)
        .next()
        .unwrap()
        .unwrap();
    Raster::from_vec(7, 7, snapshot.burn_probability).unwrap()
}

fn finite_difference(
    model: &FireModel,
    params: &Parameters,
    obs: &Observation,
    name: ParamName,
) -> f64 {
    let h = 1e-5;
    let value = params.get(name);
    let up = params.with(name, value + h);
    let down = params.with(name, value - h);
    let loss = |p: &Parameters| {
        loss_and_gradient(model, p, obs, LossKind::BinaryCrossEntropy)
            .unwrap()
            .0
    };
    (loss(&up) - loss(&down)) / (2.0 * h)
}

#[test]
fn test_one_step_gradient_matches_finite_difference() {
    let model = model(GradientEstimator::StraightThrough, 1);
    let mut target = Raster::new(7, 7);
    for (r, c) in [(2, 2), (2, 3), (3, 4), (4, 4), (4, 2)] {
        target.set(r, c, 1.0);
    }
    target.set(3, 2, 0.4);
    let obs = Observation::Final(target);
    let params = Parameters::default();

    let (_, gradient) =
        loss_and_gradient(&model, &params, &obs, LossKind::BinaryCrossEntropy).unwrap();
    for name in ParamName::ALL {
        let numeric = finite_difference(&model, &params, &obs, name);
        assert_relative_eq!(
            gradient[name.index()],
            numeric,
            epsilon = 1e-5,
            max_relative = 1e-5
        );
    }
}

#[test]
fn test_relaxed_shares_loss_with_straight_through() {
    let diamond = |radius: usize| {
        Raster::from_fn(7, 7, |r, c| {
            if r.abs_diff(3) + c.abs_diff(3) <= radius { 1.0 } else { 0.0 }
        })
    };
    let obs = Observation::Series(vec![
        TimedMask { step: 2, mask: diamond(1) },
        TimedMask { step: 4, mask: diamond(3) },
    ]);
    let params = Parameters::default().with(ParamName::Intercept, 0.3);

    let hard = model(GradientEstimator::StraightThrough, 4);
    let relaxed = model(GradientEstimator::Relaxed { temperature: 0.5 }, 4);
    let bce = LossKind::BinaryCrossEntropy;
    let (hard_loss, hard_grad) = loss_and_gradient(&hard, &params, &obs, bce).unwrap();
    let (relaxed_loss, relaxed_grad) = loss_and_gradient(&relaxed, &params, &obs, bce).unwrap();
    assert_eq!(hard_loss, relaxed_loss);
    assert!(hard_grad.iter().chain(relaxed_grad.iter()).all(|g| g.is_finite()));
    assert!(relaxed_grad.iter().any(|g| *g != 0.0));
}

/// Windy 15x15 landscape with the fire starting west of centre
fn windy_model(estimator: GradientEstimator, n_steps: usize) -> FireModel {
    let simulator = Simulator::new(ModelConfig {
        estimator,
        backend: Backend::Sequential,
        seed: 5,
        ..ModelConfig::with_shape(15, 15)
    })
    .unwrap();
    let covariates = Covariates::uniform(15, 15, 1.0, 0.1)
        .unwrap()
        .with_uniform_wind(6.0, 90.0)
        .unwrap();
    let grid = Grid::initialize(covariates, &[(7, 4)]).unwrap();
    FireModel::new(simulator, grid, n_steps).unwrap()
}

#[test]
fn test_calibration_recovers_wind_from_burn_masks() {
    const STEPS: usize = 5;
    const TOLERANCE: f64 = 0.15;
    let truth = Parameters::default().with(ParamName::Wind, 0.6);

    for estimator in [
        GradientEstimator::StraightThrough,
        GradientEstimator::Relaxed { temperature: 0.5 },
    ] {
        let model = windy_model(estimator, STEPS);
        assert_eq!(model.params.wind, 0.25);
        let snapshots: Vec<_> = model
            .simulator
            .run(&model.initial_grid, &truth, STEPS)
            .collect::<fire_ca_core::Result<_>>()
            .unwrap();
        let initial = model.initial_grid.snapshot();
        let obs = Observation::from_snapshots(std::iter::once(&initial).chain(&snapshots));

        let config = CalibrationConfig {
            learning_rate: 0.02,
            epochs: 300,
            tolerance: 0.0,
            patience: 50,
            log_every: 50,
            ..CalibrationConfig::default()
        }
        .train_only(&[ParamName::Wind]);
        let report = train(&model, &obs, &config).unwrap();

        let fitted = report.best_params.wind;
        assert!(
            (fitted - 0.6).abs() < TOLERANCE,
            "{estimator:?}: fitted wind {fitted}, truth 0.6"
        );
        assert!((report.params.wind - 0.6).abs() < TOLERANCE);
        assert_eq!(report.params.intercept, model.params.intercept);
        assert!(report.best_loss < report.loss_history[0]);
    }
}

#[test]
fn test_calibration_recovers_intercept() {
    let model = model(GradientEstimator::StraightThrough, 1);
    let truth = Parameters::default().with(ParamName::Intercept, 0.5);
    let obs = Observation::Final(one_step_probability_mask(&model, &truth));

    let config = CalibrationConfig {
        learning_rate: 0.3,
        epochs: 400,
        optimizer: OptimizerKind::Sgd,
        tolerance: 1e-14,
        patience: 3,
        log_every: 50,
        ..CalibrationConfig::default()
    }
    .train_only(&[ParamName::Intercept]);

    let report = train(&model, &obs, &config).unwrap();
    assert_relative_eq!(report.params.intercept, 0.5, epsilon = 1e-3);
    assert_relative_eq!(report.best_params.intercept, 0.5, epsilon = 1e-3);
    assert_eq!(report.params.fuel, model.params.fuel);
    assert_eq!(report.params.wind, model.params.wind);
    assert!(report.diverged_iterations.is_empty());
    let history = &report.loss_history;
    assert!(history.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    assert!(history.last().unwrap() < &history[0]);
}

#[test]
fn test_adam_with_reparameterization_reduces_loss() {
    let model = model(GradientEstimator::StraightThrough, 1);
    let truth = Parameters {
        intercept: 0.2,
        wind: 0.6,
        slope: 3.0,
        ..Parameters::default()
    };
    let obs = Observation::Final(one_step_probability_mask(&model, &truth));
    let config = CalibrationConfig {
        learning_rate: 0.05,
        epochs: 150,
        constraint: ConstraintPolicy::Reparameterize,
        gradient_clip: Some(50.0),
        ..CalibrationConfig::default()
    };

    let report = train(&model, &obs, &config).unwrap();
    assert!(report.best_loss < report.loss_history[0]);
    assert!(config.bounds.check(&report.params).is_ok());
    assert!(config.bounds.check(&report.best_params).is_ok());
}

#[test]
fn test_clip_policy_respects_bounds() {
    let model = model(GradientEstimator::StraightThrough, 1);
    // Nothing burns: every coefficient that raises spread is pushed down
    let obs = Observation::Final(Raster::new(7, 7));
    let config = CalibrationConfig {
        learning_rate: 0.5,
        epochs: 30,
        optimizer: OptimizerKind::Momentum { beta: 0.8 },
        ..CalibrationConfig::default()
    };
    let report = train(&model, &obs, &config).unwrap();
    assert!(config.bounds.check(&report.params).is_ok());
    assert!(report.params.fuel >= 0.0);
    assert!(report.params.intercept < model.params.intercept);
}

#[test]
fn test_divergence_abort_names_iteration() {
    let model = model(GradientEstimator::StraightThrough, 1);
    let obs = Observation::Final(Raster::with_value(7, 7, 1.0));
    let config = CalibrationConfig {
        learning_rate: 1e308,
        optimizer: OptimizerKind::Sgd,
        constraint: ConstraintPolicy::Unconstrained,
        divergence: DivergencePolicy::Abort,
        ..CalibrationConfig::default()
    }
    .train_only(&[ParamName::Intercept]);

    let err = train(&model, &obs, &config).unwrap_err();
    assert!(matches!(
        err,
        FireCaError::DivergedState {
            iteration: Some(0),
            ..
        }
    ));
}

#[test]
fn test_divergence_rolls_back_and_reduces_learning_rate() {
    let model = model(GradientEstimator::StraightThrough, 1);
    let obs = Observation::Final(Raster::with_value(7, 7, 1.0));
    let config = CalibrationConfig {
        learning_rate: 1e308,
        epochs: 3,
        optimizer: OptimizerKind::Sgd,
        constraint: ConstraintPolicy::Unconstrained,
        divergence: DivergencePolicy::ReduceLearningRate {
            factor: 1e-306,
            max_retries: 2,
        },
        ..CalibrationConfig::default()
    }
    .train_only(&[ParamName::Intercept]);

    let report = train(&model, &obs, &config).unwrap();
    assert_eq!(report.diverged_iterations, vec![0]);
    assert_relative_eq!(report.final_learning_rate, 100.0, max_relative = 1e-9);
    assert!(report.params.is_finite());
    assert!(report.params.intercept > model.params.intercept);

    let exhausted = CalibrationConfig {
        divergence: DivergencePolicy::ReduceLearningRate {
            factor: 0.9,
            max_retries: 1,
        },
        ..config
    };
    assert!(train(&model, &obs, &exhausted).unwrap_err().is_divergence());
}

#[test]
fn test_stop_signal_ends_before_first_iteration() {
    let model = model(GradientEstimator::StraightThrough, 1);
    let obs = Observation::Final(Raster::new(7, 7));
    let calibrator = Calibrator::new(CalibrationConfig::default()).unwrap();
    calibrator.stop_handle().store(true, Ordering::Relaxed);
    let report = calibrator.train(&model, &obs).unwrap();
    assert_eq!(report.stop_reason, StopReason::Stopped);
    assert!(report.loss_history.is_empty());
    assert_eq!(report.params, model.params);
}

#[test]
fn test_resampling_each_epoch_runs() {
    let model = model(GradientEstimator::StraightThrough, 3);
    let obs = Observation::Final(Raster::from_fn(7, 7, |r, c| {
        if r.abs_diff(3) <= 1 && c.abs_diff(3) <= 1 { 1.0 } else { 0.0 }
    }));
    let config = CalibrationConfig {
        epochs: 5,
        resample_each_epoch: true,
        ..CalibrationConfig::default()
    };
    let report = train(&model, &obs, &config).unwrap();
    assert_eq!(report.loss_history.len(), 5);
    assert_eq!(report.stop_reason, StopReason::MaxEpochs);
}

#[test]
fn test_observation_shape_mismatch() {
    let model = model(GradientEstimator::StraightThrough, 2);
    let obs = Observation::Final(Raster::new(6, 7));
    assert!(matches!(
        train(&model, &obs, &CalibrationConfig::default()).unwrap_err(),
        FireCaError::InvalidGeometry { .. }
    ));
    assert!(matches!(
        loss_and_gradient(&model, &model.params, &obs, LossKind::SquaredError).unwrap_err(),
        FireCaError::InvalidGeometry { .. }
    ));
}

#[test]
fn test_evaluate_against_own_simulation() {
    let model = model(GradientEstimator::StraightThrough, 4);
    let snapshots: Vec<_> = model
        .simulator
        .run(&model.initial_grid, &model.params, 4)
        .collect::<fire_ca_core::Result<_>>()
        .unwrap();
    let initial = model.initial_grid.snapshot();
    let obs = Observation::from_snapshots(std::iter::once(&initial).chain(&snapshots));

    let metrics = evaluate(&model, &obs).unwrap();
    assert_eq!(metrics.iou, 1.0);
    assert_eq!(metrics.accuracy, 1.0);
    assert_eq!(metrics.simulated_burned_cells, metrics.observed_burned_cells);
    assert_eq!(metrics.arrival_mae, Some(0.0));
    assert!(metrics.loss.is_finite());

    let final_only = Observation::Final(snapshots[3].burned_mask());
    let metrics = evaluate(&model, &final_only).unwrap();
    assert_eq!(metrics.f1, 1.0);
    assert!(metrics.arrival_mae.is_none());
}
