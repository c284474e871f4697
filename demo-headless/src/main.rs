use clap::{Parser, ValueEnum};
use fire_ca_core::{
    evaluate, CalibrationConfig, CalibrationReport, Calibrator, CovariateRasters, Covariates,
    EvaluationMetrics, FireModel, Grid, GradientEstimator, ModelConfig, Observation,
    OptimizerKind, ParamName, Parameters, Raster, Result, Simulator,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Differentiable wildfire CA demo: simulate a synthetic burn, then recover its parameters
#[derive(Parser, Debug)]
#[command(name = "fire-ca-demo")]
#[command(
    about = "Stochastic wildfire cellular automaton with gradient calibration",
    long_about = None
)]
struct Args {
    /// Grid rows
    #[arg(long, default_value_t = 48)]
    rows: usize,

    /// Grid columns
    #[arg(long, default_value_t = 48)]
    cols: usize,

    /// Steps per run
    #[arg(short = 'n', long, default_value_t = 12)]
    steps: usize,

    /// Random seed for the synthetic burn
    #[arg(short, long, default_value_t = 7)]
    seed: u64,

    /// Wind speed in m/s
    #[arg(short, long, default_value_t = 6.0)]
    wind_speed: f64,

    /// Direction the wind blows toward, degrees clockwise from north
    #[arg(long, default_value_t = 90.0)]
    wind_direction: f64,

    /// Intercept used to generate the synthetic burn
    #[arg(long, default_value_t = 0.0)]
    true_intercept: f64,

    /// Wind coefficient used to generate the synthetic burn
    #[arg(long, default_value_t = 0.4)]
    true_wind: f64,

    /// Calibration epochs
    #[arg(short, long, default_value_t = 150)]
    epochs: usize,

    /// Learning rate
    #[arg(long, default_value_t = 0.05)]
    learning_rate: f64,

    /// Optimizer
    #[arg(long, value_enum, default_value_t = Optimizer::Adam)]
    optimizer: Optimizer,

    /// Use the relaxed estimator with this temperature instead of straight-through
    #[arg(long)]
    temperature: Option<f64>,

    /// Only fit these parameters (e.g. intercept,wind)
    #[arg(long, value_delimiter = ',')]
    train: Vec<ParamName>,

    /// Load the model configuration from a JSON file (overrides grid options)
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Write the calibration report as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Steps between progress rows
    #[arg(short, long, default_value_t = 2)]
    report_interval: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Optimizer {
    Sgd,
    Momentum,
    Adam,
}

impl From<Optimizer> for OptimizerKind {
    fn from(optimizer: Optimizer) -> Self {
        match optimizer {
            Optimizer::Sgd => OptimizerKind::Sgd,
            Optimizer::Momentum => OptimizerKind::Momentum { beta: 0.9 },
            Optimizer::Adam => OptimizerKind::default(),
        }
    }
}

#[derive(Serialize)]
struct DemoReport {
    truth: Parameters,
    start: Parameters,
    calibration: CalibrationReport,
    before: EvaluationMetrics,
    after: EvaluationMetrics,
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    println!("=== Differentiable Wildfire CA Demo ===\n");

    let mut config = match &args.model_config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig {
            seed: args.seed,
            ..ModelConfig::with_shape(args.rows, args.cols)
        },
    };
    if let Some(temperature) = args.temperature {
        config.estimator = GradientEstimator::Relaxed { temperature };
    }
    let simulator = Simulator::new(config.clone())?;

    let covariates = landscape(&config, args)?;
    let centre = (config.rows / 2, config.cols / 2);
    let grid = Grid::initialize(covariates, &[centre])?;
    println!(
        "Grid {}x{} at {:.0}m cells, ignition at {:?}, wind {:.1} m/s toward {:.0} deg",
        config.rows, config.cols, config.cell_size, centre, args.wind_speed, args.wind_direction
    );

    // Synthetic truth
    let truth = Parameters {
        intercept: args.true_intercept,
        wind: args.true_wind,
        ..config.initial_params
    };
    println!("\nStep | Time(min) | Burning | Burned out | Area(ha)");
    println!("-----|-----------|---------|------------|---------");
    let mut snapshots = Vec::with_capacity(args.steps);
    for snapshot in simulator.run(&grid, &truth, args.steps) {
        let snapshot = snapshot?;
        if args.report_interval > 0 && snapshot.step as usize % args.report_interval == 0 {
            let stats = snapshot.stats();
            println!(
                "{:4} | {:9.1} | {:7} | {:10} | {:8.2}",
                snapshot.step,
                simulator.elapsed_time(snapshot.step) / 60.0,
                stats.burning,
                stats.burned_out,
                snapshot.burned_area_hectares(config.cell_size)
            );
        }
        snapshots.push(snapshot);
    }
    let initial = grid.snapshot();
    let observation = Observation::from_snapshots(std::iter::once(&initial).chain(&snapshots));

    let model = FireModel::new(simulator, grid, args.steps)?;
    let start = model.params;
    let before = evaluate(&model, &observation)?;

    let mut calibration = CalibrationConfig {
        learning_rate: args.learning_rate,
        epochs: args.epochs,
        optimizer: args.optimizer.into(),
        resample_each_epoch: true,
        ..CalibrationConfig::default()
    };
    if !args.train.is_empty() {
        calibration = calibration.train_only(&args.train);
    }
    println!("\nCalibrating {} epochs from {:?}...", args.epochs, start);
    let report = Calibrator::new(calibration)?.train(&model, &observation)?;

    let fitted = model.clone().with_params(report.best_params);
    let after = evaluate(&fitted, &observation)?;

    println!("\n=== Calibration Complete ({:?}) ===", report.stop_reason);
    println!("Parameter  |   truth |   start |  fitted");
    println!("-----------|---------|---------|--------");
    for name in ParamName::ALL {
        println!(
            "{:10} | {:7.3} | {:7.3} | {:7.3}",
            name.as_str(),
            truth.get(name),
            start.get(name),
            report.best_params.get(name)
        );
    }
    println!(
        "\nIoU {:.3} -> {:.3}, F1 {:.3} -> {:.3}, loss {:.3} -> {:.3}",
        before.iou, after.iou, before.f1, after.f1, before.loss, after.loss
    );
    if let (Some(b), Some(a)) = (before.arrival_mae, after.arrival_mae) {
        println!("Arrival MAE {:.2} -> {:.2} steps", b, a);
    }
    if !report.diverged_iterations.is_empty() {
        println!(
            "Recovered from {} divergence(s), final lr {}",
            report.diverged_iterations.len(),
            report.final_learning_rate
        );
    }

    if let Some(path) = &args.output {
        let demo = DemoReport {
            truth,
            start,
            calibration: report,
            before,
            after,
        };
        let json = serde_json::to_string_pretty(&demo).map_err(|e| {
            fire_ca_core::FireCaError::config("output", format!("cannot serialize report: {e}"))
        })?;
        std::fs::write(path, json).map_err(|e| {
            let message = format!("cannot write {}: {e}", path.display());
            fire_ca_core::FireCaError::config("output", message)
        })?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

/// Rolling terrain with a drier band across the middle of the grid
fn landscape(config: &ModelConfig, args: &Args) -> Result<Covariates> {
    let (rows, cols) = (config.rows, config.cols);
    let rasters = CovariateRasters {
        fuel_load: Raster::from_fn(rows, cols, |r, c| {
            1.0 + 0.3 * ((r as f64 * 0.37).sin() * (c as f64 * 0.23).cos())
        }),
        fuel_moisture: Raster::from_fn(rows, cols, |r, _| {
            let band = (r as f64 - rows as f64 / 2.0).abs() / rows as f64;
            0.05 + 0.15 * band
        }),
        slope: Raster::new(rows, cols),
        elevation: Raster::new(rows, cols),
        wind_speed: Raster::new(rows, cols),
        wind_direction: Raster::new(rows, cols),
    };
    let elevation = Raster::from_fn(rows, cols, |r, c| {
        40.0 * (r as f64 / 9.0).sin() + 25.0 * (c as f64 / 13.0).cos()
    });
    Covariates::new(rows, cols, rasters)?
        .with_uniform_wind(args.wind_speed, args.wind_direction)?
        .with_elevation(elevation, config.cell_size)
}
