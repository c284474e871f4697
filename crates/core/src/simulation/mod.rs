//! Simulation driver and its configuration

pub mod config;
pub mod driver;

pub use config::ModelConfig;
pub use driver::{Run, Simulator};
