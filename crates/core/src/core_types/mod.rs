//! Core types and utilities

pub mod dual;

pub use dual::{stable_sigmoid, Dual, Gradient, PARAM_COUNT};
